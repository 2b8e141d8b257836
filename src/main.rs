use clap::{value_t, App, Arg, ArgMatches};
use std::process;
use std::thread;
use std::time::Duration;
use stuncheck::{resolve, ProbeConfig, ProbeResult, StunProbe};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVERS: &[&str] = &["airconnectrelay.t1v.com", "airconnectrelay2.t1v.com"];
const DEFAULT_PORTS: &[&str] = &["3478", "80"];

type Outcome = Result<ProbeResult, String>;

fn main() {
    let matches = App::new("stuncheck")
        .about("Checks that STUN servers answer Binding Requests and reports the mapped address")
        .arg(
            Arg::with_name("DEBUG")
                .short("d")
                .long("debug")
                .help("Print per-step diagnostics"),
        )
        .arg(
            Arg::with_name("SERVER")
                .short("s")
                .long("server")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("STUN server host name or address"),
        )
        .arg(
            Arg::with_name("PORT")
                .short("p")
                .long("port")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .validator(is_port)
                .help("STUN server port"),
        )
        .arg(
            Arg::with_name("LOCAL_PORT")
                .short("l")
                .long("local-port")
                .takes_value(true)
                .default_value("0")
                .validator(is_port)
                .help("Local UDP port to bind, 0 for any"),
        )
        .arg(
            Arg::with_name("TIMEOUT")
                .short("t")
                .long("timeout")
                .takes_value(true)
                .default_value("5")
                .validator(is_timeout)
                .help("Seconds to wait for each response"),
        )
        .arg(
            Arg::with_name("JOBS")
                .short("j")
                .long("jobs")
                .takes_value(true)
                .default_value("1")
                .help("Servers probed in parallel, 0 for one per CPU"),
        )
        .get_matches();

    let debug = matches.is_present("DEBUG");
    init_logging(debug);

    let config = ProbeConfig::default()
        .with_debug(debug)
        .with_local_port(value_t!(matches, "LOCAL_PORT", u16).unwrap_or_else(|e| e.exit()))
        .with_timeout(Duration::from_secs(
            value_t!(matches, "TIMEOUT", u64).unwrap_or_else(|e| e.exit()),
        ));
    let jobs = match value_t!(matches, "JOBS", usize).unwrap_or_else(|e| e.exit()) {
        0 => num_cpus::get(),
        n => n,
    };

    let targets = targets(&matches);
    let probe = StunProbe::new(config);
    let failed = if jobs <= 1 {
        run_sequential(&probe, &targets)
    } else {
        run_parallel(&probe, &targets, jobs)
    };
    if failed > 0 {
        process::exit(1);
    }
}

fn is_port(v: String) -> Result<(), String> {
    v.parse::<u16>().map(|_| ()).map_err(|e| e.to_string())
}

const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn is_timeout(v: String) -> Result<(), String> {
    match v.parse::<u64>() {
        Ok(0) => Err("timeout must be at least one second".to_owned()),
        Ok(secs) if secs > MAX_TIMEOUT_SECS => {
            Err(format!("timeout must not exceed {} seconds", MAX_TIMEOUT_SECS))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn targets(matches: &ArgMatches) -> Vec<(String, u16)> {
    let servers: Vec<&str> = match matches.values_of("SERVER") {
        Some(values) => values.collect(),
        None => DEFAULT_SERVERS.to_vec(),
    };
    let ports: Vec<u16> = match matches.values_of("PORT") {
        Some(values) => values.filter_map(|p| p.parse().ok()).collect(),
        None => DEFAULT_PORTS.iter().filter_map(|p| p.parse().ok()).collect(),
    };
    servers
        .iter()
        .flat_map(|server| ports.iter().map(move |port| (server.to_string(), *port)))
        .collect()
}

fn check_address(probe: &StunProbe, host: &str, port: u16) -> Outcome {
    let server = resolve(host).map_err(|e| e.to_string())?;
    probe.probe(&server, port).map_err(|e| e.to_string())
}

fn report(outcome: &Outcome) -> bool {
    match outcome {
        Ok(result) => {
            println!("  ok (external {})", result);
            true
        }
        Err(reason) => {
            println!("  FAIL ({})", reason);
            false
        }
    }
}

fn run_sequential(probe: &StunProbe, targets: &[(String, u16)]) -> usize {
    let mut failed = 0;
    for (host, port) in targets {
        println!("* Checking {}:{}...", host, port);
        if !report(&check_address(probe, host, *port)) {
            failed += 1;
        }
    }
    failed
}

fn run_parallel(probe: &StunProbe, targets: &[(String, u16)], jobs: usize) -> usize {
    let mut outcomes: Vec<Option<Outcome>> = vec![None; targets.len()];
    thread::scope(|scope| {
        let workers: Vec<_> = (0..jobs.min(targets.len()))
            .map(|worker| {
                scope.spawn(move || {
                    targets
                        .iter()
                        .enumerate()
                        .skip(worker)
                        .step_by(jobs)
                        .map(|(i, (host, port))| (i, check_address(probe, host, *port)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for worker in workers {
            match worker.join() {
                Ok(done) => {
                    for (i, outcome) in done {
                        outcomes[i] = Some(outcome);
                    }
                }
                Err(_) => tracing::error!("probe worker panicked"),
            }
        }
    });

    let mut failed = 0;
    for ((host, port), outcome) in targets.iter().zip(outcomes) {
        println!("* Checking {}:{}...", host, port);
        let outcome = outcome.unwrap_or_else(|| Err("worker panicked".to_owned()));
        if !report(&outcome) {
            failed += 1;
        }
    }
    failed
}
