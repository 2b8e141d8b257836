use std::time::Duration;

/// Largest datagram accepted as a response; anything bigger is rejected.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-engine settings. Nothing here is process-wide, so probes running on
/// different threads can use different settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Local UDP port to bind, 0 lets the OS choose.
    pub local_port: u16,
    pub timeout: Duration,
    pub max_datagram: usize,
    /// Emit per-step diagnostics at debug level.
    pub debug: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            local_port: 0,
            timeout: DEFAULT_TIMEOUT,
            max_datagram: MAX_DATAGRAM_SIZE,
            debug: false,
        }
    }
}

impl ProbeConfig {
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_datagram(mut self, size: usize) -> Self {
        self.max_datagram = size;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
