// Shared transport configuration for building reqwest::Client instances.
//
// The bridge speaks plain HTTP on the local network, so there is no TLS
// story here -- just the per-request timeout and a user agent. The
// timeout is deliberately short (5s default) and independent of the
// poll cadence: a hung device must not stall a whole poll cycle.

use std::time::Duration;

/// Transport configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout, applied to every call to the bridge.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("bondlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(crate::error::Error::Transport)
    }
}
