// Configuration types for the hub connection.
//
// File I/O and storage live with the embedding application; this module
// only defines the shapes. The PIN is write-once input for the unlock
// flow and is deliberately absent from the persistable state.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use bondlink_api::{RawDeviceRecord, TransportConfig};

/// Connection and tuning knobs for one bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Bridge base URL, e.g. `http://192.168.1.50`.
    pub host: Url,

    /// Persisted session token from an earlier unlock, if any.
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Unlock PIN. Consumed by the unlock flow when no valid token is
    /// held; never serialized back out.
    #[serde(default)]
    pub pin: Option<SecretString>,

    /// Poll cycle interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Minimum interval between commands to the same device, in
    /// milliseconds.
    #[serde(default = "default_min_command_interval_ms")]
    pub min_command_interval_ms: u64,

    /// Per-request network timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consecutive all-device poll failures before the synchronizer
    /// reports the bridge unreachable.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Age after which cached state is reported as Unknown, in seconds.
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,

    /// Device records persisted from an earlier discovery pass, used to
    /// seed the registry before the first refresh.
    #[serde(default)]
    pub devices: Vec<RawDeviceRecord>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_min_command_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_staleness_threshold_secs() -> u64 {
    120
}

impl HubConfig {
    /// Minimal config for a known host; everything else defaulted.
    pub fn new(host: Url) -> Self {
        Self {
            host,
            token: None,
            pin: None,
            poll_interval_secs: default_poll_interval_secs(),
            min_command_interval_ms: default_min_command_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            devices: Vec::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn min_command_interval(&self) -> Duration {
        Duration::from_millis(self.min_command_interval_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// The subset the embedding application writes back to disk whenever
/// discovery or (re-)authentication changes it. No PIN, ever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub host: Url,
    pub token: Option<String>,
    pub devices: Vec<RawDeviceRecord>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: HubConfig =
            serde_json::from_value(json!({ "host": "http://192.168.1.50" })).unwrap();

        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.min_command_interval_ms, 1_000);
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.failure_threshold, 3);
        assert!(config.token.is_none());
        assert!(config.devices.is_empty());
    }

    #[test]
    fn seeded_devices_deserialize() {
        let config: HubConfig = serde_json::from_value(json!({
            "host": "http://192.168.1.50",
            "token": "abc123",
            "devices": [
                { "id": "dev-1", "name": "Den Fan", "type": "CF", "actions": ["TurnOn"] }
            ]
        }))
        .unwrap();

        assert!(config.token.is_some());
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].type_code, "CF");
    }
}
