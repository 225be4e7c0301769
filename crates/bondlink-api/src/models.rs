// Wire-format models for the bridge's Local API.
//
// These mirror the JSON the firmware actually emits. Normalization into
// capability sets and typed state lives in `bondlink-core`; everything
// here stays raw and forward compatible (`extra` catch-alls) so new
// firmware fields never break deserialization.

use serde::{Deserialize, Serialize};

/// Response of `GET /v2/token`.
///
/// `locked == 1` means the bridge refuses to hand out its token until
/// it is power cycled and unlocked with the PIN.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub locked: u8,
    pub token: Option<String>,
    /// Seconds remaining in the post-power-cycle unlock window, on
    /// firmware that reports it. Never assumed; the historical ~10
    /// minute figure is documentation folklore.
    #[serde(default)]
    pub unlock_window_secs: Option<u64>,
}

/// Response of `GET /v2/sys/version` -- reachable without a token.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeInfo {
    pub target: Option<String>,
    pub fw_ver: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub bondid: Option<String>,
}

/// One raw device record, as assembled from `GET /v2/devices/{id}`.
///
/// `id` is not part of the detail payload; the client injects the key
/// it was fetched under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDeviceRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Firmware type code: `CF`, `FP`, `MS`, `LT`, and friends.
    #[serde(rename = "type", default)]
    pub type_code: String,
    /// Free-form action names as the firmware reports them.
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Response of `GET /v2/devices/{id}/state`.
///
/// Which level field is populated depends on the device type; all are
/// optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStateRecord {
    /// 1 = on, 0 = off.
    pub power: Option<u8>,
    /// Fan speed step.
    pub speed: Option<u32>,
    /// Fireplace flame step.
    pub flame: Option<u32>,
    /// Light brightness percent.
    pub brightness: Option<u32>,
    /// Shade position percent (100 = open).
    pub position: Option<u32>,
    /// 1 = light on, 0 = off (fans with light kits).
    pub light: Option<u8>,
    /// Fan direction: 1 forward, -1 reverse.
    pub direction: Option<i8>,
    /// Anything newer firmware adds.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
