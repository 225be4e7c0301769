use std::time::Duration;

use thiserror::Error;

use crate::model::Capability;

/// Error type for the core components (registry, synchronizer,
/// dispatcher, controller).
///
/// Wire/auth failures from `bondlink-api` pass through via
/// [`Hub`](CoreError::Hub); the variants here cover what only the core
/// can know: validation against the capability model, throttling, and
/// hub liveness.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation ──────────────────────────────────────────────────
    /// The device is unknown to the registry, or does not support the
    /// requested action. A caller bug -- never retried, and the request
    /// never reaches the bridge.
    #[error("Device {device_id} does not support {action}")]
    UnsupportedAction {
        device_id: String,
        action: Capability,
    },

    // ── Throttling ──────────────────────────────────────────────────
    /// The per-device minimum interval has not elapsed. Expected and
    /// non-fatal; the caller decides whether to drop, debounce, or
    /// resubmit. The most recent rate-limited request per device is
    /// kept in a single pending slot and delivered when the window
    /// opens (last writer wins).
    #[error("Rate limited -- retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A command for this device is already in flight; at most one is
    /// allowed at a time.
    #[error("Device {device_id} has a command in flight")]
    Busy { device_id: String },

    // ── Liveness ────────────────────────────────────────────────────
    /// Every device failed to poll for the configured number of
    /// consecutive cycles. Distinct from per-device staleness; the
    /// owning process decides whether to re-authenticate or halt.
    #[error("Bridge unreachable for {consecutive_cycles} consecutive poll cycles")]
    HubUnreachable { consecutive_cycles: u32 },

    /// Operation requires a connected controller.
    #[error("Controller is not connected")]
    Disconnected,

    /// Connecting requires credentials: no valid token and no PIN.
    #[error("No stored token and no PIN configured -- setup required")]
    CredentialsRequired,

    // ── Pass-through ────────────────────────────────────────────────
    /// Failure from the bridge client (auth, transport, rejection).
    #[error(transparent)]
    Hub(#[from] bondlink_api::Error),
}

impl CoreError {
    /// Returns `true` for the expected, non-fatal throttle outcomes.
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Busy { .. })
    }

    /// Returns `true` if re-running the unlock flow might resolve this.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::Hub(e) if e.is_auth_expired())
    }
}
