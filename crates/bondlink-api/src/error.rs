use thiserror::Error;

/// Top-level error type for the `bondlink-api` crate.
///
/// Covers every failure mode of talking to the bridge: the PIN unlock
/// exchange, token expiry, transport faults, and application-level
/// rejections. `bondlink-core` maps these into validation/throttle
/// diagnostics of its own.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The bridge rejected the unlock PIN.
    #[error("Bridge rejected the unlock PIN")]
    InvalidPin,

    /// The bridge is in its lockout state. It only accepts PIN unlocks
    /// for a limited window after a power cycle; when the bridge
    /// reports how much of that window remains, it is carried here so
    /// the operator can be told to retry in time.
    #[error("Bridge is locked -- power cycle it and retry within the unlock window")]
    Locked {
        /// Seconds left in the unlock window, when the bridge reports it.
        retry_window_secs: Option<u64>,
    },

    /// The stored token was rejected (HTTP 401) -- re-unlock required.
    #[error("Session token expired or revoked -- re-authentication required")]
    AuthExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (DNS failure, protocol error, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The bridge did not answer within the per-request timeout.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Could not reach the bridge at all (connection refused / reset).
    #[error("Bridge unreachable: {message}")]
    Unreachable { message: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Application ─────────────────────────────────────────────────
    /// The bridge accepted the request but refused to execute it
    /// (device offline, action unsupported by the firmware). Not worth
    /// an automatic retry -- surfaced as-is to the caller.
    #[error("Bridge rejected action on device {device_id}: {message}")]
    Rejected { device_id: String, message: String },

    /// Unexpected HTTP-level failure outside the known cases above.
    #[error("Bridge API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth is gone and
    /// re-running the unlock flow might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Returns `true` if this is a transient transport error worth a
    /// single retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::Unreachable { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` for auth states the operator must resolve
    /// (wrong PIN, lockout) rather than the client retrying.
    pub fn needs_operator(&self) -> bool {
        matches!(self, Self::InvalidPin | Self::Locked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_covers_transport_faults_only() {
        assert!(Error::Timeout { timeout_secs: 5 }.is_transient());
        assert!(
            Error::Unreachable {
                message: "connection refused".into()
            }
            .is_transient()
        );
        assert!(!Error::AuthExpired.is_transient());
        assert!(
            !Error::Rejected {
                device_id: "dev-1".into(),
                message: "offline".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn operator_resolvable_states() {
        assert!(Error::InvalidPin.needs_operator());
        assert!(
            Error::Locked {
                retry_window_secs: None
            }
            .needs_operator()
        );
        // Expiry is recoverable by re-running unlock, not the operator.
        assert!(!Error::AuthExpired.needs_operator());
        assert!(Error::AuthExpired.is_auth_expired());
    }
}
