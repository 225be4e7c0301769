//! Async client for the Bond bridge's Local HTTP API.
//!
//! The bridge aggregates RF/IR-controlled accessories (ceiling fans,
//! fireplaces, shades, lights) behind a token-authenticated HTTP API on
//! the local network. This crate owns the wire surface:
//!
//! - **[`HubClient`]** — transport mechanics, the PIN unlock exchange,
//!   device listing/state/action endpoints, and a one-shot retry for
//!   transport faults.
//! - **[`Session`]** — the shared token and its lifecycle
//!   ([`TokenState`]): unlock, expiry on 401, and the bridge's
//!   power-cycle lockout, observable through a `watch` channel.
//! - **[`models`]** — raw wire records, deliberately untyped where the
//!   firmware is free-form; normalization lives in `bondlink-core`.
//!
//! Secrets (PIN, token) are carried as [`secrecy::SecretString`] and
//! never logged.

pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod transport;

pub use client::HubClient;
pub use error::Error;
pub use models::{BridgeInfo, RawDeviceRecord, RawStateRecord, TokenInfo};
pub use session::{Session, TokenState};
pub use transport::TransportConfig;
