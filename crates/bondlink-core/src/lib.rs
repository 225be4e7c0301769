// bondlink-core: Device model, state cache, and command plumbing on top
// of bondlink-api.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod registry;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HubConfig, PersistedState};
pub use controller::{ConnectionState, HubController};
pub use dispatch::{CommandDispatcher, CommandRequest};
pub use error::CoreError;
pub use registry::DeviceRegistry;
pub use sync::{HubHealth, StateSynchronizer, StateUpdate};

// Re-export model types at the crate root for ergonomics.
pub use model::{Capability, DeviceDescriptor, DeviceState, DeviceType, PowerState};
