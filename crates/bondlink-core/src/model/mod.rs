//! Canonical domain types: normalized capabilities, device
//! descriptors, and cached device state.

pub mod capability;
pub mod device;
pub mod state;

pub use capability::{Capability, capability_set};
pub use device::{DeviceDescriptor, DeviceType};
pub use state::{DeviceState, PowerState};
