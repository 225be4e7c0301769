// Canonical device descriptor, built from the bridge's raw records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use bondlink_api::RawDeviceRecord;

use super::capability::{Capability, capability_set};

/// The broad class of accessory behind the bridge.
///
/// Purely data: there is no behavioral branching on this in the core,
/// it only guides which level field the state model reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    CeilingFan,
    Fireplace,
    MotorizedShade,
    Light,
    Generic,
}

impl DeviceType {
    /// Classify from the firmware's type code. Codes outside the known
    /// four (including the firmware's `GX`/`BD` oddities) are Generic.
    pub fn from_code(code: &str) -> Self {
        match code {
            "CF" => Self::CeilingFan,
            "FP" => Self::Fireplace,
            "MS" => Self::MotorizedShade,
            "LT" => Self::Light,
            _ => Self::Generic,
        }
    }

    /// The canonical type code, for writing records back out.
    pub fn code(self) -> &'static str {
        match self {
            Self::CeilingFan => "CF",
            Self::Fireplace => "FP",
            Self::MotorizedShade => "MS",
            Self::Light => "LT",
            Self::Generic => "GX",
        }
    }
}

/// A discovered device with its normalized capability set.
///
/// Identity (`id`) is bridge-assigned and stable across reboots; a
/// descriptor leaves the registry only when a later discovery pass
/// omits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub capabilities: BTreeSet<Capability>,
    pub location: Option<String>,
}

impl DeviceDescriptor {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Back-conversion for persistence. Unknown raw actions were dropped at
/// build time, so a round trip keeps only the normalized set.
impl From<&DeviceDescriptor> for RawDeviceRecord {
    fn from(descriptor: &DeviceDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            type_code: descriptor.device_type.code().to_owned(),
            actions: descriptor
                .capabilities
                .iter()
                .map(ToString::to_string)
                .collect(),
            location: descriptor.location.clone(),
        }
    }
}

impl From<RawDeviceRecord> for DeviceDescriptor {
    fn from(raw: RawDeviceRecord) -> Self {
        Self {
            device_type: DeviceType::from_code(&raw.type_code),
            capabilities: capability_set(&raw.actions),
            id: raw.id,
            name: raw.name,
            location: raw.location,
        }
    }
}
