// ── Cached device state ──
//
// Owned exclusively by the state synchronizer; the dispatcher can only
// request an update through it. Diffing is field-wise on the three
// consumer-visible values (power, level, light) -- timestamps and the
// stale flag never trigger change notifications on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bondlink_api::RawStateRecord;

use super::device::DeviceType;

/// Tri-state power, `Unknown` until a device has been polled (or once
/// its cached state has aged past the staleness threshold).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl PowerState {
    fn from_raw(raw: Option<u8>) -> Self {
        match raw {
            Some(0) => Self::Off,
            Some(_) => Self::On,
            None => Self::Unknown,
        }
    }
}

/// The last observed (or optimistically assumed) state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub power: PowerState,
    /// Type-dependent level: fan speed step, flame step, brightness
    /// percent, or shade position percent.
    pub level: Option<u32>,
    /// Light kit state, for devices that have one.
    pub light_on: Option<bool>,
    pub last_observed_at: DateTime<Utc>,
    /// Set when the most recent poll for this device failed; the last
    /// good values above are retained, never nulled out.
    pub stale: bool,
}

impl DeviceState {
    /// Placeholder for a device that has never been successfully polled.
    pub fn unknown(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            power: PowerState::Unknown,
            level: None,
            light_on: None,
            last_observed_at: DateTime::<Utc>::MIN_UTC,
            stale: true,
        }
    }

    /// Build from a raw poll result. Which wire field feeds `level`
    /// depends on the device type; Generic devices take whichever level
    /// field the firmware populated.
    pub fn from_raw(device_id: impl Into<String>, raw: &RawStateRecord, device_type: DeviceType) -> Self {
        let level = match device_type {
            DeviceType::CeilingFan => raw.speed,
            DeviceType::Fireplace => raw.flame,
            DeviceType::MotorizedShade => raw.position,
            DeviceType::Light => raw.brightness,
            DeviceType::Generic => raw.speed.or(raw.flame).or(raw.brightness).or(raw.position),
        };

        Self {
            device_id: device_id.into(),
            power: PowerState::from_raw(raw.power),
            level,
            light_on: raw.light.map(|v| v != 0),
            last_observed_at: Utc::now(),
            stale: false,
        }
    }

    /// Field-wise comparison on the consumer-visible values.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.power != other.power || self.level != other.level || self.light_on != other.light_on
    }

    /// The view handed to consumers once the cached value has aged past
    /// the staleness threshold: power degrades to Unknown, `stale` is
    /// forced on, last-known level/light are kept for display.
    pub fn as_aged(&self) -> Self {
        Self {
            power: PowerState::Unknown,
            stale: true,
            ..self.clone()
        }
    }
}
