// ── Capability normalization ──
//
// The bridge reports each device's actions as free-form strings. The
// normalized set below is the only vocabulary the dispatcher will
// accept; action strings outside it are skipped during discovery so a
// firmware update can never break refresh.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

/// A normalized control action a device can support.
///
/// Variant names match the bridge's wire spelling exactly, so
/// `Display`/`FromStr` (via `strum`) round-trip against the Local API.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Capability {
    // Power
    TurnOn,
    TurnOff,
    TogglePower,
    // Fan speed / direction
    SetSpeed,
    IncreaseSpeed,
    DecreaseSpeed,
    SetDirection,
    ToggleDirection,
    // Fireplace flame
    SetFlame,
    IncreaseFlame,
    DecreaseFlame,
    // Light
    SetBrightness,
    IncreaseBrightness,
    DecreaseBrightness,
    TurnLightOn,
    TurnLightOff,
    ToggleLight,
    // Shades
    Open,
    Close,
    Stop,
    Hold,
    Preset,
    SetPosition,
    // Misc
    SetTimer,
}

impl Capability {
    /// Whether this action carries a numeric argument on the wire.
    pub fn takes_argument(self) -> bool {
        matches!(
            self,
            Self::SetSpeed
                | Self::SetFlame
                | Self::SetBrightness
                | Self::SetPosition
                | Self::SetDirection
                | Self::SetTimer
        )
    }
}

/// Map the bridge's raw action list onto the normalized capability set.
///
/// Deterministic, order-insensitive, and tolerant: unrecognized strings
/// are logged at debug and skipped, never an error.
pub fn capability_set(actions: &[String]) -> BTreeSet<Capability> {
    actions
        .iter()
        .filter_map(|raw| match Capability::from_str(raw) {
            Ok(cap) => Some(cap),
            Err(_) => {
                debug!(action = %raw, "skipping unrecognized action string");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raw(actions: &[&str]) -> Vec<String> {
        actions.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn wire_names_round_trip() {
        assert_eq!(Capability::from_str("SetSpeed").unwrap(), Capability::SetSpeed);
        assert_eq!(Capability::SetSpeed.to_string(), "SetSpeed");
        assert_eq!(Capability::ToggleLight.to_string(), "ToggleLight");
    }

    #[test]
    fn unknown_actions_are_skipped() {
        let set = capability_set(&raw(&["TurnOn", "BreezeOn", "TurnOff", "StartDimmer"]));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Capability::TurnOn));
        assert!(set.contains(&Capability::TurnOff));
    }

    #[test]
    fn duplicates_collapse() {
        let set = capability_set(&raw(&["TurnOn", "TurnOn"]));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn argument_actions() {
        assert!(Capability::SetSpeed.takes_argument());
        assert!(Capability::SetFlame.takes_argument());
        assert!(!Capability::TurnOn.takes_argument());
        assert!(!Capability::ToggleLight.takes_argument());
    }
}
