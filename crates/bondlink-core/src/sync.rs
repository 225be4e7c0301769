// ── State synchronizer ──
//
// The liveness mechanism of the integration: a cancellable poll loop
// that keeps a per-device state cache fresh, publishes field-wise
// deltas, and escalates when the whole bridge stops answering.
//
// Per-device failures are isolated -- one unhealthy device marks its
// own entry stale and never aborts the cycle for the rest. Cache
// entries are mutated through `DashMap` entries, so the effect of a
// poll and a dispatch on one device never interleaves partially.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bondlink_api::HubClient;

use crate::config::HubConfig;
use crate::model::{Capability, DeviceState, PowerState};
use crate::registry::DeviceRegistry;

const UPDATE_CHANNEL_SIZE: usize = 256;

/// Bridge-level liveness, distinct from per-device staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubHealth {
    Ok,
    /// Every known device failed to poll for this many consecutive
    /// cycles; the owning process should consider re-authenticating.
    Unreachable { consecutive_cycles: u32 },
}

/// One state-change notification.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub device_id: String,
    pub state: DeviceState,
}

/// Owns the device state cache and the polling that feeds it.
pub struct StateSynchronizer {
    client: Arc<HubClient>,
    registry: Arc<DeviceRegistry>,
    cache: DashMap<String, DeviceState>,
    updates: broadcast::Sender<StateUpdate>,
    health: watch::Sender<HubHealth>,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    staleness_threshold: chrono::Duration,
}

impl StateSynchronizer {
    pub fn new(client: Arc<HubClient>, registry: Arc<DeviceRegistry>, config: &HubConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let (health, _) = watch::channel(HubHealth::Ok);
        Self {
            client,
            registry,
            cache: DashMap::new(),
            updates,
            health,
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: config.failure_threshold,
            staleness_threshold: chrono::Duration::from_std(config.staleness_threshold())
                .unwrap_or_else(|_| chrono::Duration::seconds(120)),
        }
    }

    // ── Query surface ────────────────────────────────────────────────

    /// The current cached state for a device.
    ///
    /// Devices never successfully polled get an Unknown placeholder;
    /// cached values older than the staleness threshold degrade to
    /// Unknown power while retaining the last-known level for display.
    pub fn current_state(&self, device_id: &str) -> DeviceState {
        match self.cache.get(device_id) {
            Some(entry) => {
                if Utc::now() - entry.last_observed_at > self.staleness_threshold {
                    entry.as_aged()
                } else {
                    entry.clone()
                }
            }
            None => DeviceState::unknown(device_id),
        }
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.updates.subscribe()
    }

    /// Subscribe to bridge-level liveness.
    pub fn subscribe_health(&self) -> watch::Receiver<HubHealth> {
        self.health.subscribe()
    }

    // ── Poll loop ────────────────────────────────────────────────────

    /// Repeating poll loop. The first cycle runs immediately; the loop
    /// stops when `cancel` fires, leaving the cache intact.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_cycle().await;
                }
            }
        }
        debug!("poll loop stopped");
    }

    /// One poll cycle over every device the registry knows.
    pub async fn poll_cycle(&self) {
        let ids = self.registry.device_ids();
        if ids.is_empty() {
            return;
        }

        let polls = ids.iter().map(|id| async {
            let result = self.client.get_device_state(id).await;
            (id.as_str(), result)
        });
        let results = futures_util::future::join_all(polls).await;

        let mut any_success = false;
        for (id, result) in results {
            match result {
                Ok(raw) => {
                    any_success = true;
                    // The device may have been dropped by a concurrent
                    // refresh; its cache entry goes with it.
                    let Some(descriptor) = self.registry.get(id) else {
                        self.cache.remove(id);
                        continue;
                    };
                    let state = DeviceState::from_raw(id, &raw, descriptor.device_type);
                    self.store_and_publish(id, state);
                }
                Err(e) => {
                    warn!(device_id = id, error = %e, "device poll failed, marking stale");
                    self.cache
                        .entry(id.to_owned())
                        .and_modify(|s| s.stale = true)
                        .or_insert_with(|| DeviceState::unknown(id));
                }
            }
        }

        if any_success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.health.send_if_modified(|h| {
                let changed = *h != HubHealth::Ok;
                *h = HubHealth::Ok;
                changed
            });
        } else {
            let cycles = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if cycles >= self.failure_threshold {
                warn!(consecutive_cycles = cycles, "every device failed to poll -- bridge unreachable");
                // send_replace: the escalation must be recorded even if
                // no health subscriber exists yet.
                self.health.send_replace(HubHealth::Unreachable {
                    consecutive_cycles: cycles,
                });
            }
        }
    }

    // ── Optimistic updates ───────────────────────────────────────────

    /// Fold the expected effect of an acknowledged command into the
    /// cache so consumers see it immediately; the next real poll for
    /// the device always supersedes it.
    ///
    /// Called by the dispatcher only after `send_action` was
    /// acknowledged, which gives the required ordering: the optimistic
    /// write happens-after the ack and happens-before the next poll's
    /// write for that device.
    pub fn apply_optimistic(&self, device_id: &str, capability: Capability, argument: Option<i64>) {
        let mut entry = self
            .cache
            .entry(device_id.to_owned())
            .or_insert_with(|| DeviceState::unknown(device_id));

        match capability {
            Capability::TurnOn => entry.power = PowerState::On,
            Capability::TurnOff => entry.power = PowerState::Off,
            Capability::TogglePower => {
                entry.power = match entry.power {
                    PowerState::On => PowerState::Off,
                    // Unknown assumed off before the toggle.
                    PowerState::Off | PowerState::Unknown => PowerState::On,
                };
            }
            Capability::SetSpeed | Capability::SetFlame | Capability::SetBrightness => {
                if let Some(level) = argument.and_then(|v| u32::try_from(v).ok()) {
                    entry.level = Some(level);
                }
                entry.power = PowerState::On;
            }
            Capability::SetPosition => {
                if let Some(level) = argument.and_then(|v| u32::try_from(v).ok()) {
                    entry.level = Some(level);
                }
            }
            Capability::Open => entry.level = Some(100),
            Capability::Close => entry.level = Some(0),
            Capability::TurnLightOn => entry.light_on = Some(true),
            Capability::TurnLightOff => entry.light_on = Some(false),
            Capability::ToggleLight => {
                entry.light_on = Some(!entry.light_on.unwrap_or(false));
            }
            // Relative steps and direction/timer changes have no
            // reliable cached projection; the next poll reports them.
            Capability::IncreaseSpeed
            | Capability::DecreaseSpeed
            | Capability::IncreaseFlame
            | Capability::DecreaseFlame
            | Capability::IncreaseBrightness
            | Capability::DecreaseBrightness
            | Capability::SetDirection
            | Capability::ToggleDirection
            | Capability::SetTimer
            | Capability::Stop
            | Capability::Hold
            | Capability::Preset => {}
        }

        entry.last_observed_at = Utc::now();
        entry.stale = false;
        let state = entry.clone();
        drop(entry);

        let _ = self.updates.send(StateUpdate {
            device_id: device_id.to_owned(),
            state,
        });
    }

    fn store_and_publish(&self, device_id: &str, state: DeviceState) {
        let changed = {
            let mut entry = self
                .cache
                .entry(device_id.to_owned())
                .or_insert_with(|| DeviceState::unknown(device_id));
            let changed = state.differs_from(&entry);
            *entry = state.clone();
            changed
        };

        if changed {
            debug!(device_id, "device state changed");
            let _ = self.updates.send(StateUpdate {
                device_id: device_id.to_owned(),
                state,
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bondlink_api::{RawDeviceRecord, Session, TransportConfig};
    use url::Url;

    fn synchronizer() -> StateSynchronizer {
        let host = Url::parse("http://127.0.0.1:9").unwrap();
        let client = Arc::new(
            HubClient::new(Session::new(host.clone()), &TransportConfig::default()).unwrap(),
        );
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&client)));
        registry.seed(vec![RawDeviceRecord {
            id: "dev-1".into(),
            name: "Den Fan".into(),
            type_code: "CF".into(),
            actions: vec!["TurnOn".into(), "TurnOff".into(), "SetSpeed".into()],
            location: None,
        }]);
        StateSynchronizer::new(client, registry, &HubConfig::new(host))
    }

    #[test]
    fn never_polled_device_is_unknown() {
        let sync = synchronizer();
        let state = sync.current_state("dev-1");
        assert_eq!(state.power, PowerState::Unknown);
        assert!(state.stale);
    }

    #[test]
    fn optimistic_set_speed_lands_immediately() {
        let sync = synchronizer();
        sync.apply_optimistic("dev-1", Capability::SetSpeed, Some(3));

        let state = sync.current_state("dev-1");
        assert_eq!(state.level, Some(3));
        assert_eq!(state.power, PowerState::On);
        assert!(!state.stale);
    }

    #[test]
    fn optimistic_toggle_light_flips() {
        let sync = synchronizer();
        sync.apply_optimistic("dev-1", Capability::ToggleLight, None);
        assert_eq!(sync.current_state("dev-1").light_on, Some(true));

        sync.apply_optimistic("dev-1", Capability::ToggleLight, None);
        assert_eq!(sync.current_state("dev-1").light_on, Some(false));
    }

    #[test]
    fn optimistic_update_notifies_subscribers() {
        let sync = synchronizer();
        let mut rx = sync.subscribe();

        sync.apply_optimistic("dev-1", Capability::TurnOn, None);

        let update = rx.try_recv().unwrap();
        assert_eq!(update.device_id, "dev-1");
        assert_eq!(update.state.power, PowerState::On);
    }

    #[test]
    fn relative_steps_do_not_guess_a_level() {
        let sync = synchronizer();
        sync.apply_optimistic("dev-1", Capability::SetSpeed, Some(2));
        sync.apply_optimistic("dev-1", Capability::IncreaseSpeed, None);

        // Level untouched until the next poll reports the real value.
        assert_eq!(sync.current_state("dev-1").level, Some(2));
    }
}
