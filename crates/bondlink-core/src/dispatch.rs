// ── Command dispatcher ──
//
// Validates, throttles, and serializes outbound commands so rapid-fire
// input never overwhelms the bridge. Throttle table and in-flight
// guards are partitioned by device id; commands to different devices
// never contend.
//
// Rejected-for-throttle requests are not silently queued: the caller
// gets `RateLimited` immediately. The dispatcher does keep the single
// most recent rejected request per device in a pending slot
// (last writer wins, superseded requests are discarded) and a drain
// loop delivers it once the device's throttle window opens.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bondlink_api::HubClient;

use crate::config::HubConfig;
use crate::error::CoreError;
use crate::model::Capability;
use crate::registry::DeviceRegistry;
use crate::sync::StateSynchronizer;

/// One normalized command from the host-facing layer. Ephemeral: lives
/// only for the duration of dispatch (or one pending-slot residency).
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub device_id: String,
    pub capability: Capability,
    pub argument: Option<i64>,
    pub submitted_at: Instant,
}

impl CommandRequest {
    pub fn new(device_id: impl Into<String>, capability: Capability, argument: Option<i64>) -> Self {
        Self {
            device_id: device_id.into(),
            capability,
            argument,
            submitted_at: Instant::now(),
        }
    }
}

/// Validating, throttling front door for all outbound commands.
pub struct CommandDispatcher {
    client: Arc<HubClient>,
    registry: Arc<DeviceRegistry>,
    sync: Arc<StateSynchronizer>,
    min_interval: Duration,
    /// Last dispatch instant per device.
    throttle: DashMap<String, Instant>,
    /// Devices with a command currently on the wire.
    in_flight: DashMap<String, ()>,
    /// Single coalescing slot per device for rate-limited requests.
    pending: DashMap<String, CommandRequest>,
}

impl CommandDispatcher {
    pub fn new(
        client: Arc<HubClient>,
        registry: Arc<DeviceRegistry>,
        sync: Arc<StateSynchronizer>,
        config: &HubConfig,
    ) -> Self {
        Self {
            client,
            registry,
            sync,
            min_interval: config.min_command_interval(),
            throttle: DashMap::new(),
            in_flight: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Validate, throttle, and deliver one command.
    ///
    /// Validation failures (`UnsupportedAction`) never reach the
    /// bridge. Throttle rejections park the request in the device's
    /// pending slot, superseding any earlier parked request.
    pub async fn submit(&self, request: CommandRequest) -> Result<(), CoreError> {
        if !self
            .registry
            .capabilities_of(&request.device_id)
            .contains(&request.capability)
        {
            return Err(CoreError::UnsupportedAction {
                device_id: request.device_id,
                action: request.capability,
            });
        }

        match self.try_dispatch(request.clone()).await {
            Err(CoreError::RateLimited { retry_after }) => {
                debug!(
                    device_id = %request.device_id,
                    action = %request.capability,
                    ?retry_after,
                    "rate limited -- coalescing into pending slot"
                );
                // Last writer wins; an older parked request is discarded.
                self.pending.insert(request.device_id.clone(), request);
                Err(CoreError::RateLimited { retry_after })
            }
            other => other,
        }
    }

    /// Number of requests currently parked in pending slots.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Run the pending-slot drain until cancelled.
    pub async fn run_drain(self: Arc<Self>, cancel: CancellationToken) {
        let tick = (self.min_interval / 4).max(Duration::from_millis(25));
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(tick) => {
                    self.drain_pending().await;
                }
            }
        }
        debug!("dispatch drain stopped");
    }

    /// Deliver every parked request whose throttle window has opened.
    /// Returns how many were dispatched successfully.
    pub async fn drain_pending(&self) -> usize {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| self.window_remaining(entry.key()).is_none())
            .map(|entry| entry.key().clone())
            .collect();

        let mut dispatched = 0;
        for device_id in due {
            let Some((_, request)) = self.pending.remove(&device_id) else {
                continue;
            };

            // Capabilities may have changed since the request was parked.
            if !self
                .registry
                .capabilities_of(&request.device_id)
                .contains(&request.capability)
            {
                debug!(device_id = %request.device_id, "dropping parked request for vanished capability");
                continue;
            }

            match self.try_dispatch(request.clone()).await {
                Ok(()) => dispatched += 1,
                Err(e) if e.is_throttle() => {
                    // Lost a race with a direct submit; re-park unless a
                    // newer request already claimed the slot.
                    self.pending.entry(device_id).or_insert(request);
                }
                Err(e) => {
                    warn!(
                        device_id = %request.device_id,
                        action = %request.capability,
                        error = %e,
                        "parked request failed"
                    );
                }
            }
        }
        dispatched
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Time left in the device's throttle window, if it is closed.
    fn window_remaining(&self, device_id: &str) -> Option<Duration> {
        let last = self.throttle.get(device_id).map(|entry| *entry)?;
        let elapsed = last.elapsed();
        (elapsed < self.min_interval).then(|| self.min_interval - elapsed)
    }

    /// Throttle check, in-flight serialization, and wire delivery.
    /// Assumes the capability was already validated.
    async fn try_dispatch(&self, request: CommandRequest) -> Result<(), CoreError> {
        if let Some(retry_after) = self.window_remaining(&request.device_id) {
            return Err(CoreError::RateLimited { retry_after });
        }

        if self
            .in_flight
            .insert(request.device_id.clone(), ())
            .is_some()
        {
            return Err(CoreError::Busy {
                device_id: request.device_id,
            });
        }
        let guard = InFlightGuard {
            map: &self.in_flight,
            device_id: &request.device_id,
        };

        let action = request.capability.to_string();
        let result = self
            .client
            .send_action(&request.device_id, &action, request.argument)
            .await;
        drop(guard);

        match result {
            Ok(()) => {
                self.throttle
                    .insert(request.device_id.clone(), Instant::now());
                self.sync
                    .apply_optimistic(&request.device_id, request.capability, request.argument);
                debug!(
                    device_id = %request.device_id,
                    action = %request.capability,
                    queued_for = ?request.submitted_at.elapsed(),
                    "command dispatched"
                );
                Ok(())
            }
            Err(e) => Err(CoreError::Hub(e)),
        }
    }
}

/// Clears the in-flight marker on every exit path, so cancellation or
/// an error can never leave a device permanently busy.
struct InFlightGuard<'a> {
    map: &'a DashMap<String, ()>,
    device_id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(self.device_id);
    }
}
