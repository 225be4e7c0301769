// ── Device registry ──
//
// Discovery orchestration and capability normalization. The whole
// snapshot is swapped atomically on refresh; a failed discovery pass
// leaves the previous snapshot untouched, so readers never observe a
// half-replaced registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use bondlink_api::{HubClient, RawDeviceRecord};

use crate::error::CoreError;
use crate::model::{Capability, DeviceDescriptor};

type Snapshot = HashMap<String, Arc<DeviceDescriptor>>;

/// Lock-free registry of discovered devices, keyed by bridge-assigned
/// device id.
pub struct DeviceRegistry {
    client: Arc<HubClient>,
    snapshot: ArcSwap<Snapshot>,
}

impl DeviceRegistry {
    pub fn new(client: Arc<HubClient>) -> Self {
        Self {
            client,
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    /// Seed the registry from persisted device records so entities are
    /// available before the first discovery pass completes.
    pub fn seed(&self, records: Vec<RawDeviceRecord>) {
        if records.is_empty() {
            return;
        }
        let map = build_snapshot(records);
        debug!(device_count = map.len(), "registry seeded from persisted records");
        self.snapshot.store(Arc::new(map));
    }

    /// Run a discovery pass and replace the snapshot atomically.
    ///
    /// Never partially succeeds: any failure from the client propagates
    /// and the prior snapshot is retained.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let records = self.client.list_devices().await?;
        let map = build_snapshot(records);
        info!(device_count = map.len(), "registry refreshed");
        self.snapshot.store(Arc::new(map));
        Ok(())
    }

    /// Look up one descriptor.
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceDescriptor>> {
        self.snapshot.load().get(device_id).cloned()
    }

    /// The capability set for a device. Absence is a valid query
    /// result: unknown ids get an empty set, never an error.
    pub fn capabilities_of(&self, device_id: &str) -> BTreeSet<Capability> {
        self.snapshot
            .load()
            .get(device_id)
            .map(|d| d.capabilities.clone())
            .unwrap_or_default()
    }

    /// All currently known device ids.
    pub fn device_ids(&self) -> Vec<String> {
        self.snapshot.load().keys().cloned().collect()
    }

    /// The current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

fn build_snapshot(records: Vec<RawDeviceRecord>) -> Snapshot {
    records
        .into_iter()
        .map(|raw| {
            let descriptor = DeviceDescriptor::from(raw);
            (descriptor.id.clone(), Arc::new(descriptor))
        })
        .collect()
}
