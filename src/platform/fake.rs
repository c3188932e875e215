//! Scripted in-memory provider used by the engine tests

use super::{DiskEventProvider, DiskQueryProvider, EventSink, Subscription};
use crate::models::{AttributeBag, DeviceReference, DiskEventKind, DiskHandle};
use crate::{DiskWatchError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// What one subscription does once opened.
#[derive(Debug, Clone)]
pub enum Script {
    Fire(Duration, DeviceReference),
    Fail(Duration),
}

#[derive(Default)]
pub struct FakeProvider {
    disks: HashMap<String, AttributeBag>,
    structured: HashMap<u32, AttributeBag>,
    media: HashMap<String, AttributeBag>,
    pnp: HashMap<String, AttributeBag>,
    partitions: HashMap<String, Vec<AttributeBag>>,
    logical: HashMap<String, Vec<AttributeBag>>,
    volumes: HashMap<String, AttributeBag>,
    failing: HashSet<String>,
    mounts_ready_at: Option<Instant>,
    refuse_subscribe: Option<DiskEventKind>,
    scripts: Mutex<HashMap<DiskEventKind, VecDeque<Script>>>,
    pub partition_queries: AtomicUsize,
    pub subscriptions_opened: AtomicUsize,
    pub active_subscriptions: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disk(mut self, legacy: AttributeBag) -> Self {
        let id = legacy.get("DeviceID").unwrap_or_default().to_string();
        self.disks.insert(id, legacy);
        self
    }

    pub fn with_structured(mut self, index: u32, bag: AttributeBag) -> Self {
        self.structured.insert(index, bag);
        self
    }

    pub fn with_media(mut self, tag: &str, bag: AttributeBag) -> Self {
        self.media.insert(tag.to_string(), bag);
        self
    }

    pub fn with_pnp(mut self, pnp_device_id: &str, bag: AttributeBag) -> Self {
        self.pnp.insert(pnp_device_id.to_string(), bag);
        self
    }

    /// Attach one partition with the given logical volumes to a disk.
    pub fn with_partition(mut self, disk_id: &str, partition_id: &str, logical: Vec<AttributeBag>) -> Self {
        self.partitions
            .entry(disk_id.to_string())
            .or_default()
            .push(AttributeBag::new("Win32_DiskPartition").with("DeviceID", partition_id));
        self.logical.insert(partition_id.to_string(), logical);
        self
    }

    pub fn with_volume(mut self, mount: &str, bag: AttributeBag) -> Self {
        self.volumes.insert(mount.to_string(), bag);
        self
    }

    /// Make a named query fail ("bind", "structured", "media", "pnp", "partitions",
    /// "logical:<partition id>", "volume").
    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    /// Partitions stay invisible until `delay` after construction.
    pub fn mounts_after(mut self, delay: Duration) -> Self {
        self.mounts_ready_at = Some(Instant::now() + delay);
        self
    }

    pub fn refuse_subscribe(mut self, kind: DiskEventKind) -> Self {
        self.refuse_subscribe = Some(kind);
        self
    }

    /// Queue a script for the next subscription of `kind`.
    pub fn script(self, kind: DiskEventKind, script: Script) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(kind).or_default().push_back(script);
        }
        self
    }

    fn check(&self, query: &str) -> Result<()> {
        if self.failing.contains(query) {
            return Err(DiskWatchError::QueryFailed(format!("{query} (injected)")));
        }
        Ok(())
    }
}

impl DiskQueryProvider for FakeProvider {
    fn bind_disk(&self, reference: &DeviceReference) -> Result<DiskHandle> {
        self.check("bind")?;
        let legacy = self
            .disks
            .get(&reference.token)
            .cloned()
            .unwrap_or_else(|| reference.snapshot.clone());
        Ok(DiskHandle::from_legacy(&reference.token, legacy))
    }

    fn structured_disk(&self, index: u32) -> Result<Option<AttributeBag>> {
        self.check("structured")?;
        Ok(self.structured.get(&index).cloned())
    }

    fn physical_media(&self, tag: &str) -> Result<Option<AttributeBag>> {
        self.check("media")?;
        Ok(self.media.get(tag).cloned())
    }

    fn pnp_entity(&self, pnp_device_id: &str) -> Result<Option<AttributeBag>> {
        self.check("pnp")?;
        Ok(self.pnp.get(pnp_device_id).cloned())
    }

    fn partitions(&self, disk: &DiskHandle) -> Result<Vec<AttributeBag>> {
        self.partition_queries.fetch_add(1, Ordering::SeqCst);
        self.check("partitions")?;
        if let Some(ready) = self.mounts_ready_at {
            if Instant::now() < ready {
                return Ok(Vec::new());
            }
        }
        Ok(self.partitions.get(&disk.device_id).cloned().unwrap_or_default())
    }

    fn logical_disks(&self, partition_id: &str) -> Result<Vec<AttributeBag>> {
        self.check(&format!("logical:{partition_id}"))?;
        Ok(self.logical.get(partition_id).cloned().unwrap_or_default())
    }

    fn volume_by_mount(&self, mount: &str) -> Result<Option<AttributeBag>> {
        self.check("volume")?;
        Ok(self.volumes.get(mount).cloned())
    }
}

impl DiskEventProvider for FakeProvider {
    fn subscribe(
        &self,
        kind: DiskEventKind,
        _sampling: Duration,
        sink: EventSink,
    ) -> Result<Subscription> {
        if self.refuse_subscribe == Some(kind) {
            return Err(DiskWatchError::ProviderUnavailable(format!(
                "{kind} subscription refused"
            )));
        }

        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(&kind).and_then(VecDeque::pop_front));
        let task = tokio::spawn(async move {
            match script {
                Some(Script::Fire(delay, reference)) => {
                    tokio::time::sleep(delay).await;
                    sink.fire(kind, reference);
                }
                Some(Script::Fail(delay)) => {
                    tokio::time::sleep(delay).await;
                    sink.fail(DiskWatchError::QueryFailed("listener crashed".into()));
                }
                None => {}
            }
            // Hold the sink open like a live listener until torn down.
            std::future::pending::<()>().await;
        });

        self.subscriptions_opened.fetch_add(1, Ordering::SeqCst);
        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active_subscriptions);
        Ok(Subscription::new(kind, move || {
            task.abort();
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}
