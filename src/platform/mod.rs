#[cfg(target_os = "windows")]
pub mod windows;
#[cfg(not(target_os = "windows"))]
pub mod unsupported;

#[cfg(test)]
pub mod fake;

use crate::models::{AttributeBag, DeviceReference, DiskEventKind, DiskHandle, RawDiskEvent};
use crate::{DiskWatchError, Result};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[cfg(target_os = "windows")]
pub type NativeProvider = windows::WmiDiskProvider;
#[cfg(not(target_os = "windows"))]
pub type NativeProvider = unsupported::UnsupportedProvider;

/// Open the instrumentation provider for the current OS.
pub fn connect() -> Result<NativeProvider> {
    #[cfg(target_os = "windows")]
    {
        windows::WmiDiskProvider::connect()
    }
    #[cfg(not(target_os = "windows"))]
    {
        unsupported::connect()
    }
}

/// Attribute and association queries against the disk instrumentation classes.
///
/// Individual query failures come back as [`DiskWatchError::QueryFailed`]; callers decide
/// whether a failure is absorbable.
pub trait DiskQueryProvider {
    /// Re-bind an event reference into a live handle.
    fn bind_disk(&self, reference: &DeviceReference) -> Result<DiskHandle>;
    /// Structured-source disk keyed by numeric index.
    fn structured_disk(&self, index: u32) -> Result<Option<AttributeBag>>;
    /// Physical media entry whose tag equals the disk device id.
    fn physical_media(&self, tag: &str) -> Result<Option<AttributeBag>>;
    /// Plug-and-play entity for a device-path token.
    fn pnp_entity(&self, pnp_device_id: &str) -> Result<Option<AttributeBag>>;
    /// Disk → partition association.
    fn partitions(&self, disk: &DiskHandle) -> Result<Vec<AttributeBag>>;
    /// Partition → logical volume association.
    fn logical_disks(&self, partition_id: &str) -> Result<Vec<AttributeBag>>;
    /// Volume-level metadata keyed by mount token.
    fn volume_by_mount(&self, mount: &str) -> Result<Option<AttributeBag>>;
}

/// Creation/deletion subscriptions scoped to the physical-disk class.
pub trait DiskEventProvider {
    fn subscribe(
        &self,
        kind: DiskEventKind,
        sampling: Duration,
        sink: EventSink,
    ) -> Result<Subscription>;
}

pub type SinkMessage = std::result::Result<RawDiskEvent, DiskWatchError>;

/// Sending half of the correlator's single wake-up primitive.
///
/// The channel holds one message; anything fired after it is full is dropped,
/// so only the first event per wait is observed.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl EventSink {
    pub fn channel() -> (EventSink, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(1);
        (EventSink { tx }, rx)
    }

    /// Deliver an event; returns false if another event already won.
    pub fn fire(&self, kind: DiskEventKind, reference: DeviceReference) -> bool {
        let token = reference.token.clone();
        match self.tx.try_send(Ok(RawDiskEvent { kind, reference })) {
            Ok(()) => true,
            Err(_) => {
                debug!("Dropping {} event for {}: wait already satisfied", kind, token);
                false
            }
        }
    }

    /// Report that a listener failed after it started.
    pub fn fail(&self, err: DiskWatchError) {
        let _ = self.tx.try_send(Err(err.into_provider_failure()));
    }
}

/// Time a listener gets to open its notification query, on top of one sampling interval.
pub const LISTENER_START_SLACK: Duration = Duration::from_secs(5);

/// Block until a listener thread reports whether its notification query is live.
/// Silence past `limit` or an exit without a report means the provider is unavailable.
pub fn await_listener_start(ready: &Receiver<Result<()>>, limit: Duration) -> Result<()> {
    match ready.recv_timeout(limit) {
        Ok(started) => started,
        Err(RecvTimeoutError::Timeout) => Err(DiskWatchError::ProviderUnavailable(format!(
            "listener did not subscribe within {} ms",
            limit.as_millis()
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(DiskWatchError::ProviderUnavailable(
            "listener exited before subscribing".to_string(),
        )),
    }
}

/// Live subscription. Dropping it unsubscribes and stops the listener.
pub struct Subscription {
    kind: DiskEventKind,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(kind: DiskEventKind, stop: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            kind,
            stop: Some(Box::new(stop)),
        }
    }

    pub fn kind(&self) -> DiskEventKind {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
            debug!("{} subscription torn down", self.kind);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.stop.is_some())
            .finish()
    }
}
