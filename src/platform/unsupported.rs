//! Placeholder provider for hosts without disk instrumentation support

use super::{DiskEventProvider, DiskQueryProvider, EventSink, Subscription};
use crate::models::{AttributeBag, DeviceReference, DiskEventKind, DiskHandle};
use crate::{DiskWatchError, Result};
use std::time::Duration;

/// Uninhabited: [`connect`] never yields one.
#[derive(Debug)]
pub enum UnsupportedProvider {}

pub fn connect() -> Result<UnsupportedProvider> {
    Err(DiskWatchError::ProviderUnavailable(format!(
        "disk event instrumentation is not available on {}",
        std::env::consts::OS
    )))
}

impl DiskQueryProvider for UnsupportedProvider {
    fn bind_disk(&self, _reference: &DeviceReference) -> Result<DiskHandle> {
        match *self {}
    }

    fn structured_disk(&self, _index: u32) -> Result<Option<AttributeBag>> {
        match *self {}
    }

    fn physical_media(&self, _tag: &str) -> Result<Option<AttributeBag>> {
        match *self {}
    }

    fn pnp_entity(&self, _pnp_device_id: &str) -> Result<Option<AttributeBag>> {
        match *self {}
    }

    fn partitions(&self, _disk: &DiskHandle) -> Result<Vec<AttributeBag>> {
        match *self {}
    }

    fn logical_disks(&self, _partition_id: &str) -> Result<Vec<AttributeBag>> {
        match *self {}
    }

    fn volume_by_mount(&self, _mount: &str) -> Result<Option<AttributeBag>> {
        match *self {}
    }
}

impl DiskEventProvider for UnsupportedProvider {
    fn subscribe(
        &self,
        _kind: DiskEventKind,
        _sampling: Duration,
        _sink: EventSink,
    ) -> Result<Subscription> {
        match *self {}
    }
}
