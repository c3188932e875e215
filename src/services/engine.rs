//! Event resolution engine
//! Waiting → Resolving → record, with timeout and provider failure as the other outcomes

use super::correlator::EventCorrelator;
use super::field_resolver::{disk_index_from_device_id, FieldResolver};
use super::volume_mapper::{map_volumes, poll_for_mount};
use crate::models::{
    DeviceObservation, DiskEventKind, DiskHandle, RawDiskEvent, ResolvedDiskRecord,
    VolumeRecord, WatchOptions, WatchPlan,
};
use crate::platform::{DiskEventProvider, DiskQueryProvider};
use crate::utils::cache::DevicePathCache;
use crate::{DiskWatchError, Result};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Turns one disk event into one [`ResolvedDiskRecord`].
///
/// Calls are independent: each owns its subscriptions. Only the device-path cache
/// is shared, and it is internally synchronized.
pub struct DiskEventEngine<P> {
    provider: P,
    path_cache: DevicePathCache,
}

impl<P> DiskEventEngine<P>
where
    P: DiskQueryProvider + DiskEventProvider,
{
    pub fn new(provider: P) -> Self {
        DiskEventEngine {
            provider,
            path_cache: DevicePathCache::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn path_cache(&self) -> &DevicePathCache {
        &self.path_cache
    }

    /// Wait for the next attach/detach and resolve it.
    ///
    /// Returns `Ok(None)` when the timeout elapses without an event. Options are
    /// validated before any subscription is opened.
    pub async fn next_event(&self, options: &WatchOptions) -> Result<Option<ResolvedDiskRecord>> {
        let plan = options.validate()?;
        let call_id = Uuid::new_v4();
        self.run(plan)
            .instrument(info_span!("disk_event", %call_id))
            .await
    }

    async fn run(&self, plan: WatchPlan) -> Result<Option<ResolvedDiskRecord>> {
        let correlator = EventCorrelator::new(&self.provider, plan.sampling_interval);
        let Some(event) = correlator.wait_for_event(plan.timeout).await? else {
            return Ok(None);
        };
        self.resolve(event, &plan).await.map(Some)
    }

    /// Resolving state: rebind, gather sources, map volumes, assemble.
    pub async fn resolve(&self, event: RawDiskEvent, plan: &WatchPlan) -> Result<ResolvedDiskRecord> {
        let handle = self
            .provider
            .bind_disk(&event.reference)
            .map_err(DiskWatchError::into_provider_failure)?;
        debug!("Bound {} ({})", handle.device_id, event.kind);

        let observation = self.observe(&handle);

        let volumes = match event.kind {
            DiskEventKind::Attached => {
                poll_for_mount(
                    &self.provider,
                    &handle,
                    plan.volume_mode,
                    plan.poll_ceiling,
                    plan.poll_interval,
                )
                .await
            }
            // The volume is usually gone already; waiting cannot bring it back.
            DiskEventKind::Detached => map_volumes(&self.provider, &handle, plan.volume_mode),
        };

        let record = assemble(event.kind, &observation, volumes);
        info!(
            "{} disk {} serial={:?} model={:?} mount={:?}",
            record.event_type,
            record.disk_number,
            record.serial_number,
            record.model,
            record.mount_point
        );
        Ok(record)
    }

    /// Gather every attribute source for the handle. Source failures degrade to `None`.
    fn observe(&self, handle: &DiskHandle) -> DeviceObservation {
        let device_path = if handle.pnp_device_id.is_empty() {
            self.path_cache.get(&handle.device_id).unwrap_or_default()
        } else {
            self.path_cache.remember(&handle.device_id, &handle.pnp_device_id);
            handle.pnp_device_id.clone()
        };

        let disk_index = handle
            .index
            .or_else(|| disk_index_from_device_id(&handle.device_id));

        let structured = disk_index.and_then(|index| {
            absorb("structured disk", self.provider.structured_disk(index))
        });
        let media = absorb("physical media", self.provider.physical_media(&handle.device_id));
        let pnp = if device_path.is_empty() {
            None
        } else {
            absorb("pnp entity", self.provider.pnp_entity(&device_path))
        };

        DeviceObservation {
            device_id: handle.device_id.clone(),
            device_path,
            disk_index,
            structured,
            legacy: Some(handle.legacy.clone()).filter(|bag| !bag.is_empty()),
            media,
            pnp,
        }
    }
}

/// A source miss is logged and treated as "no data".
fn absorb<T>(what: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(found) => found,
        Err(e) => {
            debug!("{} unavailable: {}", what, e);
            None
        }
    }
}

fn assemble(
    kind: DiskEventKind,
    observation: &DeviceObservation,
    volumes: Vec<VolumeRecord>,
) -> ResolvedDiskRecord {
    let fields = FieldResolver::new(observation);
    let primary = volumes.first().cloned().unwrap_or_default();

    ResolvedDiskRecord {
        event_type: kind,
        disk_number: fields.disk_number(),
        name: fields.name(),
        serial_number: fields.serial_number(),
        model: fields.model(),
        firmware_version: fields.firmware_version(),
        manufacturer: fields.manufacturer(),
        pnp_device_id: fields.pnp_device_id(),
        friendly_name: fields.friendly_name(),
        caption: fields.caption(),
        hardware_id: fields.hardware_id(),
        mount_point: primary.mount_point,
        volume_name: primary.volume_name,
        interface_type: fields.interface_type(),
        file_system: primary.file_system,
        size_in_bytes: fields.size_in_bytes(),
        free_space_in_bytes: primary.free_space_in_bytes,
        mount_points: volumes.iter().map(|v| v.mount_point.clone()).collect(),
        volume_names: volumes.iter().map(|v| v.volume_name.clone()).collect(),
        file_systems: volumes.iter().map(|v| v.file_system.clone()).collect(),
        free_spaces_in_bytes: volumes.iter().map(|v| v.free_space_in_bytes).collect(),
    }
}
