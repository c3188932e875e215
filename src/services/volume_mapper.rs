//! Volume mapper and mount poller
//! Walks disk → partition → logical volume and resolves per-volume metadata

use super::field_resolver::{resolve_field, SourceField};
use crate::models::{AttributeBag, DiskHandle, VolumeMode, VolumeRecord};
use crate::platform::DiskQueryProvider;
use crate::utils::query::parse_u64;
use crate::utils::{clean_text, mount_token};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Discover the volumes currently mounted from `disk`.
///
/// A failing partition is skipped; an empty result is valid. Discovery order is
/// whatever the provider returns.
pub fn map_volumes<P>(provider: &P, disk: &DiskHandle, mode: VolumeMode) -> Vec<VolumeRecord>
where
    P: DiskQueryProvider + ?Sized,
{
    let partitions = match provider.partitions(disk) {
        Ok(partitions) => partitions,
        Err(e) => {
            debug!("Partition walk for {} failed: {}", disk.device_id, e);
            return Vec::new();
        }
    };

    let mut volumes = Vec::new();
    for partition in &partitions {
        let partition_id = partition.get("DeviceID").map(clean_text).unwrap_or_default();
        if partition_id.is_empty() {
            continue;
        }
        let logical_disks = match provider.logical_disks(partition_id) {
            Ok(found) => found,
            Err(e) => {
                debug!("Skipping partition {}: {}", partition_id, e);
                continue;
            }
        };

        for logical in &logical_disks {
            let Some(volume) = resolve_volume(provider, logical) else {
                continue;
            };
            volumes.push(volume);
            if mode == VolumeMode::First {
                return volumes;
            }
        }
    }
    volumes
}

fn resolve_volume<P>(provider: &P, logical: &AttributeBag) -> Option<VolumeRecord>
where
    P: DiskQueryProvider + ?Sized,
{
    let mount = logical.get("DeviceID").map(mount_token).unwrap_or_default();
    if mount.is_empty() {
        return None;
    }

    // Volume-level metadata is fresher than the logical disk's own copy.
    let volume = provider.volume_by_mount(mount).unwrap_or_else(|e| {
        debug!("Volume lookup for {} failed: {}", mount, e);
        None
    });

    let pick = |name: &str, volume_key: &str, logical_key: &str| {
        let mut chain = Vec::with_capacity(2);
        if let Some(volume) = volume.as_ref() {
            chain.push(SourceField { source: volume, field: volume_key });
        }
        chain.push(SourceField { source: logical, field: logical_key });
        resolve_field(name, &chain)
    };

    Some(VolumeRecord {
        mount_point: mount.to_string(),
        volume_name: pick("volumeName", "Label", "VolumeName"),
        file_system: pick("fileSystem", "FileSystem", "FileSystem"),
        free_space_in_bytes: parse_u64(&pick("freeSpaceInBytes", "FreeSpace", "FreeSpace"))
            .unwrap_or(0),
    })
}

/// Re-run [`map_volumes`] until it finds something or `ceiling` elapses.
///
/// Mount assignment lags device creation, so attach events go through here. One
/// final attempt is made at the ceiling before giving up.
pub async fn poll_for_mount<P>(
    provider: &P,
    disk: &DiskHandle,
    mode: VolumeMode,
    ceiling: Duration,
    interval: Duration,
) -> Vec<VolumeRecord>
where
    P: DiskQueryProvider + ?Sized,
{
    let deadline = Instant::now() + ceiling;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let volumes = map_volumes(provider, disk, mode);
        if !volumes.is_empty() {
            debug!("{} mounted after {} attempt(s)", disk.device_id, attempts);
            return volumes;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }

    info!(
        "No volume appeared on {} within {:?} ({} attempts)",
        disk.device_id, ceiling, attempts
    );
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeProvider;
    use std::sync::atomic::Ordering;

    const DISK: &str = r"\\.\PHYSICALDRIVE2";

    fn handle() -> DiskHandle {
        DiskHandle::from_legacy(DISK, AttributeBag::new("Win32_DiskDrive").with("DeviceID", DISK))
    }

    fn logical(mount: &str, name: &str, fs: &str, free: u64) -> AttributeBag {
        AttributeBag::new("Win32_LogicalDisk")
            .with("DeviceID", mount)
            .with("VolumeName", name)
            .with("FileSystem", fs)
            .with("FreeSpace", free.to_string())
    }

    fn two_partition_provider() -> FakeProvider {
        FakeProvider::new()
            .with_partition(DISK, "Disk #2, Partition #0", vec![logical("E:", "BOOT", "FAT32", 100)])
            .with_partition(DISK, "Disk #2, Partition #1", vec![logical("F:", "DATA", "NTFS", 200)])
    }

    #[test]
    fn collects_every_volume_in_all_mode() {
        let volumes = map_volumes(&two_partition_provider(), &handle(), VolumeMode::All);
        let mounts: Vec<_> = volumes.iter().map(|v| v.mount_point.as_str()).collect();
        assert_eq!(mounts, ["E:", "F:"]);
        assert_eq!(volumes[1].file_system, "NTFS");
        assert_eq!(volumes[1].free_space_in_bytes, 200);
    }

    #[test]
    fn first_mode_stops_at_first_hit() {
        let volumes = map_volumes(&two_partition_provider(), &handle(), VolumeMode::First);
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].mount_point, "E:");
    }

    #[test]
    fn volume_query_beats_logical_disk_attributes() {
        let provider = two_partition_provider().with_volume(
            "E:",
            AttributeBag::new("Win32_Volume")
                .with("Label", "  EFI ")
                .with("FileSystem", "")
                .with("FreeSpace", "4096"),
        );
        let volumes = map_volumes(&provider, &handle(), VolumeMode::First);
        assert_eq!(volumes[0].volume_name, "EFI");
        assert_eq!(volumes[0].file_system, "FAT32");
        assert_eq!(volumes[0].free_space_in_bytes, 4096);
    }

    #[test]
    fn failing_partition_is_skipped() {
        let provider = two_partition_provider().failing("logical:Disk #2, Partition #0");
        let volumes = map_volumes(&provider, &handle(), VolumeMode::All);
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].mount_point, "F:");
    }

    #[test]
    fn failing_volume_lookup_keeps_logical_attributes() {
        let provider = two_partition_provider().failing("volume");
        let volumes = map_volumes(&provider, &handle(), VolumeMode::First);
        assert_eq!(volumes[0].volume_name, "BOOT");
    }

    #[test]
    fn unformatted_disk_maps_to_nothing() {
        let provider = FakeProvider::new().with_partition(DISK, "Disk #2, Partition #0", vec![]);
        assert!(map_volumes(&provider, &handle(), VolumeMode::All).is_empty());
        assert!(map_volumes(&FakeProvider::new().failing("partitions"), &handle(), VolumeMode::All)
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_waits_for_late_mount() {
        let provider = two_partition_provider().mounts_after(Duration::from_millis(900));
        let started = Instant::now();
        let volumes = poll_for_mount(
            &provider,
            &handle(),
            VolumeMode::All,
            Duration::from_secs(4),
            Duration::from_millis(250),
        )
        .await;
        assert_eq!(volumes.len(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000) && elapsed < Duration::from_millis(1010));
        assert_eq!(provider.partition_queries.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_gives_up_exactly_at_ceiling() {
        let provider = FakeProvider::new();
        let started = Instant::now();
        let volumes = poll_for_mount(
            &provider,
            &handle(),
            VolumeMode::All,
            Duration::from_millis(1000),
            Duration::from_millis(300),
        )
        .await;
        assert!(volumes.is_empty());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000) && elapsed < Duration::from_millis(1010));
        // t = 0, 300, 600, 900, 1000
        assert_eq!(provider.partition_queries.load(Ordering::SeqCst), 5);
    }
}
