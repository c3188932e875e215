//! WMI-backed disk provider
//! Legacy source: ROOT\CIMV2 Win32_* classes. Structured source: MSFT_Disk in the storage namespace.

use super::{
    await_listener_start, DiskEventProvider, DiskQueryProvider, EventSink, Subscription,
    LISTENER_START_SLACK,
};
use crate::models::{AttributeBag, DeviceReference, DiskEventKind, DiskHandle};
use crate::utils::{clean_text, escape_wql, mount_token};
use crate::{DiskWatchError, Result};
use ::windows::core::HSTRING;
use ::windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use wmi::{COMLibrary, Variant, WMIConnection};

const CIMV2_NAMESPACE: &str = "ROOT\\CIMV2";
const STORAGE_NAMESPACE: &str = "ROOT\\Microsoft\\Windows\\Storage";

pub struct WmiDiskProvider {
    cimv2: WMIConnection,
    /// Missing on systems without the storage management provider
    storage: Option<WMIConnection>,
}

impl WmiDiskProvider {
    pub fn connect() -> Result<Self> {
        let com = COMLibrary::new().map_err(unavailable)?;
        let cimv2 =
            WMIConnection::with_namespace_path(CIMV2_NAMESPACE, com.into()).map_err(unavailable)?;
        let storage = match WMIConnection::with_namespace_path(STORAGE_NAMESPACE, com.into()) {
            Ok(conn) => Some(conn),
            Err(e) => {
                info!("Storage namespace unavailable, structured source disabled: {}", e);
                None
            }
        };
        Ok(WmiDiskProvider { cimv2, storage })
    }

    fn query(&self, source: &str, wql: &str) -> Result<Vec<AttributeBag>> {
        run_query(&self.cimv2, source, wql)
    }
}

fn unavailable(err: wmi::WMIError) -> DiskWatchError {
    DiskWatchError::ProviderUnavailable(format!("WMI: {}", err))
}

fn run_query(conn: &WMIConnection, source: &str, wql: &str) -> Result<Vec<AttributeBag>> {
    debug!("WQL [{}]: {}", source, wql);
    let rows: Vec<HashMap<String, Variant>> = conn
        .raw_query(wql)
        .map_err(|e| DiskWatchError::QueryFailed(format!("{}: {}", source, e)))?;
    Ok(rows.into_iter().map(|row| to_bag(source, row)).collect())
}

fn to_bag(source: &str, row: HashMap<String, Variant>) -> AttributeBag {
    let mut bag = AttributeBag::new(source);
    for (key, value) in row {
        if let Some(text) = variant_text(&value) {
            bag.insert(&key, text);
        }
    }
    bag
}

/// Render a scalar variant as text; arrays yield their first renderable entry.
fn variant_text(value: &Variant) -> Option<String> {
    let text = match value {
        Variant::String(s) => s.clone(),
        Variant::Bool(b) => b.to_string(),
        Variant::I1(n) => n.to_string(),
        Variant::I2(n) => n.to_string(),
        Variant::I4(n) => n.to_string(),
        Variant::I8(n) => n.to_string(),
        Variant::UI1(n) => n.to_string(),
        Variant::UI2(n) => n.to_string(),
        Variant::UI4(n) => n.to_string(),
        Variant::UI8(n) => n.to_string(),
        Variant::R4(n) => n.to_string(),
        Variant::R8(n) => n.to_string(),
        Variant::Array(items) => return items.iter().find_map(variant_text),
        _ => return None,
    };
    Some(text)
}

fn free_space_via_win32(mount: &str) -> Option<u64> {
    let token = mount_token(mount);
    if !token.ends_with(':') {
        return None;
    }
    let root = HSTRING::from(format!("{}\\", token));
    let mut free: u64 = 0;
    unsafe {
        GetDiskFreeSpaceExW(&root, None, None, Some(&mut free as *mut u64)).ok()?;
    }
    Some(free)
}

impl DiskQueryProvider for WmiDiskProvider {
    fn bind_disk(&self, reference: &DeviceReference) -> Result<DiskHandle> {
        let wql = format!(
            "SELECT * FROM Win32_DiskDrive WHERE DeviceID = '{}'",
            escape_wql(&reference.token)
        );
        let legacy = match self.query("Win32_DiskDrive", &wql)?.into_iter().next() {
            Some(live) => live,
            None => {
                // Detached disks are gone from the class; the event carried the last state.
                debug!("{} not present, binding from event snapshot", reference.token);
                reference.snapshot.clone()
            }
        };
        Ok(DiskHandle::from_legacy(&reference.token, legacy))
    }

    fn structured_disk(&self, index: u32) -> Result<Option<AttributeBag>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let wql = format!("SELECT * FROM MSFT_Disk WHERE Number = {}", index);
        Ok(run_query(storage, "MSFT_Disk", &wql)?.into_iter().next())
    }

    fn physical_media(&self, tag: &str) -> Result<Option<AttributeBag>> {
        let wql = format!(
            "SELECT SerialNumber, Tag FROM Win32_PhysicalMedia WHERE Tag = '{}'",
            escape_wql(tag)
        );
        Ok(self.query("Win32_PhysicalMedia", &wql)?.into_iter().next())
    }

    fn pnp_entity(&self, pnp_device_id: &str) -> Result<Option<AttributeBag>> {
        let wql = format!(
            "SELECT DeviceID, Name, Caption, HardwareID FROM Win32_PnPEntity WHERE DeviceID = '{}'",
            escape_wql(pnp_device_id)
        );
        Ok(self.query("Win32_PnPEntity", &wql)?.into_iter().next())
    }

    fn partitions(&self, disk: &DiskHandle) -> Result<Vec<AttributeBag>> {
        let wql = format!(
            "ASSOCIATORS OF {{Win32_DiskDrive.DeviceID='{}'}} WHERE AssocClass = Win32_DiskDriveToDiskPartition",
            escape_wql(&disk.device_id)
        );
        self.query("Win32_DiskPartition", &wql)
    }

    fn logical_disks(&self, partition_id: &str) -> Result<Vec<AttributeBag>> {
        let wql = format!(
            "ASSOCIATORS OF {{Win32_DiskPartition.DeviceID='{}'}} WHERE AssocClass = Win32_LogicalDiskToPartition",
            escape_wql(partition_id)
        );
        self.query("Win32_LogicalDisk", &wql)
    }

    fn volume_by_mount(&self, mount: &str) -> Result<Option<AttributeBag>> {
        let wql = format!(
            "SELECT DriveLetter, Label, FileSystem, FreeSpace FROM Win32_Volume WHERE DriveLetter = '{}'",
            escape_wql(mount_token(mount))
        );
        let mut volume = self.query("Win32_Volume", &wql)?.into_iter().next();

        let has_free_space = volume
            .as_ref()
            .and_then(|v| v.get("FreeSpace"))
            .is_some_and(|v| !clean_text(v).is_empty());
        if !has_free_space {
            if let Some(free) = free_space_via_win32(mount) {
                volume
                    .get_or_insert_with(|| AttributeBag::new("Win32_Volume"))
                    .insert("FreeSpace", free.to_string());
            }
        }
        Ok(volume)
    }
}

// ============================================================
// Event subscriptions
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskInstanceEvent {
    target_instance: Win32DiskDrive,
}

#[derive(Debug, Deserialize)]
struct Win32DiskDrive {
    #[serde(rename = "DeviceID")]
    device_id: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Index")]
    index: Option<u32>,
    #[serde(rename = "PNPDeviceID")]
    pnp_device_id: Option<String>,
    #[serde(rename = "Model")]
    model: Option<String>,
    #[serde(rename = "Caption")]
    caption: Option<String>,
    #[serde(rename = "Manufacturer")]
    manufacturer: Option<String>,
    #[serde(rename = "SerialNumber")]
    serial_number: Option<String>,
    #[serde(rename = "FirmwareRevision")]
    firmware_revision: Option<String>,
    #[serde(rename = "InterfaceType")]
    interface_type: Option<String>,
    #[serde(rename = "Size")]
    size: Option<String>,
}

impl DiskInstanceEvent {
    fn into_reference(self) -> DeviceReference {
        let disk = self.target_instance;
        let mut snapshot = AttributeBag::new("Win32_DiskDrive");
        let fields = [
            ("DeviceID", &disk.device_id),
            ("Name", &disk.name),
            ("PNPDeviceID", &disk.pnp_device_id),
            ("Model", &disk.model),
            ("Caption", &disk.caption),
            ("Manufacturer", &disk.manufacturer),
            ("SerialNumber", &disk.serial_number),
            ("FirmwareRevision", &disk.firmware_revision),
            ("InterfaceType", &disk.interface_type),
            ("Size", &disk.size),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                snapshot.insert(key, v.clone());
            }
        }
        if let Some(index) = disk.index {
            snapshot.insert("Index", index.to_string());
        }

        let token = disk
            .device_id
            .as_deref()
            .or(disk.name.as_deref())
            .map(clean_text)
            .unwrap_or_default()
            .to_string();
        DeviceReference { token, snapshot }
    }
}

fn notification_query(kind: DiskEventKind, sampling: Duration) -> String {
    let class = match kind {
        DiskEventKind::Attached => "__InstanceCreationEvent",
        DiskEventKind::Detached => "__InstanceDeletionEvent",
    };
    format!(
        "SELECT * FROM {} WITHIN {} WHERE TargetInstance ISA 'Win32_DiskDrive'",
        class,
        sampling.as_secs_f64()
    )
}

impl DiskEventProvider for WmiDiskProvider {
    fn subscribe(
        &self,
        kind: DiskEventKind,
        sampling: Duration,
        sink: EventSink,
    ) -> Result<Subscription> {
        let query = notification_query(kind, sampling);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let listener = thread::Builder::new()
            .name(format!("disk-{}-listener", kind).to_lowercase())
            .spawn(move || listen(kind, query, sink, ready_tx, stop_rx))
            .map_err(|e| DiskWatchError::ProviderUnavailable(format!("listener thread: {}", e)))?;

        if let Err(e) = await_listener_start(&ready_rx, sampling + LISTENER_START_SLACK) {
            let _ = stop_tx.send(());
            if listener.is_finished() {
                let _ = listener.join();
            } else {
                warn!("Abandoning stalled {} listener thread", kind);
            }
            return Err(e);
        }

        info!("Subscribed to {} events", kind);
        Ok(Subscription::new(kind, move || {
            let _ = stop_tx.send(());
            let _ = listener.join();
        }))
    }
}

/// Listener thread body. Owns its own COM apartment and WMI connection; the
/// notification stream is dropped (cancelling the WMI call) when `stop` fires.
fn listen(
    kind: DiskEventKind,
    query: String,
    sink: EventSink,
    ready: std_mpsc::Sender<Result<()>>,
    mut stop: oneshot::Receiver<()>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(DiskWatchError::io(e).into_provider_failure()));
            return;
        }
    };

    runtime.block_on(async move {
        let connection = match COMLibrary::new().and_then(|com| WMIConnection::new(com.into())) {
            Ok(conn) => conn,
            Err(e) => {
                let _ = ready.send(Err(unavailable(e)));
                return;
            }
        };
        let stream = match connection.async_raw_notification::<DiskInstanceEvent>(&query) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(unavailable(e)));
                return;
            }
        };
        let mut events = Box::pin(stream);
        let _ = ready.send(Ok(()));

        loop {
            tokio::select! {
                _ = &mut stop => break,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        sink.fire(kind, event.into_reference());
                    }
                    Some(Err(e)) => {
                        warn!("{} listener failed: {}", kind, e);
                        sink.fail(DiskWatchError::QueryFailed(e.to_string()));
                        break;
                    }
                    None => {
                        sink.fail(DiskWatchError::QueryFailed(format!("{} stream ended", kind)));
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_queries_are_scoped_to_disk_drives() {
        assert_eq!(
            notification_query(DiskEventKind::Attached, Duration::from_secs(2)),
            "SELECT * FROM __InstanceCreationEvent WITHIN 2 WHERE TargetInstance ISA 'Win32_DiskDrive'"
        );
        assert!(notification_query(DiskEventKind::Detached, Duration::from_millis(500))
            .starts_with("SELECT * FROM __InstanceDeletionEvent WITHIN 0.5 "));
    }

    #[test]
    fn array_variants_render_first_entry() {
        let ids = Variant::Array(vec![
            Variant::String("USBSTOR\\DiskSanDisk".into()),
            Variant::String("GenDisk".into()),
        ]);
        assert_eq!(variant_text(&ids).as_deref(), Some("USBSTOR\\DiskSanDisk"));
        assert_eq!(variant_text(&Variant::UI2(7)).as_deref(), Some("7"));
        assert_eq!(variant_text(&Variant::Null), None);
    }
}
