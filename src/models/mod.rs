use crate::utils::clean_text;
use crate::{DiskWatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ============================================================
// Core Enums
// ============================================================

/// Classification of a physical-disk event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiskEventKind {
    Attached,
    Detached,
}

impl fmt::Display for DiskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskEventKind::Attached => write!(f, "Attached"),
            DiskEventKind::Detached => write!(f, "Detached"),
        }
    }
}

/// How many volumes the mapper collects per disk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    /// Stop at the first discovered volume
    First,
    /// Report every discovered volume
    #[default]
    All,
}

// ============================================================
// Provider-native data
// ============================================================

/// Flat property bag read from one provider object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeBag {
    source: String,
    values: HashMap<String, String>,
}

impl AttributeBag {
    pub fn new(source: impl Into<String>) -> Self {
        AttributeBag {
            source: source.into(),
            values: HashMap::new(),
        }
    }

    /// Builder-style insert, handy for snapshots and tests.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Raw device reference captured from the triggering event.
///
/// `token` is the device's self-describing id (e.g. `\\.\PHYSICALDRIVE2`);
/// `snapshot` holds whatever attributes the event itself carried.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReference {
    pub token: String,
    pub snapshot: AttributeBag,
}

/// Raw event handed from the correlator to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct RawDiskEvent {
    pub kind: DiskEventKind,
    pub reference: DeviceReference,
}

/// Queryable handle produced by re-binding a [`DeviceReference`]
#[derive(Debug, Clone, PartialEq)]
pub struct DiskHandle {
    pub device_id: String,
    pub pnp_device_id: String,
    pub index: Option<u32>,
    pub legacy: AttributeBag,
}

impl DiskHandle {
    /// Build a handle from a legacy-source disk entry, falling back to the event token
    /// when the entry carries no device id.
    pub fn from_legacy(token: &str, legacy: AttributeBag) -> Self {
        let text = |key: &str| legacy.get(key).map(clean_text).unwrap_or_default().to_string();
        let device_id = match text("DeviceID") {
            id if id.is_empty() => clean_text(token).to_string(),
            id => id,
        };
        let pnp_device_id = text("PNPDeviceID");
        let index = legacy.get("Index").and_then(|v| clean_text(v).parse().ok());
        DiskHandle {
            device_id,
            pnp_device_id,
            index,
            legacy,
        }
    }
}

/// Everything known about one disk at event time. Consumed within one call.
#[derive(Debug, Clone)]
pub struct DeviceObservation {
    /// Disk device id, e.g. `\\.\PHYSICALDRIVE2`
    pub device_id: String,
    /// Device-path token (PNP device id)
    pub device_path: String,
    pub disk_index: Option<u32>,
    pub structured: Option<AttributeBag>,
    pub legacy: Option<AttributeBag>,
    pub media: Option<AttributeBag>,
    pub pnp: Option<AttributeBag>,
}

// ============================================================
// Output records
// ============================================================

/// One logical volume on the parent disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    pub mount_point: String,
    pub volume_name: String,
    pub file_system: String,
    pub free_space_in_bytes: u64,
}

/// Final record returned for one disk event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDiskRecord {
    pub event_type: DiskEventKind,
    pub disk_number: u32,
    pub name: String,
    pub serial_number: String,
    pub model: String,
    pub firmware_version: String,
    pub manufacturer: String,
    #[serde(rename = "pnpDeviceID")]
    pub pnp_device_id: String,
    pub friendly_name: String,
    pub caption: String,
    #[serde(rename = "hardwareID")]
    pub hardware_id: String,
    pub mount_point: String,
    pub volume_name: String,
    pub interface_type: String,
    pub file_system: String,
    pub size_in_bytes: u64,
    pub free_space_in_bytes: u64,
    /// Parallel per-volume lists for multi-partition disks
    #[serde(default)]
    pub mount_points: Vec<String>,
    #[serde(default)]
    pub volume_names: Vec<String>,
    #[serde(default)]
    pub file_systems: Vec<String>,
    #[serde(default)]
    pub free_spaces_in_bytes: Vec<u64>,
}

impl ResolvedDiskRecord {
    /// Every string value in the record, single and list-valued.
    pub fn string_fields(&self) -> Vec<&str> {
        let mut fields = vec![
            self.name.as_str(),
            self.serial_number.as_str(),
            self.model.as_str(),
            self.firmware_version.as_str(),
            self.manufacturer.as_str(),
            self.pnp_device_id.as_str(),
            self.friendly_name.as_str(),
            self.caption.as_str(),
            self.hardware_id.as_str(),
            self.mount_point.as_str(),
            self.volume_name.as_str(),
            self.interface_type.as_str(),
            self.file_system.as_str(),
        ];
        fields.extend(self.mount_points.iter().map(String::as_str));
        fields.extend(self.volume_names.iter().map(String::as_str));
        fields.extend(self.file_systems.iter().map(String::as_str));
        fields
    }
}

// ============================================================
// Configuration
// ============================================================

/// Sentinel meaning "block until an event arrives"
pub const WAIT_FOREVER: i64 = -1;
/// Upper bound for the provider sampling interval
pub const MAX_SAMPLING_MS: i64 = 2000;

/// Caller-facing options, loadable from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchOptions {
    /// Milliseconds to wait for an event, or -1 to wait forever
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_poll_ceiling_ms")]
    pub poll_ceiling_ms: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: i64,
    #[serde(default = "default_sampling_ms")]
    pub sampling_interval_ms: i64,
    #[serde(default)]
    pub volume_mode: VolumeMode,
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_timeout_ms() -> i64 {
    WAIT_FOREVER
}

fn default_poll_ceiling_ms() -> i64 {
    4000
}

fn default_poll_interval_ms() -> i64 {
    250
}

fn default_sampling_ms() -> i64 {
    MAX_SAMPLING_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            timeout_ms: default_timeout_ms(),
            poll_ceiling_ms: default_poll_ceiling_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sampling_interval_ms: default_sampling_ms(),
            volume_mode: VolumeMode::default(),
            log_dir: None,
            log_level: default_log_level(),
        }
    }
}

/// Wait bound for the event correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    Forever,
    After(Duration),
}

/// Validated, typed form of [`WatchOptions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPlan {
    pub timeout: WaitTimeout,
    pub poll_ceiling: Duration,
    pub poll_interval: Duration,
    pub sampling_interval: Duration,
    pub volume_mode: VolumeMode,
}

impl WatchOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Checks every timing parameter. Must run before any subscription is opened.
    pub fn validate(&self) -> Result<WatchPlan> {
        let timeout = match self.timeout_ms {
            WAIT_FOREVER => WaitTimeout::Forever,
            ms if ms >= 0 => WaitTimeout::After(Duration::from_millis(ms as u64)),
            ms => {
                return Err(DiskWatchError::InvalidParameter(format!(
                    "timeoutMs must be >= 0 or {WAIT_FOREVER}, got {ms}"
                )))
            }
        };

        let poll_ceiling = non_negative("pollCeilingMs", self.poll_ceiling_ms)?;
        let poll_interval = non_negative("pollIntervalMs", self.poll_interval_ms)?;

        if !(1..=MAX_SAMPLING_MS).contains(&self.sampling_interval_ms) {
            return Err(DiskWatchError::InvalidParameter(format!(
                "samplingIntervalMs must be within 1..={MAX_SAMPLING_MS}, got {}",
                self.sampling_interval_ms
            )));
        }

        Ok(WatchPlan {
            timeout,
            poll_ceiling,
            poll_interval,
            sampling_interval: Duration::from_millis(self.sampling_interval_ms as u64),
            volume_mode: self.volume_mode,
        })
    }
}

fn non_negative(name: &str, ms: i64) -> Result<Duration> {
    if ms < 0 {
        return Err(DiskWatchError::InvalidParameter(format!(
            "{name} must be >= 0, got {ms}"
        )));
    }
    Ok(Duration::from_millis(ms as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn defaults_match_documented_values() {
        let plan = assert_ok!(WatchOptions::default().validate());
        assert_eq!(plan.timeout, WaitTimeout::Forever);
        assert_eq!(plan.poll_ceiling, Duration::from_millis(4000));
        assert_eq!(plan.poll_interval, Duration::from_millis(250));
        assert_eq!(plan.sampling_interval, Duration::from_secs(2));
        assert_eq!(plan.volume_mode, VolumeMode::All);
    }

    #[test]
    fn rejects_negative_timing() {
        let bad_timeout = WatchOptions { timeout_ms: -5, ..Default::default() };
        assert_err!(bad_timeout.validate());

        let bad_ceiling = WatchOptions { poll_ceiling_ms: -1, ..Default::default() };
        assert_err!(bad_ceiling.validate());

        let bad_interval = WatchOptions { poll_interval_ms: -250, ..Default::default() };
        assert!(matches!(
            bad_interval.validate(),
            Err(DiskWatchError::InvalidParameter(msg)) if msg.contains("pollIntervalMs")
        ));
    }

    #[test]
    fn sampling_interval_is_bounded() {
        let too_slow = WatchOptions { sampling_interval_ms: 5000, ..Default::default() };
        assert_err!(too_slow.validate());
        let zero = WatchOptions { sampling_interval_ms: 0, ..Default::default() };
        assert_err!(zero.validate());
    }

    #[test]
    fn zero_timeout_is_a_valid_bound() {
        let opts = WatchOptions { timeout_ms: 0, ..Default::default() };
        assert_eq!(
            assert_ok!(opts.validate()).timeout,
            WaitTimeout::After(Duration::ZERO)
        );
    }

    #[test]
    fn partial_json_config_uses_defaults() {
        let opts: WatchOptions =
            serde_json::from_str(r#"{"timeoutMs": 30000, "volumeMode": "first"}"#).unwrap();
        assert_eq!(opts.timeout_ms, 30000);
        assert_eq!(opts.volume_mode, VolumeMode::First);
        assert_eq!(opts.poll_interval_ms, 250);
        assert_eq!(opts.log_level, "info");
    }

    #[test]
    fn handle_binds_from_legacy_entry() {
        let legacy = AttributeBag::new("Win32_DiskDrive")
            .with("DeviceID", r"\\.\PHYSICALDRIVE2 ")
            .with("PNPDeviceID", r"USBSTOR\DISK&VEN_X\123&0")
            .with("Index", "2");
        let handle = DiskHandle::from_legacy("ignored", legacy);
        assert_eq!(handle.device_id, r"\\.\PHYSICALDRIVE2");
        assert_eq!(handle.pnp_device_id, r"USBSTOR\DISK&VEN_X\123&0");
        assert_eq!(handle.index, Some(2));
    }

    #[test]
    fn handle_falls_back_to_event_token() {
        let handle = DiskHandle::from_legacy(r"\\.\PHYSICALDRIVE5", AttributeBag::new("event"));
        assert_eq!(handle.device_id, r"\\.\PHYSICALDRIVE5");
        assert_eq!(handle.pnp_device_id, "");
        assert_eq!(handle.index, None);
    }

    #[test]
    fn record_uses_stable_field_names() {
        let record = ResolvedDiskRecord {
            event_type: DiskEventKind::Attached,
            disk_number: 2,
            name: String::new(),
            serial_number: String::new(),
            model: String::new(),
            firmware_version: String::new(),
            manufacturer: String::new(),
            pnp_device_id: String::new(),
            friendly_name: String::new(),
            caption: String::new(),
            hardware_id: String::new(),
            mount_point: String::new(),
            volume_name: String::new(),
            interface_type: String::new(),
            file_system: String::new(),
            size_in_bytes: 0,
            free_space_in_bytes: 0,
            mount_points: vec![],
            volume_names: vec![],
            file_systems: vec![],
            free_spaces_in_bytes: vec![],
        };
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "eventType",
            "diskNumber",
            "pnpDeviceID",
            "hardwareID",
            "sizeInBytes",
            "freeSpaceInBytes",
            "mountPoints",
            "freeSpacesInBytes",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["eventType"], "Attached");
    }
}
