//! Field resolver - computes each output field through an ordered fallback chain
//!
//! Sources are consulted left to right and the first non-empty (trimmed) value wins.
//! A source that has nothing, or whose query failed upstream, simply yields `None`.

use crate::models::{AttributeBag, DeviceObservation};
use crate::utils::clean_text;
use crate::utils::query::parse_u64;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;

/// Field names understood by [`DevicePath`]
pub const PATH_SERIAL: &str = "Serial";
pub const PATH_VENDOR: &str = "Vendor";

const USB_STORAGE_MARKER: &str = "USBSTOR";
const VENDOR_MARKER: &str = "VEN_";

lazy_static! {
    static ref PHYSICAL_DRIVE: Regex = Regex::new(r"(?i)PHYSICALDRIVE(\d+)").unwrap();
}

/// One attribute provider, queried by field name.
pub trait AttributeSource {
    fn label(&self) -> &str;
    fn try_get_field(&self, name: &str) -> Option<String>;
}

impl AttributeSource for AttributeBag {
    fn label(&self) -> &str {
        self.source()
    }

    fn try_get_field(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }
}

/// Device-path token treated as a last-resort source: it is always observed,
/// but only encodes part of the device identity.
#[derive(Debug, Clone, Copy)]
pub struct DevicePath<'a> {
    token: &'a str,
}

impl<'a> DevicePath<'a> {
    pub fn new(token: &'a str) -> Self {
        DevicePath { token }
    }
}

impl AttributeSource for DevicePath<'_> {
    fn label(&self) -> &str {
        "device path"
    }

    fn try_get_field(&self, name: &str) -> Option<String> {
        match name {
            PATH_SERIAL => Some(serial_from_device_path(Some(self.token))),
            PATH_VENDOR => Some(vendor_from_device_path(Some(self.token))),
            _ => None,
        }
    }
}

/// Maps a numeric bus-type code from the wrapped source to its name.
pub struct BusTypeSource<'a> {
    inner: &'a dyn AttributeSource,
}

impl AttributeSource for BusTypeSource<'_> {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn try_get_field(&self, name: &str) -> Option<String> {
        let code = self.inner.try_get_field(name)?;
        let code: u32 = clean_text(&code).parse().ok()?;
        Some(bus_type_name(code).to_string())
    }
}

/// Closed bus-type table. Unknown codes map to "".
pub fn bus_type_name(code: u32) -> &'static str {
    match code {
        1 => "SCSI",
        2 => "ATAPI",
        3 => "ATA",
        4 => "IEEE1394",
        5 => "SSA",
        6 => "Fibre",
        7 => "USB",
        8 => "RAID",
        9 => "iSCSI",
        10 => "SAS",
        11 => "SATA",
        17 => "NVMe",
        _ => "",
    }
}

/// Serial proxy from the tail of a device path.
///
/// `USBSTOR\DISK&VEN_X&PROD_Y&REV_1\575831&0` yields `575831`; for other buses the
/// whole last segment is used, which for a token without separators is the token itself.
/// Missing tokens and empty tail segments yield "".
pub fn serial_from_device_path(token: Option<&str>) -> String {
    let token = clean_text(token.unwrap_or_default());
    let (parent, last) = token.rsplit_once('\\').unwrap_or(("", token));
    if last.is_empty() {
        return String::new();
    }

    let is_usb_storage = parent
        .get(..USB_STORAGE_MARKER.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(USB_STORAGE_MARKER));
    let serial = if is_usb_storage {
        last.split('&').next().unwrap_or_default()
    } else {
        last
    };
    clean_text(serial).to_string()
}

/// Vendor token following `VEN_`, up to the next `&`, `\` or end of string.
pub fn vendor_from_device_path(token: Option<&str>) -> String {
    let token = token.unwrap_or_default();
    // ASCII uppercasing keeps byte offsets stable.
    let Some(start) = token.to_ascii_uppercase().find(VENDOR_MARKER) else {
        return String::new();
    };
    let rest = &token[start + VENDOR_MARKER.len()..];
    let end = rest.find(|c: char| c == '&' || c == '\\').unwrap_or(rest.len());
    clean_text(&rest[..end]).to_string()
}

/// Disk index encoded in a `\\.\PHYSICALDRIVEn` device id.
pub fn disk_index_from_device_id(device_id: &str) -> Option<u32> {
    PHYSICAL_DRIVE
        .captures(device_id)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// One link of a fallback chain: which source, and which of its fields.
pub struct SourceField<'a> {
    pub source: &'a dyn AttributeSource,
    pub field: &'a str,
}

/// Walk a chain and return the first non-empty trimmed value, or "".
pub fn resolve_field(name: &str, chain: &[SourceField<'_>]) -> String {
    for link in chain {
        if let Some(raw) = link.source.try_get_field(link.field) {
            let value = clean_text(&raw);
            if !value.is_empty() {
                trace!("{} <- {}.{}", name, link.source.label(), link.field);
                return value.to_string();
            }
        }
    }
    trace!("{} unresolved", name);
    String::new()
}

type Link<'a> = (Option<&'a dyn AttributeSource>, &'a str);

/// Named fallback tables over one observation.
pub struct FieldResolver<'a> {
    structured: Option<&'a AttributeBag>,
    legacy: Option<&'a AttributeBag>,
    media: Option<&'a AttributeBag>,
    pnp: Option<&'a AttributeBag>,
    path: DevicePath<'a>,
    observed: AttributeBag,
}

fn src(bag: Option<&AttributeBag>) -> Option<&dyn AttributeSource> {
    bag.map(|b| b as &dyn AttributeSource)
}

impl<'a> FieldResolver<'a> {
    pub fn new(observation: &'a DeviceObservation) -> Self {
        let mut observed = AttributeBag::new("observation")
            .with("DeviceID", observation.device_id.as_str())
            .with("DevicePath", observation.device_path.as_str());
        if let Some(index) = observation.disk_index {
            observed.insert("DiskIndex", index.to_string());
        }

        FieldResolver {
            structured: observation.structured.as_ref(),
            legacy: observation.legacy.as_ref(),
            media: observation.media.as_ref(),
            pnp: observation.pnp.as_ref(),
            path: DevicePath::new(&observation.device_path),
            observed,
        }
    }

    fn observed(&self) -> Option<&dyn AttributeSource> {
        Some(&self.observed)
    }

    fn path(&self) -> Option<&dyn AttributeSource> {
        Some(&self.path)
    }

    fn chain(&self, name: &str, links: &[Link<'_>]) -> String {
        let chain: Vec<SourceField<'_>> = links
            .iter()
            .filter_map(|(source, field)| (*source).map(|source| SourceField { source, field: *field }))
            .collect();
        resolve_field(name, &chain)
    }

    pub fn disk_number(&self) -> u32 {
        let text = self.chain(
            "diskNumber",
            &[
                (src(self.structured), "Number"),
                (src(self.legacy), "Index"),
                (self.observed(), "DiskIndex"),
            ],
        );
        text.parse()
            .ok()
            .or_else(|| disk_index_from_device_id(&self.name()))
            .unwrap_or(0)
    }

    pub fn name(&self) -> String {
        self.chain(
            "name",
            &[
                (src(self.legacy), "Name"),
                (src(self.legacy), "DeviceID"),
                (self.observed(), "DeviceID"),
            ],
        )
    }

    pub fn serial_number(&self) -> String {
        self.chain(
            "serialNumber",
            &[
                (src(self.structured), "SerialNumber"),
                (src(self.legacy), "SerialNumber"),
                (src(self.media), "SerialNumber"),
                (self.path(), PATH_SERIAL),
            ],
        )
    }

    pub fn model(&self) -> String {
        self.chain(
            "model",
            &[
                (src(self.structured), "Model"),
                (src(self.legacy), "Model"),
                (src(self.legacy), "Caption"),
            ],
        )
    }

    pub fn firmware_version(&self) -> String {
        self.chain(
            "firmwareVersion",
            &[
                (src(self.structured), "FirmwareVersion"),
                (src(self.legacy), "FirmwareRevision"),
            ],
        )
    }

    pub fn manufacturer(&self) -> String {
        self.chain(
            "manufacturer",
            &[
                (src(self.legacy), "Manufacturer"),
                (self.path(), PATH_VENDOR),
                (src(self.structured), "FriendlyName"),
            ],
        )
    }

    pub fn pnp_device_id(&self) -> String {
        self.chain(
            "pnpDeviceID",
            &[
                (src(self.legacy), "PNPDeviceID"),
                (src(self.pnp), "DeviceID"),
                (self.observed(), "DevicePath"),
            ],
        )
    }

    pub fn friendly_name(&self) -> String {
        self.chain(
            "friendlyName",
            &[
                (src(self.structured), "FriendlyName"),
                (src(self.pnp), "Name"),
                (src(self.legacy), "Caption"),
            ],
        )
    }

    pub fn caption(&self) -> String {
        self.chain(
            "caption",
            &[(src(self.legacy), "Caption"), (src(self.pnp), "Caption")],
        )
    }

    pub fn hardware_id(&self) -> String {
        self.chain(
            "hardwareID",
            &[(src(self.pnp), "HardwareID"), (src(self.legacy), "PNPDeviceID")],
        )
    }

    pub fn interface_type(&self) -> String {
        let bus_type = self.structured.map(|inner| BusTypeSource { inner });
        self.chain(
            "interfaceType",
            &[
                (bus_type.as_ref().map(|b| b as &dyn AttributeSource), "BusType"),
                (src(self.legacy), "InterfaceType"),
            ],
        )
    }

    pub fn size_in_bytes(&self) -> u64 {
        let text = self.chain(
            "sizeInBytes",
            &[(src(self.structured), "Size"), (src(self.legacy), "Size")],
        );
        parse_u64(&text).unwrap_or(0)
    }
}
