//! Best-effort device-path lookup cache
//! Maps a disk device id (`\\.\PHYSICALDRIVEn`) to the last device-path token seen for it

use std::collections::HashMap;
use std::sync::Mutex;

/// Shared between concurrent engine calls; every access goes through the mutex.
#[derive(Debug, Default)]
pub struct DevicePathCache {
    entries: Mutex<HashMap<String, String>>,
}

impl DevicePathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&device_key(device_id)).cloned())
    }

    /// Record a token. Empty tokens are ignored.
    pub fn remember(&self, device_id: &str, token: &str) {
        if device_id.is_empty() || token.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(device_key(device_id), token.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Device ids differ in case between providers.
fn device_key(device_id: &str) -> String {
    device_id.to_ascii_uppercase()
}
