//! Physical-disk attach/detach watcher.
//!
//! Each call waits for one disk event, then resolves the device through ordered
//! fallback chains over several instrumentation sources and reports its volumes.

pub mod commands;
pub mod error;
pub mod models;
pub mod platform;
pub mod services;
pub mod utils;

pub use commands::{wait_for_disk_event, watch_disk_events};
pub use error::{DiskWatchError, Result};
pub use models::{DiskEventKind, ResolvedDiskRecord, VolumeRecord, WatchOptions};
pub use services::DiskEventEngine;
