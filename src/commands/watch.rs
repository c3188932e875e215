use crate::models::{ResolvedDiskRecord, WatchOptions};
use crate::platform::{self, DiskEventProvider, DiskQueryProvider};
use crate::services::DiskEventEngine;
use crate::Result;
use tracing::{debug, info};

fn current_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Wait for the next disk attach/detach on this machine and resolve it.
///
/// Blocks the calling thread. `Ok(None)` means the timeout elapsed with no event.
pub fn wait_for_disk_event(options: &WatchOptions) -> Result<Option<ResolvedDiskRecord>> {
    options.validate()?;
    let engine = DiskEventEngine::new(platform::connect()?);
    current_thread_runtime()?.block_on(engine.next_event(options))
}

/// Keep resolving events until `on_record` returns `false`.
///
/// The engine is re-armed immediately after each return so closely spaced events are
/// missed as rarely as possible. Timeouts just re-arm.
pub fn watch_disk_events<F>(options: &WatchOptions, on_record: F) -> Result<()>
where
    F: FnMut(&ResolvedDiskRecord) -> bool,
{
    options.validate()?;
    let engine = DiskEventEngine::new(platform::connect()?);
    current_thread_runtime()?.block_on(follow(&engine, options, on_record))
}

/// Event loop behind [`watch_disk_events`], usable with any provider.
pub async fn follow<P, F>(
    engine: &DiskEventEngine<P>,
    options: &WatchOptions,
    mut on_record: F,
) -> Result<()>
where
    P: DiskQueryProvider + DiskEventProvider,
    F: FnMut(&ResolvedDiskRecord) -> bool,
{
    let mut delivered = 0usize;
    loop {
        match engine.next_event(options).await? {
            Some(record) => {
                delivered += 1;
                if !on_record(&record) {
                    info!("Watch stopped by caller after {} event(s)", delivered);
                    return Ok(());
                }
            }
            None => debug!("Watch window elapsed, re-arming"),
        }
    }
}
