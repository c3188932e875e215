//! Event correlator - races the creation and deletion subscriptions
//!
//! Both listeners feed one single-slot channel; whichever fires first wins and
//! anything after it is dropped. Callers wanting a sequence of events call again.

use crate::models::{DiskEventKind, RawDiskEvent, WaitTimeout};
use crate::platform::{DiskEventProvider, EventSink};
use crate::{DiskWatchError, Result};
use std::time::Duration;
use tracing::{debug, info};

pub struct EventCorrelator<'a, P: ?Sized> {
    provider: &'a P,
    sampling: Duration,
}

impl<'a, P> EventCorrelator<'a, P>
where
    P: DiskEventProvider + ?Sized,
{
    pub fn new(provider: &'a P, sampling: Duration) -> Self {
        EventCorrelator { provider, sampling }
    }

    /// Block until a disk is attached or detached, or `timeout` elapses (`Ok(None)`).
    ///
    /// Both subscriptions are dropped, and so torn down, on every return path.
    pub async fn wait_for_event(&self, timeout: WaitTimeout) -> Result<Option<RawDiskEvent>> {
        let (sink, mut rx) = EventSink::channel();
        let _created = self
            .provider
            .subscribe(DiskEventKind::Attached, self.sampling, sink.clone())?;
        let _deleted = self
            .provider
            .subscribe(DiskEventKind::Detached, self.sampling, sink)?;

        let first = match timeout {
            WaitTimeout::Forever => rx.recv().await,
            WaitTimeout::After(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    debug!("No disk event within {:?}", limit);
                    return Ok(None);
                }
            },
        };

        match first {
            Some(Ok(event)) => {
                info!("Disk {}: {}", event.kind, event.reference.token);
                Ok(Some(event))
            }
            Some(Err(e)) => Err(e),
            None => Err(DiskWatchError::ProviderUnavailable(
                "event listeners stopped before any event arrived".to_string(),
            )),
        }
    }
}
