use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use spool_core::event::RunEvent;

use crate::registry::SessionRegistry;

/// Forward engine events from the run loop's broadcast channel to the
/// per-thread session sinks. Spawns a task that runs until the channel
/// closes.
pub fn start_dispatcher(
    registry: Arc<SessionRegistry>,
    mut rx: broadcast::Receiver<RunEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let thread_id = event.thread_id().clone();
                    registry.publish(&thread_id, event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event dispatcher lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("event dispatcher channel closed");
                    break;
                }
            }
        }
    })
}
