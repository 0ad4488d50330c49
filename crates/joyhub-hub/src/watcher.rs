//! Macro completion watcher.

use std::sync::Arc;

use joyhub_types::{ControllerIndex, MacroHandle, SessionId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;

/// Spawn a task that polls the driver until `handle` finishes or `cancel`
/// fires.
pub(crate) fn spawn(
    coordinator: Arc<Coordinator>,
    session: SessionId,
    handle: MacroHandle,
    index: ControllerIndex,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        watch(&coordinator, session, &handle, index, &cancel).await;
    })
}

async fn watch(
    coordinator: &Coordinator,
    session: SessionId,
    handle: &MacroHandle,
    index: ControllerIndex,
    cancel: &CancellationToken,
) {
    let interval = coordinator.settings().macro_poll_interval;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(session = %session, %index, handle = %handle, "macro watcher cancelled");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        match coordinator.poll_macro(index).await {
            Ok(Some(state)) if state.has_finished(handle) => {
                if coordinator.complete_macro(session, handle).await {
                    info!(session = %session, %index, handle = %handle, "macro completed");
                } else {
                    debug!(session = %session, handle = %handle, "finished macro was already retired");
                }
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(session = %session, %index, handle = %handle, "controller vanished while macro was running");
                coordinator.abandon_macro(session, handle).await;
                return;
            }
            Err(e) => {
                warn!(session = %session, %index, handle = %handle, error = %e, "macro state query failed, giving up");
                coordinator.abandon_macro(session, handle).await;
                return;
            }
        }
    }
}
