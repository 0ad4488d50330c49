//! Running-macro bookkeeping, one macro per session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use joyhub_types::{ControllerIndex, MacroHandle, MacroInfo, SessionId};
use tokio_util::sync::CancellationToken;

/// A macro the driver is executing on behalf of a session.
#[derive(Debug, Clone)]
pub struct RunningMacro {
    pub handle: MacroHandle,
    pub index: ControllerIndex,
    pub script: String,
    pub started_at: DateTime<Utc>,
    /// Stops the completion watcher for this macro.
    cancel: CancellationToken,
}

impl RunningMacro {
    pub fn new(handle: MacroHandle, index: ControllerIndex, script: String) -> Self {
        Self {
            handle,
            index,
            script,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token the completion watcher selects on.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tell the completion watcher to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn info(&self) -> MacroInfo {
        MacroInfo {
            handle: self.handle.clone(),
            index: self.index,
            script: self.script.clone(),
            started_at: self.started_at,
        }
    }
}

/// Running macros keyed by owning session.
#[derive(Debug, Default)]
pub struct MacroTracker {
    running: HashMap<SessionId, RunningMacro>,
}

impl MacroTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: SessionId) -> Option<&RunningMacro> {
        self.running.get(&session)
    }

    /// Record a macro for `session`.
    ///
    /// Fails with the handle of the macro already running for that session.
    pub fn try_insert(&mut self, session: SessionId, running: RunningMacro) -> Result<(), MacroHandle> {
        if let Some(existing) = self.running.get(&session) {
            return Err(existing.handle.clone());
        }
        self.running.insert(session, running);
        Ok(())
    }

    /// Remove and return the session's macro, whatever its handle.
    pub fn take(&mut self, session: SessionId) -> Option<RunningMacro> {
        self.running.remove(&session)
    }

    /// Remove the session's macro only if it is still `handle`.
    pub fn remove_if(&mut self, session: SessionId, handle: &MacroHandle) -> Option<RunningMacro> {
        if self.running.get(&session).is_some_and(|m| &m.handle == handle) {
            self.running.remove(&session)
        } else {
            None
        }
    }

    /// Remove every macro targeting `index`.
    pub fn drain_controller(&mut self, index: ControllerIndex) -> Vec<(SessionId, RunningMacro)> {
        let sessions: Vec<SessionId> = self
            .running
            .iter()
            .filter(|(_, m)| m.index == index)
            .map(|(session, _)| *session)
            .collect();
        sessions
            .into_iter()
            .filter_map(|session| self.running.remove(&session).map(|m| (session, m)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}
