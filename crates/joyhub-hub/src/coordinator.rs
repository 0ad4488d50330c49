//! Session coordinator.
//!
//! The [`Coordinator`] owns the session registry, the controller membership
//! table and the macro tracker behind a single lock. Every state transition
//! runs as one critical section; driver cleanup that may block happens after
//! the lock is released.
//!
//! Mutating operations deliver their own responses and broadcasts through
//! the [`Broadcaster`]. Read-only queries return their result to the caller.
//!
//! Snapshots are tagged with the registry generation they were taken at.
//! A snapshot whose generation is older than one already broadcast is
//! dropped, so every session sees the latest committed state last.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use joyhub_driver::{ControllerDriver, DriverError};
use joyhub_types::{
    ControllerIndex, ControllerSnapshot, ControllerState, ControllerType, InputPacket,
    MacroHandle, MacroInfo, ServerMessage, SessionId,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, OutboundSender};
use crate::config::Config;
use crate::controllers::{decorate, ActiveController, ControllerTable, Detached, SnapshotEntry};
use crate::error::HubError;
use crate::macros::{MacroTracker, RunningMacro};
use crate::session::ClientSession;
use crate::watcher;

/// Tunables the coordinator needs from [`Config`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub controller_type: ControllerType,
    pub driver_timeout: Duration,
    pub cleanup_attempts: u32,
    pub macro_poll_interval: Duration,
    pub allow_admin: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            controller_type: config.driver.controller_type,
            driver_timeout: config.driver.call_timeout(),
            cleanup_attempts: config.driver.cleanup_attempts.max(1),
            macro_poll_interval: config.macros.poll_interval(),
            allow_admin: config.admin.allow_force_remove,
        }
    }
}

/// The three registries, only ever touched under the coordinator lock.
#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<SessionId, ClientSession>,
    controllers: ControllerTable,
    macros: MacroTracker,
    /// Bumped for every snapshot taken for a broadcast.
    generation: u64,
}

/// Controller entries copied under the lock, tagged with their generation.
struct Captured {
    generation: u64,
    entries: Vec<SnapshotEntry>,
}

impl Registry {
    /// Capture the controller table for a broadcast.
    fn snapshot(&mut self) -> Captured {
        self.generation += 1;
        Captured {
            generation: self.generation,
            entries: self.controllers.entries(),
        }
    }

    fn require_session(&self, session: SessionId) -> Result<(), HubError> {
        if self.sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(HubError::SessionNotFound(session))
        }
    }

    /// Detach `session` from its current controller without tearing the
    /// controller down. Returns the controller it was attached to.
    fn leave_current(&mut self, session: SessionId) -> Option<ControllerIndex> {
        let index = self.sessions.get_mut(&session)?.detach()?;
        match self.controllers.detach(index, session) {
            Detached::Left { remaining } => {
                debug!(session = %session, %index, remaining, "session left controller");
            }
            Detached::NotMember => {
                warn!(session = %session, %index, "session was not a member of its controller");
            }
            Detached::NoController => {
                warn!(session = %session, %index, "session pointed at a missing controller");
            }
        }
        Some(index)
    }

    /// Point `session` at `index` and add it to the member set.
    fn attach(&mut self, session: SessionId, index: ControllerIndex, device_id: Option<String>) {
        self.controllers.attach(index, session);
        if let Some(client) = self.sessions.get_mut(&session) {
            client.attach(index, device_id);
        }
    }

    /// Clear the attachment of every member of a removed controller.
    fn release_members(&mut self, index: ControllerIndex, controller: &ActiveController) {
        for member in &controller.members {
            if let Some(client) = self.sessions.get_mut(member) {
                client.detach_from(index);
            }
        }
    }

    /// Cancel and drop every macro targeting a removed controller. Returns
    /// the dropped macros with their owners.
    fn drop_macros(&mut self, index: ControllerIndex) -> Vec<(SessionId, RunningMacro)> {
        let dropped = self.macros.drain_controller(index);
        for (owner, running) in &dropped {
            running.cancel();
            debug!(session = %owner, %index, handle = %running.handle, "dropped macro of removed controller");
        }
        dropped
    }
}

/// Cleanup work decided under the lock and performed after it is released.
struct DisconnectCleanup {
    stop: Option<RunningMacro>,
    remove: Option<ControllerIndex>,
    dropped: Vec<(SessionId, RunningMacro)>,
    snapshot: Option<Captured>,
}

/// Coordinates sessions, shared controllers and running macros.
pub struct Coordinator {
    registry: Mutex<Registry>,
    driver: Arc<dyn ControllerDriver>,
    outbound: Broadcaster,
    settings: CoordinatorSettings,
    /// Generation of the last snapshot broadcast to every session.
    broadcast_order: Mutex<u64>,
}

impl Coordinator {
    pub fn new(driver: Arc<dyn ControllerDriver>, settings: CoordinatorSettings) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            driver,
            outbound: Broadcaster::new(),
            settings,
            broadcast_order: Mutex::new(0),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn outbound(&self) -> &Broadcaster {
        &self.outbound
    }

    /// Register a new session and send it the current snapshot.
    pub async fn connect(&self, session: SessionId, tx: OutboundSender) {
        self.outbound.register(session, tx);
        let captured = {
            let mut reg = self.registry.lock().await;
            reg.sessions.insert(session, ClientSession::new());
            Captured {
                generation: reg.generation,
                entries: reg.controllers.entries(),
            }
        };
        info!(session = %session, "session connected");
        let controllers = self.decorate(captured.entries).await;

        // A newer broadcast already reached this session.
        let sent = self.broadcast_order.lock().await;
        if captured.generation < *sent {
            debug!(session = %session, generation = captured.generation, latest = *sent, "initial snapshot superseded");
            return;
        }
        self.outbound
            .send_to(session, ServerMessage::ActiveControllers { controllers });
    }

    /// Tear down a session. Idempotent; never fails.
    pub async fn disconnect(&self, session: SessionId) {
        let cleanup = {
            let mut reg = self.registry.lock().await;
            let stop = reg.macros.take(session);
            if let Some(running) = &stop {
                running.cancel();
            }

            let mut remove = None;
            let mut dropped = Vec::new();
            let mut changed = false;
            match reg.sessions.remove(&session) {
                None => debug!(session = %session, "disconnect for unknown session"),
                Some(mut client) => {
                    if let Some(index) = client.detach() {
                        match reg.controllers.detach(index, session) {
                            Detached::Left { remaining: 0 } => {
                                reg.controllers.remove(index);
                                dropped = reg.drop_macros(index);
                                remove = Some(index);
                                changed = true;
                            }
                            Detached::Left { .. } => changed = true,
                            Detached::NotMember => {
                                warn!(session = %session, %index, "disconnecting session was not a member of its controller");
                            }
                            Detached::NoController => {
                                warn!(session = %session, %index, "disconnecting session pointed at a missing controller");
                            }
                        }
                    }
                }
            }

            DisconnectCleanup {
                stop,
                remove,
                dropped,
                snapshot: changed.then(|| reg.snapshot()),
            }
        };
        self.outbound.unregister(session);
        info!(session = %session, "session disconnected");

        if let Some(running) = cleanup.stop {
            // Removing the controller ends its macros too.
            if cleanup.remove != Some(running.index) {
                self.best_effort("stop_macro", running.index, || {
                    self.driver.stop_macro(running.index, &running.handle)
                })
                .await;
            }
        }
        if let Some(index) = cleanup.remove {
            info!(%index, "last member disconnected, removing controller");
            self.best_effort("remove_controller", index, || {
                self.driver.remove_controller(index)
            })
            .await;
        }
        self.notify_dropped(cleanup.dropped);
        if let Some(captured) = cleanup.snapshot {
            self.broadcast_snapshot(captured).await;
        }
    }

    /// Create a controller and attach `session` as its only member.
    pub async fn create_controller(
        &self,
        session: SessionId,
        device_id: Option<String>,
    ) -> Result<ControllerIndex, HubError> {
        self.registry.lock().await.require_session(session)?;

        let reconnect = match &device_id {
            Some(id) => vec![id.clone()],
            None => self.call(self.driver.reconnect_targets()).await?,
        };
        let kind = self.settings.controller_type;
        let index = self
            .call(self.driver.create_controller(kind, &reconnect))
            .await?;

        let committed = {
            let mut reg = self.registry.lock().await;
            if reg.sessions.contains_key(&session) {
                reg.leave_current(session);
                let controller = ActiveController::new(session, device_id.clone(), kind);
                let mut dropped = Vec::new();
                if let Some(stale) = reg.controllers.insert(index, controller) {
                    warn!(%index, "driver reused the index of a registered controller");
                    reg.release_members(index, &stale);
                    dropped = reg.drop_macros(index);
                }
                reg.attach(session, index, device_id.clone());
                Some((dropped, reg.snapshot()))
            } else {
                None
            }
        };

        let Some((dropped, captured)) = committed else {
            warn!(session = %session, %index, "session disconnected while its controller was being created");
            self.best_effort("remove_controller", index, || {
                self.driver.remove_controller(index)
            })
            .await;
            return Err(HubError::SessionNotFound(session));
        };

        info!(session = %session, %index, device = ?device_id, "controller created");
        self.outbound
            .send_to(session, ServerMessage::ControllerCreated { index });
        self.notify_dropped(dropped);
        self.broadcast_snapshot(captured).await;
        Ok(index)
    }

    /// Attach `session` to an existing controller.
    pub async fn join_controller(
        &self,
        session: SessionId,
        index: ControllerIndex,
    ) -> Result<(), HubError> {
        let (joined, captured) = {
            let mut reg = self.registry.lock().await;
            reg.require_session(session)?;
            let controller = reg
                .controllers
                .get(index)
                .ok_or(HubError::ControllerNotFound(index))?;
            let device_id = controller.device_id.clone();
            let created_at = controller.created_at;

            let current = reg.sessions.get(&session).and_then(|c| c.controller);
            if current != Some(index) {
                reg.leave_current(session);
            }
            reg.attach(session, index, device_id.clone());

            let joined = ServerMessage::JoinedControllerSession {
                index,
                device_id,
                created_at,
            };
            (joined, reg.snapshot())
        };

        info!(session = %session, %index, "session joined controller");
        self.outbound.send_to(session, joined);
        self.broadcast_snapshot(captured).await;
        Ok(())
    }

    /// Detach `session` from its controller, leaving the controller alive.
    pub async fn leave_controller(&self, session: SessionId) -> Result<ControllerIndex, HubError> {
        let (index, captured) = {
            let mut reg = self.registry.lock().await;
            reg.require_session(session)?;
            let index = reg.leave_current(session).ok_or(HubError::NotAttached)?;
            (index, reg.snapshot())
        };

        info!(session = %session, %index, "session left controller");
        self.outbound
            .send_to(session, ServerMessage::LeftControllerSession { index });
        self.broadcast_snapshot(captured).await;
        Ok(index)
    }

    /// Remove a controller regardless of its members.
    pub async fn force_remove_controller(
        &self,
        caller: SessionId,
        index: ControllerIndex,
    ) -> Result<(), HubError> {
        if !self.settings.allow_admin {
            return Err(HubError::Forbidden);
        }

        let (members, dropped, captured) = {
            let mut reg = self.registry.lock().await;
            if !reg.controllers.contains(index) {
                return Err(HubError::ControllerNotFound(index));
            }

            match self.call(self.driver.remove_controller(index)).await {
                Ok(()) => {}
                Err(HubError::Driver(DriverError::ControllerNotFound(_))) => {
                    warn!(%index, "driver had already dropped the controller");
                }
                Err(e) => return Err(e),
            }

            let Some(controller) = reg.controllers.remove(index) else {
                return Err(HubError::ControllerNotFound(index));
            };
            reg.release_members(index, &controller);
            let dropped = reg.drop_macros(index);
            (controller.members, dropped, reg.snapshot())
        };

        info!(session = %caller, %index, members = members.len(), "controller force-removed");
        for member in members {
            self.outbound
                .send_to(member, ServerMessage::ControllerForceRemoved { index });
        }
        self.notify_dropped(dropped);
        self.broadcast_snapshot(captured).await;
        self.outbound
            .send_to(caller, ServerMessage::ControllerRemoved { index });
        Ok(())
    }

    /// Administrative shutdown of one controller.
    pub async fn shutdown_controller(
        &self,
        caller: SessionId,
        index: ControllerIndex,
    ) -> Result<(), HubError> {
        self.force_remove_controller(caller, index).await
    }

    /// Snapshot of every active controller.
    pub async fn active_controllers(&self) -> Vec<ControllerSnapshot> {
        let entries = self.registry.lock().await.controllers.entries();
        self.decorate(entries).await
    }

    /// Raw driver state of every controller.
    pub async fn driver_states(&self) -> Result<BTreeMap<ControllerIndex, ControllerState>, HubError> {
        self.call(self.driver.states()).await
    }

    /// Forward an input packet to the driver.
    pub async fn send_input(
        &self,
        index: ControllerIndex,
        packet: &InputPacket,
    ) -> Result<(), HubError> {
        self.call(self.driver.set_input(index, packet)).await
    }

    /// Start a macro for `session` and watch it to completion.
    pub async fn start_macro(
        self: &Arc<Self>,
        session: SessionId,
        index: ControllerIndex,
        script: String,
    ) -> Result<MacroHandle, HubError> {
        let (handle, token) = {
            let mut reg = self.registry.lock().await;
            reg.require_session(session)?;
            if let Some(running) = reg.macros.get(session) {
                return Err(HubError::MacroAlreadyRunning(running.handle.clone()));
            }
            if !reg.controllers.contains(index) {
                return Err(HubError::ControllerNotFound(index));
            }

            let handle = self.call(self.driver.start_macro(index, &script)).await?;
            let running = RunningMacro::new(handle.clone(), index, script);
            let token = running.cancel_token();
            reg.macros
                .try_insert(session, running)
                .map_err(HubError::MacroAlreadyRunning)?;
            (handle, token)
        };

        info!(session = %session, %index, handle = %handle, "macro started");
        self.outbound.send_to(
            session,
            ServerMessage::MacroStarted {
                handle: handle.clone(),
                index,
            },
        );
        watcher::spawn(Arc::clone(self), session, handle.clone(), index, token);
        Ok(handle)
    }

    /// Stop the session's running macro.
    pub async fn stop_macro(&self, session: SessionId) -> Result<MacroInfo, HubError> {
        let running = self
            .registry
            .lock()
            .await
            .macros
            .take(session)
            .ok_or(HubError::NoRunningMacro)?;
        running.cancel();

        self.best_effort("stop_macro", running.index, || {
            self.driver.stop_macro(running.index, &running.handle)
        })
        .await;

        info!(session = %session, index = %running.index, handle = %running.handle, "macro stopped");
        self.outbound.send_to(
            session,
            ServerMessage::MacroStopped {
                handle: running.handle.clone(),
                index: running.index,
            },
        );
        Ok(running.info())
    }

    /// The session's running macro, if any.
    pub async fn macro_status(&self, session: SessionId) -> Option<MacroInfo> {
        self.registry
            .lock()
            .await
            .macros
            .get(session)
            .map(RunningMacro::info)
    }

    /// Number of connected sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.sessions.len()
    }

    /// Members of a controller, or `None` if it is not active.
    pub async fn members(&self, index: ControllerIndex) -> Option<Vec<SessionId>> {
        self.registry
            .lock()
            .await
            .controllers
            .get(index)
            .map(|c| c.members.iter().copied().collect())
    }

    /// Controller a session is attached to.
    pub async fn assigned_controller(&self, session: SessionId) -> Option<ControllerIndex> {
        self.registry
            .lock()
            .await
            .sessions
            .get(&session)
            .and_then(|c| c.controller)
    }

    pub(crate) async fn poll_macro(
        &self,
        index: ControllerIndex,
    ) -> Result<Option<ControllerState>, HubError> {
        self.call(self.driver.controller_state(index)).await
    }

    /// Retire a finished macro and notify its owner. Returns `false` if the
    /// entry was already gone or replaced.
    pub(crate) async fn complete_macro(&self, session: SessionId, handle: &MacroHandle) -> bool {
        let removed = self.registry.lock().await.macros.remove_if(session, handle);
        match removed {
            Some(running) => {
                self.outbound.send_to(
                    session,
                    ServerMessage::MacroCompleted {
                        handle: running.handle,
                        index: running.index,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Drop a macro the watcher can no longer follow.
    pub(crate) async fn abandon_macro(&self, session: SessionId, handle: &MacroHandle) {
        self.registry.lock().await.macros.remove_if(session, handle);
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> Result<T, HubError> {
        match tokio::time::timeout(self.settings.driver_timeout, fut).await {
            Ok(result) => result.map_err(HubError::from),
            Err(_) => Err(HubError::DriverTimeout(self.settings.driver_timeout)),
        }
    }

    /// Run a cleanup call with retries. Failures are logged, never returned.
    async fn best_effort<F, Fut>(&self, operation: &'static str, index: ControllerIndex, mut op: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DriverError>>,
    {
        let attempts = self.settings.cleanup_attempts.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.settings.driver_timeout, op()).await {
                Ok(Ok(())) => return,
                Ok(Err(DriverError::ControllerNotFound(_))) => {
                    debug!(operation, %index, "controller already gone");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(operation, %index, attempt, error = %e, "cleanup call failed");
                }
                Err(_) => {
                    warn!(operation, %index, attempt, "cleanup call timed out");
                }
            }
        }
        error!(operation, %index, attempts, "giving up on cleanup call");
    }

    async fn decorate(&self, entries: Vec<SnapshotEntry>) -> Vec<ControllerSnapshot> {
        if entries.is_empty() {
            return Vec::new();
        }
        let states = match self.call(self.driver.states()).await {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "failed to query driver state for snapshot");
                BTreeMap::new()
            }
        };
        decorate(entries, &states)
    }

    /// Broadcast a snapshot unless a newer generation has already gone out.
    async fn broadcast_snapshot(&self, captured: Captured) {
        let controllers = self.decorate(captured.entries).await;
        let mut sent = self.broadcast_order.lock().await;
        if captured.generation <= *sent {
            debug!(generation = captured.generation, latest = *sent, "dropping superseded snapshot");
            return;
        }
        self.outbound
            .broadcast(&ServerMessage::ActiveControllers { controllers });
        *sent = captured.generation;
    }

    /// Tell the owners of macros dropped with their controller.
    fn notify_dropped(&self, dropped: Vec<(SessionId, RunningMacro)>) {
        for (owner, running) in dropped {
            self.outbound.send_to(
                owner,
                ServerMessage::MacroStopped {
                    handle: running.handle,
                    index: running.index,
                },
            );
        }
    }
}
