//! Mock controller driver for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use joyhub_types::{
    ControllerIndex, ControllerState, ControllerStatus, ControllerType, InputPacket, MacroHandle,
};
use tracing::debug;
use uuid::Uuid;

use crate::error::DriverError;
use crate::ControllerDriver;

/// One emulated controller inside the mock.
#[derive(Debug, Clone)]
struct MockController {
    kind: ControllerType,
    reconnect: Vec<String>,
    status: ControllerStatus,
    inputs: Vec<InputPacket>,
    /// Running macros: handle -> script.
    running: HashMap<MacroHandle, String>,
    finished: Vec<MacroHandle>,
    stopped: Vec<MacroHandle>,
}

/// Shared state for observing and steering what `MockDriver` does.
#[derive(Debug, Default)]
struct MockDriverState {
    controllers: BTreeMap<ControllerIndex, MockController>,
    next_index: u32,
    removed: Vec<ControllerIndex>,
    /// Removals of controllers that did not exist.
    missed_removals: usize,
    /// Every `remove_controller` call, including failed and stalled ones.
    remove_attempts: usize,
    failing_removes: usize,
    remove_delay: Option<Duration>,
    reconnect_targets: Vec<String>,
    fail_next_create: Option<String>,
    fail_state_queries: bool,
    create_delay: Option<Duration>,
}

/// In-memory controller driver.
///
/// Controllers are "connected" as soon as they are created. Macros stay
/// running until a test calls [`MockDriverHandle::finish_macro`], or until
/// the configured macro duration elapses.
pub struct MockDriver {
    state: Arc<Mutex<MockDriverState>>,
    macro_duration: Option<Duration>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a new mock driver.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockDriverState::default())),
            macro_duration: None,
        }
    }

    /// Finish every macro on its own after `duration`.
    #[must_use]
    pub fn with_macro_duration(mut self, duration: Duration) -> Self {
        self.macro_duration = Some(duration);
        self
    }

    /// Get a clonable handle for observing the driver from tests.
    pub fn handle(&self) -> MockDriverHandle {
        MockDriverHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for `MockDriver`.
#[derive(Clone)]
pub struct MockDriverHandle {
    state: Arc<Mutex<MockDriverState>>,
}

impl MockDriverHandle {
    /// Indices of all live controllers.
    pub fn live_controllers(&self) -> Vec<ControllerIndex> {
        self.state.lock().unwrap().controllers.keys().copied().collect()
    }

    pub fn is_live(&self, index: ControllerIndex) -> bool {
        self.state.lock().unwrap().controllers.contains_key(&index)
    }

    /// Kind and reconnect list a controller was created with.
    pub fn created_with(&self, index: ControllerIndex) -> Option<(ControllerType, Vec<String>)> {
        self.state
            .lock()
            .unwrap()
            .controllers
            .get(&index)
            .map(|c| (c.kind, c.reconnect.clone()))
    }

    /// Every input packet applied to a controller, in order.
    pub fn inputs(&self, index: ControllerIndex) -> Vec<InputPacket> {
        self.state
            .lock()
            .unwrap()
            .controllers
            .get(&index)
            .map(|c| c.inputs.clone())
            .unwrap_or_default()
    }

    /// Handles of macros still running on a controller.
    pub fn running_macros(&self, index: ControllerIndex) -> Vec<MacroHandle> {
        self.state
            .lock()
            .unwrap()
            .controllers
            .get(&index)
            .map(|c| c.running.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Handles passed to `stop_macro` for a controller.
    pub fn stopped_macros(&self, index: ControllerIndex) -> Vec<MacroHandle> {
        self.state
            .lock()
            .unwrap()
            .controllers
            .get(&index)
            .map(|c| c.stopped.clone())
            .unwrap_or_default()
    }

    /// Mark a running macro as finished. Returns `false` if it was not running.
    pub fn finish_macro(&self, index: ControllerIndex, handle: &MacroHandle) -> bool {
        finish(&self.state, index, handle)
    }

    /// Every index passed to a successful `remove_controller`, in order.
    pub fn removed(&self) -> Vec<ControllerIndex> {
        self.state.lock().unwrap().removed.clone()
    }

    /// Number of `remove_controller` calls for controllers that did not exist.
    pub fn missed_removals(&self) -> usize {
        self.state.lock().unwrap().missed_removals
    }

    /// Number of `remove_controller` calls made, whatever their outcome.
    pub fn remove_attempts(&self) -> usize {
        self.state.lock().unwrap().remove_attempts
    }

    /// Make the next `count` `remove_controller` calls fail.
    pub fn fail_next_removes(&self, count: usize) {
        self.state.lock().unwrap().failing_removes = count;
    }

    /// Delay every `remove_controller` call by `delay`.
    pub fn set_remove_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().remove_delay = delay;
    }

    pub fn set_status(&self, index: ControllerIndex, status: ControllerStatus) {
        if let Some(controller) = self.state.lock().unwrap().controllers.get_mut(&index) {
            controller.status = status;
        }
    }

    pub fn set_reconnect_targets(&self, targets: Vec<String>) {
        self.state.lock().unwrap().reconnect_targets = targets;
    }

    /// Make the next `create_controller` call fail with `message`.
    pub fn fail_next_create(&self, message: &str) {
        self.state.lock().unwrap().fail_next_create = Some(message.to_string());
    }

    /// Make every state query fail while `fail` is set.
    pub fn fail_state_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_state_queries = fail;
    }

    /// Delay every `create_controller` call by `delay`.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().create_delay = delay;
    }
}

fn finish(state: &Mutex<MockDriverState>, index: ControllerIndex, handle: &MacroHandle) -> bool {
    let mut state = state.lock().unwrap();
    let Some(controller) = state.controllers.get_mut(&index) else {
        return false;
    };
    if controller.running.remove(handle).is_some() {
        controller.finished.push(handle.clone());
        true
    } else {
        false
    }
}

fn not_found(index: ControllerIndex) -> DriverError {
    DriverError::ControllerNotFound(index)
}

#[async_trait]
impl ControllerDriver for MockDriver {
    async fn create_controller(
        &self,
        kind: ControllerType,
        reconnect: &[String],
    ) -> Result<ControllerIndex, DriverError> {
        let delay = self.state.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next_create.take() {
            return Err(DriverError::Create(message));
        }
        let index = ControllerIndex(state.next_index);
        state.next_index += 1;
        state.controllers.insert(
            index,
            MockController {
                kind,
                reconnect: reconnect.to_vec(),
                status: ControllerStatus::Connected,
                inputs: Vec::new(),
                running: HashMap::new(),
                finished: Vec::new(),
                stopped: Vec::new(),
            },
        );
        debug!(%index, ?kind, "mock controller created");
        Ok(index)
    }

    async fn remove_controller(&self, index: ControllerIndex) -> Result<(), DriverError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.remove_attempts += 1;
            state.remove_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_removes > 0 {
            state.failing_removes -= 1;
            return Err(DriverError::Unavailable);
        }
        if state.controllers.remove(&index).is_some() {
            state.removed.push(index);
            debug!(%index, "mock controller removed");
            Ok(())
        } else {
            state.missed_removals += 1;
            Err(not_found(index))
        }
    }

    async fn set_input(
        &self,
        index: ControllerIndex,
        packet: &InputPacket,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let controller = state.controllers.get_mut(&index).ok_or(not_found(index))?;
        controller.inputs.push(packet.clone());
        Ok(())
    }

    async fn start_macro(
        &self,
        index: ControllerIndex,
        script: &str,
    ) -> Result<MacroHandle, DriverError> {
        let handle = MacroHandle(Uuid::new_v4().to_string());
        {
            let mut state = self.state.lock().unwrap();
            let controller = state.controllers.get_mut(&index).ok_or(not_found(index))?;
            controller.running.insert(handle.clone(), script.to_string());
        }

        if let Some(duration) = self.macro_duration {
            let state = Arc::clone(&self.state);
            let finished = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                finish(&state, index, &finished);
            });
        }
        Ok(handle)
    }

    async fn stop_macro(
        &self,
        index: ControllerIndex,
        handle: &MacroHandle,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let controller = state.controllers.get_mut(&index).ok_or(not_found(index))?;
        controller.running.remove(handle);
        controller.stopped.push(handle.clone());
        Ok(())
    }

    async fn controller_state(
        &self,
        index: ControllerIndex,
    ) -> Result<Option<ControllerState>, DriverError> {
        let state = self.state.lock().unwrap();
        if state.fail_state_queries {
            return Err(DriverError::State("mock state query failure".to_string()));
        }
        Ok(state.controllers.get(&index).map(to_state))
    }

    async fn states(&self) -> Result<BTreeMap<ControllerIndex, ControllerState>, DriverError> {
        let state = self.state.lock().unwrap();
        if state.fail_state_queries {
            return Err(DriverError::State("mock state query failure".to_string()));
        }
        Ok(state
            .controllers
            .iter()
            .map(|(index, controller)| (*index, to_state(controller)))
            .collect())
    }

    async fn reconnect_targets(&self) -> Result<Vec<String>, DriverError> {
        Ok(self.state.lock().unwrap().reconnect_targets.clone())
    }
}

fn to_state(controller: &MockController) -> ControllerState {
    ControllerState {
        status: controller.status,
        finished_macros: controller.finished.clone(),
        error: None,
    }
}
