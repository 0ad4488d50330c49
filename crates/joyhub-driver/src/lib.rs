//! Controller driver abstraction for joyhub.
//!
//! This crate defines the [`ControllerDriver`] trait that a controller
//! emulation engine must implement. The hub treats the driver as a black box:
//! it creates and removes controllers, forwards input packets, and starts,
//! stops and observes macros. The `mock` feature provides an in-memory
//! implementation for tests and for running the hub without hardware.

use std::collections::BTreeMap;

use async_trait::async_trait;
use joyhub_types::{ControllerIndex, ControllerState, ControllerType, InputPacket, MacroHandle};

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::DriverError;

/// Owns the lifecycle and state of emulated controllers.
///
/// Implementations are shared between every connection task and macro
/// watcher, so all methods take `&self`.
#[async_trait]
pub trait ControllerDriver: Send + Sync + 'static {
    /// Create a controller of `kind`.
    ///
    /// `reconnect` lists device identities the controller should try to
    /// reconnect to; an empty list means pairing with a new device.
    async fn create_controller(
        &self,
        kind: ControllerType,
        reconnect: &[String],
    ) -> Result<ControllerIndex, DriverError>;

    /// Remove a controller and release its resources.
    async fn remove_controller(&self, index: ControllerIndex) -> Result<(), DriverError>;

    /// Apply an input packet to a controller.
    async fn set_input(
        &self,
        index: ControllerIndex,
        packet: &InputPacket,
    ) -> Result<(), DriverError>;

    /// Start a macro without waiting for it to finish.
    async fn start_macro(
        &self,
        index: ControllerIndex,
        script: &str,
    ) -> Result<MacroHandle, DriverError>;

    /// Stop a running macro without waiting for the controller to settle.
    async fn stop_macro(
        &self,
        index: ControllerIndex,
        handle: &MacroHandle,
    ) -> Result<(), DriverError>;

    /// Current state of one controller, or `None` if it does not exist.
    async fn controller_state(
        &self,
        index: ControllerIndex,
    ) -> Result<Option<ControllerState>, DriverError>;

    /// Current state of every controller.
    async fn states(&self) -> Result<BTreeMap<ControllerIndex, ControllerState>, DriverError>;

    /// Device identities the driver reconnects to when none is given.
    async fn reconnect_targets(&self) -> Result<Vec<String>, DriverError>;
}
