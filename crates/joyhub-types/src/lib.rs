//! Shared types for joyhub.
//!
//! This crate contains all types shared across the joyhub workspace:
//! session and controller identifiers, driver-reported controller state,
//! persisted device and macro records, and the WebSocket message protocol.

pub mod controller;
pub mod ids;
pub mod message;
pub mod records;

pub use controller::{ControllerSnapshot, ControllerState, ControllerStatus, ControllerType};
pub use ids::{ControllerIndex, MacroHandle, SessionId};
pub use message::{ClientMessage, ErrorCode, InputPacket, MacroInfo, ServerMessage};
pub use records::{KnownDevice, SavedMacro};
