//! Session coordination and WebSocket server for joyhub.
//!
//! Clients share emulated controllers: one creates a controller, others join
//! it, and the last one to disconnect tears it down. The [`Coordinator`]
//! owns that membership state; [`Hub`] dispatches decoded client messages to
//! it and to the persistent [`joyhub_store::Store`]; [`server`] carries the
//! axum transport.

pub mod broadcast;
pub mod config;
pub mod controllers;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod macros;
pub mod server;
pub mod session;
pub mod setup;
mod watcher;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorSettings};
pub use error::HubError;
pub use hub::Hub;
