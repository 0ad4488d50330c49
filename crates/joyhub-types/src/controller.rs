//! Controller descriptors and driver-reported state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ControllerIndex, MacroHandle};

/// Kind of controller the driver emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerType {
    #[default]
    ProController,
    JoyConLeft,
    JoyConRight,
}

impl std::fmt::Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProController => write!(f, "Pro Controller"),
            Self::JoyConLeft => write!(f, "Joy-Con (L)"),
            Self::JoyConRight => write!(f, "Joy-Con (R)"),
        }
    }
}

/// Connection status of a controller as reported by the driver.
///
/// `Unknown` is never reported by a driver; snapshots use it when no state
/// could be read for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    Initializing,
    Connecting,
    Reconnecting,
    Connected,
    Crashed,
    Unknown,
}

/// Point-in-time state of one driver controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub status: ControllerStatus,
    /// Handles of macros the driver has finished executing.
    #[serde(default)]
    pub finished_macros: Vec<MacroHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControllerState {
    /// Whether the driver reports `handle` as finished.
    pub fn has_finished(&self, handle: &MacroHandle) -> bool {
        self.finished_macros.contains(handle)
    }
}

/// One entry of the active-controller snapshot pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub index: ControllerIndex,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub controller_type: ControllerType,
    pub client_count: usize,
    pub driver_state: ControllerStatus,
    pub connected_device_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_type_wire_names() {
        let json = serde_json::to_string(&ControllerType::ProController).unwrap();
        assert_eq!(json, "\"pro_controller\"");
        assert_eq!(ControllerType::ProController.to_string(), "Pro Controller");
    }

    #[test]
    fn finished_lookup() {
        let state = ControllerState {
            status: ControllerStatus::Connected,
            finished_macros: vec![MacroHandle("a".into())],
            error: None,
        };
        assert!(state.has_finished(&MacroHandle("a".into())));
        assert!(!state.has_finished(&MacroHandle("b".into())));
    }

    #[test]
    fn state_tolerates_missing_optional_fields() {
        let state: ControllerState = serde_json::from_str(r#"{"status":"reconnecting"}"#).unwrap();
        assert_eq!(state.status, ControllerStatus::Reconnecting);
        assert!(state.finished_macros.is_empty());
        assert!(state.error.is_none());
    }
}
