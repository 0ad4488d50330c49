//! WebSocket message types.
//!
//! Every frame is a JSON object tagged by `"type"`. Clients send
//! [`ClientMessage`]s; the hub answers and pushes [`ServerMessage`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::{ControllerSnapshot, ControllerState};
use crate::ids::{ControllerIndex, MacroHandle};
use crate::records::{KnownDevice, SavedMacro};

/// Raw controller input as produced by the browser client.
///
/// The hub never interprets input packets; they go to the driver untouched.
pub type InputPacket = serde_json::Value;

/// Messages sent from a client to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a new controller, optionally reconnecting to a known device.
    CreateController {
        #[serde(default)]
        device_id: Option<String>,
    },
    /// Attach to an existing controller.
    JoinControllerSession { index: ControllerIndex },
    /// Detach from the current controller without removing it.
    LeaveControllerSession,
    /// Administrative: remove a controller and evict its sessions.
    ForceRemoveController { index: ControllerIndex },
    /// Administrative: shut a controller down. Same effect as a force-remove.
    Shutdown { index: ControllerIndex },
    GetActiveControllers,
    /// Raw driver state for every controller.
    GetDriverState,
    /// Forward an input packet to a controller.
    Input {
        index: ControllerIndex,
        packet: InputPacket,
    },
    StartMacro {
        index: ControllerIndex,
        script: String,
    },
    StopMacro,
    GetMacroStatus,
    /// A controller finished pairing with a device; remember it.
    DeviceConnected {
        device_id: String,
        #[serde(default)]
        name: Option<String>,
    },
    GetKnownDevices,
    DeleteKnownDevice { device_id: String },
    RenameKnownDevice { device_id: String, name: String },
    GetMacros,
    SaveMacro { name: String, content: String },
    DeleteMacro { name: String },
    UpdateMacro {
        old_name: String,
        new_name: String,
        content: String,
    },
    /// Keepalive.
    Ping,
}

/// Messages sent from the hub to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full snapshot of active controllers.
    ActiveControllers { controllers: Vec<ControllerSnapshot> },
    ControllerCreated { index: ControllerIndex },
    JoinedControllerSession {
        index: ControllerIndex,
        device_id: Option<String>,
        created_at: DateTime<Utc>,
    },
    LeftControllerSession { index: ControllerIndex },
    /// The controller this session was attached to was removed by an admin.
    ControllerForceRemoved { index: ControllerIndex },
    /// Acknowledges a force-remove or shutdown to the requesting session.
    ControllerRemoved { index: ControllerIndex },
    DriverState {
        controllers: BTreeMap<ControllerIndex, ControllerState>,
    },
    MacroStarted {
        handle: MacroHandle,
        index: ControllerIndex,
    },
    MacroStopped {
        handle: MacroHandle,
        index: ControllerIndex,
    },
    /// Pushed to the owning session only.
    MacroCompleted {
        handle: MacroHandle,
        index: ControllerIndex,
    },
    MacroStatus {
        running: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<MacroInfo>,
    },
    KnownDevices {
        devices: BTreeMap<String, KnownDevice>,
    },
    KnownDevicesUpdated {
        devices: BTreeMap<String, KnownDevice>,
    },
    Macros {
        macros: BTreeMap<String, SavedMacro>,
    },
    MacrosUpdated {
        macros: BTreeMap<String, SavedMacro>,
    },
    /// Response to ping.
    Pong,
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// Shorthand for an error frame.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Metadata of a running macro, as reported by `macro_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroInfo {
    pub handle: MacroHandle,
    pub index: ControllerIndex,
    pub script: String,
    pub started_at: DateTime<Utc>,
}

/// Machine-readable category of an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Conflict,
    DriverFailure,
    Forbidden,
    InvalidRequest,
    Storage,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerStatus, ControllerType};

    #[test]
    fn client_messages_parse_from_browser_json() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"create_controller"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CreateController { device_id: None }));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"create_controller","device_id":"7C:BB:8A:00:11:22"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::CreateController { device_id } => {
                assert_eq!(device_id.as_deref(), Some("7C:BB:8A:00:11:22"));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join_controller_session","index":2}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::JoinControllerSession {
                index: ControllerIndex(2)
            }
        ));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"input","index":0,"packet":{"A":true,"L_STICK":{"X_VALUE":100}}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Input { index, packet } => {
                assert_eq!(index, ControllerIndex(0));
                assert_eq!(packet["A"], serde_json::Value::Bool(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn error_frame_shape() {
        let json = serde_json::to_value(ServerMessage::error(
            ErrorCode::NotFound,
            "controller 4 not found",
        ))
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["message"], "controller 4 not found");
    }

    #[test]
    fn idle_macro_status_omits_info() {
        let json = serde_json::to_value(ServerMessage::MacroStatus {
            running: false,
            info: None,
        })
        .unwrap();
        assert_eq!(json["type"], "macro_status");
        assert_eq!(json["running"], false);
        assert!(json.get("info").is_none());
    }

    #[test]
    fn snapshot_entry_fields() {
        let snapshot = ServerMessage::ActiveControllers {
            controllers: vec![ControllerSnapshot {
                index: ControllerIndex(0),
                device_id: None,
                created_at: Utc::now(),
                controller_type: ControllerType::ProController,
                client_count: 2,
                driver_state: ControllerStatus::Connected,
                connected_device_label: "New device".to_string(),
            }],
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        let entry = &json["controllers"][0];
        assert_eq!(entry["index"], 0);
        assert_eq!(entry["client_count"], 2);
        assert_eq!(entry["driver_state"], "connected");
        assert_eq!(entry["controller_type"], "pro_controller");
        assert!(entry["device_id"].is_null());
    }

    #[test]
    fn driver_state_keys_by_index() {
        let mut controllers = BTreeMap::new();
        controllers.insert(
            ControllerIndex(1),
            ControllerState {
                status: ControllerStatus::Connecting,
                finished_macros: Vec::new(),
                error: None,
            },
        );
        let msg = ServerMessage::DriverState { controllers };
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }
}
