//! Per-connection session attributes.

use chrono::{DateTime, Utc};
use joyhub_types::ControllerIndex;

/// Transient attributes of one connected client.
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Controller this session is attached to, if any.
    pub controller: Option<ControllerIndex>,
    /// Device identity of the attached controller's target console.
    pub target_device: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            controller: None,
            target_device: None,
            connected_at: Utc::now(),
        }
    }

    pub fn attach(&mut self, index: ControllerIndex, target_device: Option<String>) {
        self.controller = Some(index);
        self.target_device = target_device;
    }

    /// Clear the attachment, returning the controller it pointed at.
    pub fn detach(&mut self) -> Option<ControllerIndex> {
        self.target_device = None;
        self.controller.take()
    }

    /// Clear the attachment only if it points at `index`.
    pub fn detach_from(&mut self, index: ControllerIndex) -> bool {
        if self.controller == Some(index) {
            self.detach();
            true
        } else {
            false
        }
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}
