//! Request dispatch for one session.

use std::sync::Arc;

use joyhub_driver::ControllerDriver;
use joyhub_store::Store;
use joyhub_types::{ClientMessage, ServerMessage, SessionId};
use tracing::debug;

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::error::HubError;
use crate::setup;

/// Shared application state: the coordinator and the persistent store.
#[derive(Clone)]
pub struct Hub {
    coordinator: Arc<Coordinator>,
    store: Arc<Store>,
}

impl Hub {
    /// Build a hub over `driver`, storing data where `config` says.
    pub fn new(config: &Config, driver: Arc<dyn ControllerDriver>) -> Self {
        let store = Store::open(setup::data_dir(config));
        Self::with_store(CoordinatorSettings::from(config), driver, store)
    }

    pub fn with_store(
        settings: CoordinatorSettings,
        driver: Arc<dyn ControllerDriver>,
        store: Store,
    ) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(driver, settings)),
            store: Arc::new(store),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Handle one decoded client message.
    ///
    /// Responses go through the session's outbound channel; the error is
    /// returned for the transport to report.
    pub async fn dispatch(&self, session: SessionId, message: ClientMessage) -> Result<(), HubError> {
        let coordinator = &self.coordinator;
        match message {
            ClientMessage::CreateController { device_id } => {
                coordinator.create_controller(session, device_id).await?;
            }
            ClientMessage::JoinControllerSession { index } => {
                coordinator.join_controller(session, index).await?;
            }
            ClientMessage::LeaveControllerSession => {
                coordinator.leave_controller(session).await?;
            }
            ClientMessage::ForceRemoveController { index } => {
                coordinator.force_remove_controller(session, index).await?;
            }
            ClientMessage::Shutdown { index } => {
                coordinator.shutdown_controller(session, index).await?;
            }
            ClientMessage::GetActiveControllers => {
                let controllers = coordinator.active_controllers().await;
                self.reply(session, ServerMessage::ActiveControllers { controllers });
            }
            ClientMessage::GetDriverState => {
                let controllers = coordinator.driver_states().await?;
                self.reply(session, ServerMessage::DriverState { controllers });
            }
            ClientMessage::Input { index, packet } => {
                coordinator.send_input(index, &packet).await?;
            }
            ClientMessage::StartMacro { index, script } => {
                coordinator.start_macro(session, index, script).await?;
            }
            ClientMessage::StopMacro => match coordinator.stop_macro(session).await {
                Ok(_) => {}
                Err(HubError::NoRunningMacro) => {
                    debug!(session = %session, "stop_macro with nothing running");
                }
                Err(e) => return Err(e),
            },
            ClientMessage::GetMacroStatus => {
                let info = coordinator.macro_status(session).await;
                self.reply(
                    session,
                    ServerMessage::MacroStatus {
                        running: info.is_some(),
                        info,
                    },
                );
            }
            ClientMessage::DeviceConnected { device_id, name } => {
                let devices = self.store.record_device(&device_id, name.as_deref()).await?;
                self.reply(session, ServerMessage::KnownDevicesUpdated { devices });
            }
            ClientMessage::GetKnownDevices => {
                let devices = self.store.known_devices().await?;
                self.reply(session, ServerMessage::KnownDevices { devices });
            }
            ClientMessage::DeleteKnownDevice { device_id } => {
                if let Some(devices) = self.store.delete_device(&device_id).await? {
                    self.reply(session, ServerMessage::KnownDevicesUpdated { devices });
                }
            }
            ClientMessage::RenameKnownDevice { device_id, name } => {
                if let Some(devices) = self.store.rename_device(&device_id, &name).await? {
                    self.reply(session, ServerMessage::KnownDevicesUpdated { devices });
                }
            }
            ClientMessage::GetMacros => {
                let macros = self.store.macros().await?;
                self.reply(session, ServerMessage::Macros { macros });
            }
            ClientMessage::SaveMacro { name, content } => {
                if name.is_empty() || content.is_empty() {
                    return Err(HubError::InvalidRequest(
                        "macro name and content are required".to_string(),
                    ));
                }
                let macros = self.store.save_macro(&name, &content).await?;
                self.reply(session, ServerMessage::MacrosUpdated { macros });
            }
            ClientMessage::DeleteMacro { name } => {
                if let Some(macros) = self.store.delete_macro(&name).await? {
                    self.reply(session, ServerMessage::MacrosUpdated { macros });
                }
            }
            ClientMessage::UpdateMacro {
                old_name,
                new_name,
                content,
            } => {
                if new_name.is_empty() || content.is_empty() {
                    return Err(HubError::InvalidRequest(
                        "macro name and content are required".to_string(),
                    ));
                }
                if let Some(macros) = self
                    .store
                    .update_macro(&old_name, &new_name, &content)
                    .await?
                {
                    self.reply(session, ServerMessage::MacrosUpdated { macros });
                }
            }
            ClientMessage::Ping => self.reply(session, ServerMessage::Pong),
        }
        Ok(())
    }

    fn reply(&self, session: SessionId, message: ServerMessage) {
        self.coordinator.outbound().send_to(session, message);
    }
}
