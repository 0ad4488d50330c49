//! Controller membership table and snapshot assembly.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use joyhub_types::{
    ControllerIndex, ControllerSnapshot, ControllerState, ControllerStatus, ControllerType,
    SessionId,
};

/// Label shown for controllers that were not targeted at a known device.
pub const NEW_DEVICE_LABEL: &str = "New device";

/// A driver controller and the sessions sharing it.
#[derive(Debug, Clone)]
pub struct ActiveController {
    pub members: BTreeSet<SessionId>,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub kind: ControllerType,
}

impl ActiveController {
    /// A freshly created controller with `creator` as its only member.
    pub fn new(creator: SessionId, device_id: Option<String>, kind: ControllerType) -> Self {
        Self {
            members: BTreeSet::from([creator]),
            device_id,
            created_at: Utc::now(),
            kind,
        }
    }
}

/// Outcome of removing a session from a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// No controller at that index.
    NoController,
    /// The controller exists but the session was not a member.
    NotMember,
    /// The session left; `remaining` members are still attached.
    Left { remaining: usize },
}

/// Active controllers keyed by driver index.
#[derive(Debug, Default)]
pub struct ControllerTable {
    entries: BTreeMap<ControllerIndex, ActiveController>,
}

impl ControllerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller, returning any stale entry it replaced.
    pub fn insert(
        &mut self,
        index: ControllerIndex,
        controller: ActiveController,
    ) -> Option<ActiveController> {
        self.entries.insert(index, controller)
    }

    pub fn get(&self, index: ControllerIndex) -> Option<&ActiveController> {
        self.entries.get(&index)
    }

    pub fn contains(&self, index: ControllerIndex) -> bool {
        self.entries.contains_key(&index)
    }

    /// Add `session` to a controller's members.
    pub fn attach(
        &mut self,
        index: ControllerIndex,
        session: SessionId,
    ) -> Option<&ActiveController> {
        let controller = self.entries.get_mut(&index)?;
        controller.members.insert(session);
        Some(controller)
    }

    /// Remove `session` from a controller's members. Never removes the entry.
    pub fn detach(&mut self, index: ControllerIndex, session: SessionId) -> Detached {
        match self.entries.get_mut(&index) {
            None => Detached::NoController,
            Some(controller) => {
                if controller.members.remove(&session) {
                    Detached::Left {
                        remaining: controller.members.len(),
                    }
                } else {
                    Detached::NotMember
                }
            }
        }
    }

    pub fn remove(&mut self, index: ControllerIndex) -> Option<ActiveController> {
        self.entries.remove(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registry half of a snapshot, copied under the coordinator lock.
    pub fn entries(&self) -> Vec<SnapshotEntry> {
        self.entries
            .iter()
            .map(|(index, controller)| SnapshotEntry {
                index: *index,
                device_id: controller.device_id.clone(),
                created_at: controller.created_at,
                kind: controller.kind,
                client_count: controller.members.len(),
            })
            .collect()
    }
}

/// Membership data of one controller, before driver-state enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub index: ControllerIndex,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub kind: ControllerType,
    pub client_count: usize,
}

impl SnapshotEntry {
    fn into_snapshot(self, driver_state: ControllerStatus) -> ControllerSnapshot {
        let connected_device_label = self
            .device_id
            .clone()
            .unwrap_or_else(|| NEW_DEVICE_LABEL.to_string());
        ControllerSnapshot {
            index: self.index,
            device_id: self.device_id,
            created_at: self.created_at,
            controller_type: self.kind,
            client_count: self.client_count,
            driver_state,
            connected_device_label,
        }
    }
}

/// Attach driver status to snapshot entries. Controllers the driver did not
/// report read as [`ControllerStatus::Unknown`].
pub fn decorate(
    entries: Vec<SnapshotEntry>,
    states: &BTreeMap<ControllerIndex, ControllerState>,
) -> Vec<ControllerSnapshot> {
    entries
        .into_iter()
        .map(|entry| {
            let status = states
                .get(&entry.index)
                .map_or(ControllerStatus::Unknown, |state| state.status);
            entry.into_snapshot(status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_detach_track_members() {
        let mut table = ControllerTable::new();
        let a = SessionId::new();
        let b = SessionId::new();
        table.insert(
            ControllerIndex(0),
            ActiveController::new(a, None, ControllerType::ProController),
        );

        assert!(table.attach(ControllerIndex(0), b).is_some());
        assert!(table.attach(ControllerIndex(1), b).is_none());
        assert_eq!(table.get(ControllerIndex(0)).unwrap().members.len(), 2);

        assert_eq!(
            table.detach(ControllerIndex(0), a),
            Detached::Left { remaining: 1 }
        );
        assert_eq!(table.detach(ControllerIndex(0), a), Detached::NotMember);
        assert_eq!(
            table.detach(ControllerIndex(0), b),
            Detached::Left { remaining: 0 }
        );
        // Emptying the member set leaves the entry in place.
        assert!(table.contains(ControllerIndex(0)));
        assert_eq!(table.detach(ControllerIndex(5), a), Detached::NoController);
    }

    #[test]
    fn attaching_twice_counts_once() {
        let mut table = ControllerTable::new();
        let a = SessionId::new();
        table.insert(
            ControllerIndex(0),
            ActiveController::new(a, None, ControllerType::ProController),
        );
        table.attach(ControllerIndex(0), a);
        assert_eq!(table.entries()[0].client_count, 1);
    }

    #[test]
    fn decorate_fills_status_and_label() {
        let mut table = ControllerTable::new();
        let a = SessionId::new();
        table.insert(
            ControllerIndex(0),
            ActiveController::new(a, Some("AA:BB".into()), ControllerType::ProController),
        );
        table.insert(
            ControllerIndex(1),
            ActiveController::new(a, None, ControllerType::ProController),
        );

        let mut states = BTreeMap::new();
        states.insert(
            ControllerIndex(0),
            ControllerState {
                status: ControllerStatus::Reconnecting,
                finished_macros: Vec::new(),
                error: None,
            },
        );

        let snapshot = decorate(table.entries(), &states);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].driver_state, ControllerStatus::Reconnecting);
        assert_eq!(snapshot[0].connected_device_label, "AA:BB");
        assert_eq!(snapshot[1].driver_state, ControllerStatus::Unknown);
        assert_eq!(snapshot[1].connected_device_label, NEW_DEVICE_LABEL);
    }
}
