//! Domain events emitted after a task mutation commits.
//!
//! Wire shape (one WebSocket text frame per event):
//!
//! ```json
//! {"event":"task_created","task_id":1,"task":{"id":1,"title":"Buy milk",...}}
//! {"event":"task_deleted","task_id":1}
//! ```

use serde::{Deserialize, Serialize, Serializer};

use crate::ids::TaskId;
use crate::task::TaskSnapshot;

/// Which mutation produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was created.
    TaskCreated,
    /// A task was updated.
    TaskUpdated,
    /// A task was deleted.
    TaskDeleted,
}

impl EventKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskDeleted => "task_deleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one committed task mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// Snapshot of the newly created task.
    TaskCreated(TaskSnapshot),
    /// Snapshot of the task after the update.
    TaskUpdated(TaskSnapshot),
    /// Id of the removed task.
    TaskDeleted(TaskId),
}

impl DomainEvent {
    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated(_) => EventKind::TaskCreated,
            Self::TaskUpdated(_) => EventKind::TaskUpdated,
            Self::TaskDeleted(_) => EventKind::TaskDeleted,
        }
    }

    /// Id of the affected task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::TaskCreated(task) | Self::TaskUpdated(task) => task.id,
            Self::TaskDeleted(id) => *id,
        }
    }

    /// Task snapshot, absent for deletions.
    #[must_use]
    pub const fn task(&self) -> Option<&TaskSnapshot> {
        match self {
            Self::TaskCreated(task) | Self::TaskUpdated(task) => Some(task),
            Self::TaskDeleted(_) => None,
        }
    }
}

#[derive(Serialize)]
struct EventMessage<'a> {
    event: EventKind,
    task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<&'a TaskSnapshot>,
}

impl Serialize for DomainEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EventMessage {
            event: self.kind(),
            task_id: self.task_id(),
            task: self.task(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot(id: i64, title: &str) -> TaskSnapshot {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        TaskSnapshot {
            id: TaskId::new(id),
            title: title.into(),
            description: None,
            completed: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn created_event_wire_shape() {
        let event = DomainEvent::TaskCreated(snapshot(1, "Buy milk"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_created");
        assert_eq!(json["task_id"], 1);
        assert_eq!(json["task"]["title"], "Buy milk");
        assert_eq!(json["task"]["completed"], false);
        assert_eq!(json["task"]["created_at"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn deleted_event_has_no_task() {
        let event = DomainEvent::TaskDeleted(TaskId::new(9));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_deleted");
        assert_eq!(json["task_id"], 9);
        assert!(json.get("task").is_none());
    }

    #[test]
    fn kind_and_task_id_accessors() {
        let event = DomainEvent::TaskUpdated(snapshot(4, "x"));
        assert_eq!(event.kind(), EventKind::TaskUpdated);
        assert_eq!(event.task_id(), TaskId::new(4));
        assert!(event.task().is_some());
    }

    #[test]
    fn kind_display_matches_serde() {
        for kind in [EventKind::TaskCreated, EventKind::TaskUpdated, EventKind::TaskDeleted] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
