use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewProject {
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Status {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub color: String,
    pub position: i64,
}

/// Columns seeded into a project that has none yet.
pub const DEFAULT_STATUSES: [(&str, &str, i64); 4] = [
    ("To Do", "#6b7280", 0),
    ("In Progress", "#0ea5e9", 1),
    ("Review", "#8b5cf6", 2),
    ("Done", "#22c55e", 3),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Assignee {
    pub email: String,
    pub full_name: Option<String>,
}

impl Assignee {
    /// Two-letter badge shown on a card.
    pub fn initials(&self) -> String {
        let source = self
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.email.as_str());
        source.chars().take(2).collect::<String>().to_uppercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub status_id: Option<Uuid>,
    #[serde(default)]
    pub assignee: Option<Assignee>,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub status_id: Option<Uuid>,
}

/// Partial update for a task. `None` leaves the field untouched; the nested
/// options on nullable fields distinguish "clear" from "keep".
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<NaiveDate>>,
    pub status_id: Option<Option<Uuid>>,
    pub position: Option<i64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.status_id.is_none()
            && self.position.is_none()
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(status_id) = self.status_id {
            task.status_id = status_id;
        }
        if let Some(position) = self.position {
            task.position = position;
        }
    }
}

/// A change notification scoped to one project. Task events carry the full
/// snapshot; deletes carry only the identifier.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    TaskCreated(Task),
    TaskUpdated(Task),
    TaskDeleted { id: Uuid, project_id: Uuid },
    StatusCreated(Status),
    StatusUpdated(Status),
}

impl ChangeEvent {
    pub fn project_id(&self) -> Uuid {
        match self {
            ChangeEvent::TaskCreated(task) | ChangeEvent::TaskUpdated(task) => task.project_id,
            ChangeEvent::TaskDeleted { project_id, .. } => *project_id,
            ChangeEvent::StatusCreated(status) | ChangeEvent::StatusUpdated(status) => {
                status.project_id
            }
        }
    }

    pub fn entity_id(&self) -> Uuid {
        match self {
            ChangeEvent::TaskCreated(task) | ChangeEvent::TaskUpdated(task) => task.id,
            ChangeEvent::TaskDeleted { id, .. } => *id,
            ChangeEvent::StatusCreated(status) | ChangeEvent::StatusUpdated(status) => status.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::TaskCreated(_) => "task_created",
            ChangeEvent::TaskUpdated(_) => "task_updated",
            ChangeEvent::TaskDeleted { .. } => "task_deleted",
            ChangeEvent::StatusCreated(_) => "status_created",
            ChangeEvent::StatusUpdated(_) => "status_updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            title: "Write release notes".to_string(),
            description: None,
            priority: Priority::default(),
            due_date: None,
            status_id: None,
            assignee: None,
            position: 0,
        }
    }

    #[test]
    fn test_priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!(Priority::from_str("LOW"), Ok(Priority::Low));
        assert_eq!(Priority::from_str("  urgent "), Ok(Priority::Urgent));
        assert_eq!(Priority::from_str("normal"), Ok(Priority::Medium));
        assert_eq!(Priority::from_str("critical"), Err(()));
    }

    #[test]
    fn test_priority_serializes_lowercase() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
    }

    #[test]
    fn test_assignee_initials_prefer_full_name() {
        let assignee = Assignee {
            email: "sam@example.com".to_string(),
            full_name: Some("ada lovelace".to_string()),
        };
        assert_eq!(assignee.initials(), "AD");

        let anonymous = Assignee {
            email: "sam@example.com".to_string(),
            full_name: Some("   ".to_string()),
        };
        assert_eq!(anonymous.initials(), "SA");
    }

    #[test]
    fn test_task_patch_applies_only_present_fields() {
        let mut task = sample_task();
        task.description = Some("keep me".to_string());
        let status_id = Uuid::new_v4();

        let patch = TaskPatch {
            status_id: Some(Some(status_id)),
            position: Some(2048),
            ..TaskPatch::default()
        };
        patch.apply_to(&mut task);

        assert_eq!(task.status_id, Some(status_id));
        assert_eq!(task.position, 2048);
        assert_eq!(task.description.as_deref(), Some("keep me"));
        assert_eq!(task.title, "Write release notes");
    }

    #[test]
    fn test_task_patch_can_clear_nullable_fields() {
        let mut task = sample_task();
        task.status_id = Some(Uuid::new_v4());
        let patch = TaskPatch {
            status_id: Some(None),
            ..TaskPatch::default()
        };
        assert!(!patch.is_empty());
        patch.apply_to(&mut task);
        assert_eq!(task.status_id, None);
        assert!(TaskPatch::default().is_empty());
    }

    #[test]
    fn test_change_event_is_tagged() {
        let task = sample_task();
        let event = ChangeEvent::TaskDeleted {
            id: task.id,
            project_id: task.project_id,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "TaskDeleted");
        assert_eq!(value["data"]["id"], task.id.to_string());

        let round: ChangeEvent = serde_json::from_value(value).unwrap();
        assert_eq!(round.entity_id(), task.id);
        assert_eq!(round.project_id(), task.project_id);
        assert_eq!(round.kind(), "task_deleted");
    }
}
