//! Task model and input validation.
//!
//! A [`Task`] is owned by exactly one user. The public projection
//! ([`TaskSnapshot`]) drops the owner and is what clients see, both in HTTP
//! responses and in broadcast events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{TaskId, UserId};

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 255;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// A persisted task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// Store-assigned id.
    pub id: TaskId,
    /// Owning user.
    pub owner: UserId,
    /// Short title, never blank.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Completion flag.
    pub completed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Public fields of this task.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            completed: self.completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// The client-visible fields of a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id.
    pub id: TaskId,
    /// Title.
    pub title: String,
    /// Description, `null` when unset.
    pub description: Option<String>,
    /// Completion flag.
    pub completed: bool,
    /// Creation time (RFC 3339).
    pub created_at: DateTime<Utc>,
    /// Last modification time (RFC 3339).
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Title (1–255 chars, not blank).
    pub title: String,
    /// Optional description (≤ 1000 chars).
    #[serde(default)]
    pub description: Option<String>,
    /// Initial completion flag.
    #[serde(default)]
    pub completed: bool,
}

impl NewTask {
    /// Shorthand for a task with just a title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Check field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        validate_description(self.description.as_deref())
    }
}

/// Partial update for a task. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New completion flag.
    #[serde(default)]
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// Patch that only sets the completion flag.
    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Check field constraints for the fields that are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        validate_description(self.description.as_deref())
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.completed.is_none()
    }
}

/// Rejected task input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Title is empty or only whitespace.
    #[error("title must not be empty")]
    EmptyTitle,
    /// Title exceeds [`MAX_TITLE_LEN`].
    #[error("title must be at most {MAX_TITLE_LEN} characters (got {0})")]
    TitleTooLong(usize),
    /// Description exceeds [`MAX_DESCRIPTION_LEN`].
    #[error("description must be at most {MAX_DESCRIPTION_LEN} characters (got {0})")]
    DescriptionTooLong(usize),
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    let len = title.chars().count();
    if len > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong(len));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), ValidationError> {
    let Some(description) = description else {
        return Ok(());
    };
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::DescriptionTooLong(len));
    }
    Ok(())
}
