//! Queued mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a pending change, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PendingChangeId(Uuid);

impl PendingChangeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for PendingChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PendingChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PendingChangeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for ChangeOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation '{other}'"))),
        }
    }
}

/// Remote entity a change targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    StudySet,
    Flashcard,
    Folder,
    CardReview,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StudySet => "study_set",
            Self::Flashcard => "flashcard",
            Self::Folder => "folder",
            Self::CardReview => "card_review",
        }
    }

    /// URL path segment of the matching remote resource
    pub const fn resource(self) -> &'static str {
        match self {
            Self::StudySet => "sets",
            Self::Flashcard => "cards",
            Self::Folder => "folders",
            Self::CardReview => "reviews",
        }
    }

    /// Inverse of [`Self::resource`]
    pub fn from_resource(resource: &str) -> Option<Self> {
        [Self::StudySet, Self::Flashcard, Self::Folder, Self::CardReview]
            .into_iter()
            .find(|kind| kind.resource() == resource)
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "study_set" => Ok(Self::StudySet),
            "flashcard" => Ok(Self::Flashcard),
            "folder" => Ok(Self::Folder),
            "card_review" => Ok(Self::CardReview),
            other => Err(Error::InvalidInput(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// A mutation waiting to be delivered to the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: PendingChangeId,
    pub operation: ChangeOperation,
    pub entity: EntityKind,
    pub entity_id: String,
    pub payload: serde_json::Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl PendingChange {
    #[must_use]
    pub fn new(
        operation: ChangeOperation,
        entity: EntityKind,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: PendingChangeId::new(),
            operation,
            entity,
            entity_id: entity_id.into(),
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Count one more failed attempt. Returns `true` once `ceiling` is reached.
    pub fn register_failure(&mut self, error: impl Into<String>, ceiling: u32) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.retry_count >= ceiling
    }
}
