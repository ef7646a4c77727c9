//! Core types shared by the scheduler and the subscription manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key identifying the entity an update or subscription pertains to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    /// Create a subject id.
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty ids never open a channel.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        SubjectId(s.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        SubjectId(s)
    }
}

impl PartialEq<str> for SubjectId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SubjectId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Partial field set for an artifact.
///
/// Applied by shallow replacement: each top-level key overwrites the stored
/// value wholesale, nested objects are never merged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactPatch(pub serde_json::Map<String, serde_json::Value>);

impl ArtifactPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build a patch from a JSON value. Non-object values yield `None`.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(ArtifactPatch(map)),
            _ => None,
        }
    }

    /// Value of a patched field.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Whether the patch sets no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow-merge this patch into `target`.
    pub fn apply_to(&self, target: &mut serde_json::Map<String, serde_json::Value>) {
        for (key, value) in &self.0 {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Priority class an update is applied under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The subject is active; applied on the calling turn.
    Immediate,
    /// The subject is pinned; trailing-edge debounced.
    Deferred,
    /// Off-screen; applied when the host is idle.
    Background,
}

/// Which subjects currently have the viewer's attention.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FocusState {
    pub active_id: Option<SubjectId>,
    pub pinned_id: Option<SubjectId>,
}

impl FocusState {
    /// Focus with only an active subject.
    pub fn active(id: impl Into<SubjectId>) -> Self {
        Self {
            active_id: Some(id.into()),
            pinned_id: None,
        }
    }

    /// Focus with only a pinned subject.
    pub fn pinned(id: impl Into<SubjectId>) -> Self {
        Self {
            active_id: None,
            pinned_id: Some(id.into()),
        }
    }

    /// Classify a subject against this focus. Active wins over pinned.
    pub fn tier_for(&self, id: &SubjectId) -> Tier {
        if self.active_id.as_ref() == Some(id) {
            Tier::Immediate
        } else if self.pinned_id.as_ref() == Some(id) {
            Tier::Deferred
        } else {
            Tier::Background
        }
    }
}

/// Who authored a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Ai,
}

/// A message in a conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: MessageSender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True while the content is still being produced.
    pub streaming: bool,
}
