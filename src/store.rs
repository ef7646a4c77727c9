//! Shared stores the sync core writes into.
//!
//! The core only depends on the [`ArtifactStore`] and [`MessageStore`] traits;
//! the in-memory implementations here back tests and simple hosts.

use crate::types::{ArtifactPatch, ChatMessage, FocusState, SubjectId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stored artifact: a flat JSON object.
pub type ArtifactFields = serde_json::Map<String, serde_json::Value>;

/// Store of artifacts plus the viewer's focus.
pub trait ArtifactStore: Send + Sync {
    /// Shallow-merge `patch` into the artifact identified by `id`.
    fn update_artifact(&self, id: &SubjectId, patch: ArtifactPatch);

    /// Current focus. Read on every scheduling decision.
    fn focus(&self) -> FocusState;
}

/// Ordered store of chat messages.
pub trait MessageStore: Send + Sync {
    /// Append a message, preserving arrival order.
    fn add_message(&self, message: ChatMessage);
}

/// In-memory artifact store.
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<SubjectId, ArtifactFields>>,
    focus: RwLock<FocusState>,
    mutation_count: AtomicU64,
    /// Every applied patch, in application order (when enabled).
    mutation_log: Option<Mutex<Vec<(SubjectId, ArtifactPatch)>>>,
}

impl MemoryArtifactStore {
    /// Create an empty store with no focus.
    pub fn new() -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            focus: RwLock::new(FocusState::default()),
            mutation_count: AtomicU64::new(0),
            mutation_log: None,
        }
    }

    /// Create a store that also records every applied patch.
    pub fn with_mutation_log() -> Self {
        Self {
            mutation_log: Some(Mutex::new(Vec::new())),
            ..Self::new()
        }
    }

    /// Replace the whole focus state.
    pub fn set_focus(&self, focus: FocusState) {
        *self.focus.write() = focus;
    }

    /// Set or clear the active subject.
    pub fn set_active(&self, id: Option<SubjectId>) {
        self.focus.write().active_id = id;
    }

    /// Set or clear the pinned subject.
    pub fn set_pinned(&self, id: Option<SubjectId>) {
        self.focus.write().pinned_id = id;
    }

    /// Current fields of an artifact.
    pub fn get(&self, id: &SubjectId) -> Option<ArtifactFields> {
        self.artifacts.read().get(id).cloned()
    }

    /// Number of artifacts that have received at least one patch.
    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    /// Whether no artifact has been patched yet.
    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }

    /// Total `update_artifact` calls applied.
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count.load(Ordering::SeqCst)
    }

    /// Applied patches in order. Empty unless created with
    /// [`MemoryArtifactStore::with_mutation_log`].
    pub fn mutations(&self) -> Vec<(SubjectId, ArtifactPatch)> {
        self.mutation_log
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn update_artifact(&self, id: &SubjectId, patch: ArtifactPatch) {
        {
            let mut artifacts = self.artifacts.write();
            patch.apply_to(artifacts.entry(id.clone()).or_default());
        }
        self.mutation_count.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.mutation_log {
            log.lock().push((id.clone(), patch));
        }
    }

    fn focus(&self) -> FocusState {
        self.focus.read().clone()
    }
}

/// In-memory message store.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    /// Create an empty message store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message, in arrival order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().clone()
    }

    /// Number of artifacts that have received at least one patch.
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Whether no artifact has been patched yet.
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Drop all stored messages.
    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

impl MessageStore for MemoryMessageStore {
    fn add_message(&self, message: ChatMessage) {
        self.messages.write().push(message);
    }
}
