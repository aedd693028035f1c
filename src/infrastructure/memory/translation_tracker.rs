//! In-Memory Translation Tracker Implementation

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    RequestState, TrackedTranslation, TrackerError, TranslationTrackerPort,
};
use crate::domain::translation::{AggregatedTranslation, RequestId};

struct Entry {
    translation: TrackedTranslation,
    cancel: CancellationToken,
}

/// 内存翻译请求跟踪器
pub struct InMemoryTranslationTracker {
    /// request_id -> Entry
    entries: DashMap<RequestId, Entry>,
}

impl InMemoryTranslationTracker {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn finish(
        &self,
        request_id: &RequestId,
        state: RequestState,
        result: Option<AggregatedTranslation>,
        error: Option<String>,
    ) -> Result<(), TrackerError> {
        let mut entry = self
            .entries
            .get_mut(request_id)
            .ok_or_else(|| TrackerError::NotFound(request_id.to_string()))?;

        if entry.translation.state.is_finished() {
            return Err(TrackerError::InvalidStateTransition(format!(
                "{} is already {}",
                request_id,
                entry.translation.state.as_str()
            )));
        }

        entry.translation.state = state;
        entry.translation.result = result;
        entry.translation.error_message = error;
        entry.translation.finished_at = Some(Utc::now());

        tracing::debug!(
            request_id = %request_id,
            state = state.as_str(),
            "Translation finished"
        );
        Ok(())
    }
}

impl Default for InMemoryTranslationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationTrackerPort for InMemoryTranslationTracker {
    fn register(
        &self,
        translation: TrackedTranslation,
        cancel: CancellationToken,
    ) -> Result<(), TrackerError> {
        let request_id = translation.request_id;
        match self.entries.entry(request_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TrackerError::AlreadyExists(request_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    translation,
                    cancel,
                });
                tracing::debug!(request_id = %request_id, "Translation registered");
                Ok(())
            }
        }
    }

    fn set_state(&self, request_id: &RequestId, state: RequestState) -> Result<(), TrackerError> {
        let mut entry = self
            .entries
            .get_mut(request_id)
            .ok_or_else(|| TrackerError::NotFound(request_id.to_string()))?;

        let old_state = entry.translation.state;
        if old_state.is_finished() {
            return Err(TrackerError::InvalidStateTransition(format!(
                "{} -> {}",
                old_state.as_str(),
                state.as_str()
            )));
        }

        entry.translation.state = state;
        if state.is_finished() {
            entry.translation.finished_at = Some(Utc::now());
        }

        tracing::debug!(
            request_id = %request_id,
            old_state = ?old_state,
            new_state = ?state,
            "Translation state changed"
        );
        Ok(())
    }

    fn set_progress(&self, request_id: &RequestId, completed: usize, total: usize) {
        if let Some(mut entry) = self.entries.get_mut(request_id) {
            entry.translation.completed_chunks = completed;
            entry.translation.total_chunks = total;
        }
    }

    fn complete(
        &self,
        request_id: &RequestId,
        result: AggregatedTranslation,
    ) -> Result<(), TrackerError> {
        let state = if result.cancelled {
            RequestState::Cancelled
        } else {
            RequestState::Completed
        };
        self.finish(request_id, state, Some(result), None)
    }

    fn fail(&self, request_id: &RequestId, error: String) -> Result<(), TrackerError> {
        self.finish(request_id, RequestState::Failed, None, Some(error))
    }

    fn cancel(&self, request_id: &RequestId) -> bool {
        match self.entries.get(request_id) {
            Some(entry) if !entry.translation.state.is_finished() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn get(&self, request_id: &RequestId) -> Option<TrackedTranslation> {
        self.entries.get(request_id).map(|e| e.translation.clone())
    }

    fn list_active(&self) -> Vec<TrackedTranslation> {
        self.entries
            .iter()
            .filter(|e| !e.translation.state.is_finished())
            .map(|e| e.translation.clone())
            .collect()
    }

    fn cleanup_finished(&self, older_than: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| match e.translation.finished_at {
            Some(finished_at) => finished_at >= older_than,
            None => true,
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Finished translations cleaned up");
        }
        removed
    }
}
