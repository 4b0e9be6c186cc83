//! Study session write path.

use std::sync::Arc;

use crate::models::{
    CardResult, ChangeOperation, Confidence, EntityKind, PendingChange, ReviewSubmission, SessionId,
    StudyDirection, StudySessionSummary,
};
use crate::network::NetworkMonitor;
use crate::services::LocalStore;
use crate::{Error, Result};

/// Records study activity into the local store so it survives being offline.
///
/// Sessions answered while offline are queued as soon as the first answer
/// lands. Every finished session is queued regardless of connectivity.
#[derive(Clone)]
pub struct StudyRecorder {
    store: LocalStore,
    network: Arc<NetworkMonitor>,
}

impl StudyRecorder {
    pub const fn new(store: LocalStore, network: Arc<NetworkMonitor>) -> Self {
        Self { store, network }
    }

    pub async fn start_session(
        &self,
        set_id: &str,
        set_name: &str,
        direction: StudyDirection,
    ) -> Result<StudySessionSummary> {
        if set_id.trim().is_empty() {
            return Err(Error::InvalidInput("set id cannot be empty".to_string()));
        }

        let offline = !self.network.is_online();
        let mut session = StudySessionSummary::new(set_id.trim(), set_name.trim(), direction, offline);
        if let Some(set) = self.store.offline_set(&session.set_id).await {
            session = session.with_total_cards(u32::try_from(set.cards.len()).unwrap_or(u32::MAX));
        }
        self.store.put_session(&session).await?;
        tracing::debug!(
            "Started session {} over {}{}",
            session.id,
            session.set_id,
            if offline { " (offline)" } else { "" }
        );
        Ok(session)
    }

    pub async fn record_answer(
        &self,
        session_id: &SessionId,
        card_id: &str,
        correct: bool,
        time_to_answer_secs: f64,
        confidence: Option<Confidence>,
    ) -> Result<CardResult> {
        let mut session = self.load(session_id).await?;
        if session.is_completed {
            return Err(Error::InvalidInput(format!(
                "session {session_id} is already completed"
            )));
        }

        let result = CardResult::new(*session_id, card_id, correct, time_to_answer_secs, confidence)?;
        self.store.put_result(&result).await?;
        session.record(&result);
        self.store.put_session(&session).await?;

        if !self.network.is_online() && self.store.enqueue_session(session_id, &session.set_id).await? {
            tracing::info!("Queued session {session_id} for sync while offline");
        }
        Ok(result)
    }

    /// Complete the session and queue it for sync. Finishing twice is a no-op.
    pub async fn finish_session(&self, session_id: &SessionId) -> Result<StudySessionSummary> {
        let mut session = self.load(session_id).await?;
        if !session.is_completed {
            session.complete(chrono::Utc::now().timestamp_millis());
            self.store.put_session(&session).await?;
        }
        self.store.enqueue_session(session_id, &session.set_id).await?;
        tracing::debug!(
            "Finished session {session_id}: {}/{} correct",
            session.correct_count,
            session.completed_cards
        );
        Ok(session)
    }

    /// Queue an entity mutation for the next sync
    pub async fn queue_change(
        &self,
        operation: ChangeOperation,
        entity: EntityKind,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> Result<PendingChange> {
        if entity_id.trim().is_empty() {
            return Err(Error::InvalidInput("entity id cannot be empty".to_string()));
        }
        let change = PendingChange::new(operation, entity, entity_id.trim(), payload);
        self.store.put_change(&change).await?;
        tracing::debug!(
            "Queued {} {} {}",
            operation.as_str(),
            entity.as_str(),
            change.entity_id
        );
        Ok(change)
    }

    /// Queue a spaced repetition review for the server to schedule
    pub async fn queue_review(&self, review: &ReviewSubmission) -> Result<PendingChange> {
        review.validate()?;
        self.queue_change(
            ChangeOperation::Create,
            EntityKind::CardReview,
            &review.review_id,
            serde_json::to_value(review)?,
        )
        .await
    }

    async fn load(&self, session_id: &SessionId) -> Result<StudySessionSummary> {
        self.store
            .session(session_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }
}
