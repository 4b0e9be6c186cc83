//! Per-card spaced repetition record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::{ScheduleState, ScheduleUpdate, DEFAULT_EASE_FACTOR};

/// Spaced repetition state for one card of one set, as seen by one profile.
///
/// `next_review_at` only ever changes through [`CardScheduleState::apply`],
/// which takes a scheduler output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardScheduleState {
    pub profile_id: String,
    pub set_id: String,
    pub card_id: String,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub ease_factor: f64,
    pub interval_days: f64,
    pub next_review_at: DateTime<Utc>,
    pub stage: u32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl CardScheduleState {
    /// State for a card that has never been reviewed; due immediately.
    #[must_use]
    pub fn new(
        profile_id: impl Into<String>,
        set_id: impl Into<String>,
        card_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            set_id: set_id.into(),
            card_id: card_id.into(),
            correct_count: 0,
            incorrect_count: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0.0,
            next_review_at: now,
            stage: 0,
            last_reviewed_at: None,
        }
    }

    /// Scheduler input for this card
    pub const fn schedule(&self) -> ScheduleState {
        ScheduleState {
            stage: self.stage,
            ease_factor: self.ease_factor,
            interval_days: self.interval_days,
        }
    }

    /// Fold a scheduler output and the answer's correctness into the record
    pub fn apply(&mut self, update: &ScheduleUpdate, correct: bool, now: DateTime<Utc>) {
        if correct {
            self.correct_count += 1;
        } else {
            self.incorrect_count += 1;
        }
        self.ease_factor = update.ease_factor;
        self.interval_days = update.interval_days;
        self.next_review_at = update.next_review_at;
        self.stage = update.stage;
        self.last_reviewed_at = Some(now);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}
