//! Review submission model

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scheduler::ReviewOutcome;

/// One spaced repetition review, delivered as a `card_review` change.
///
/// The review id is the dedupe key on the server, so redelivering the same
/// submission never advances the schedule twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    pub review_id: String,
    pub profile_id: String,
    pub set_id: String,
    pub card_id: String,
    pub is_correct: bool,
    pub time_to_answer_secs: f64,
    /// Millisecond precision, matching what stores persist
    pub reviewed_at: DateTime<Utc>,
}

impl ReviewSubmission {
    pub fn new(
        profile_id: impl Into<String>,
        set_id: impl Into<String>,
        card_id: impl Into<String>,
        is_correct: bool,
        time_to_answer_secs: f64,
    ) -> Result<Self> {
        let submission = Self {
            review_id: Uuid::now_v7().to_string(),
            profile_id: profile_id.into(),
            set_id: set_id.into(),
            card_id: card_id.into(),
            is_correct,
            time_to_answer_secs,
            reviewed_at: Utc::now().trunc_subsecs(3),
        };
        submission.validate()?;
        Ok(submission)
    }

    /// Reject blank ids and impossible answer times
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("review id", &self.review_id),
            ("profile id", &self.profile_id),
            ("set id", &self.set_id),
            ("card id", &self.card_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!("{field} cannot be empty")));
            }
        }
        if !self.time_to_answer_secs.is_finite() || self.time_to_answer_secs < 0.0 {
            return Err(Error::InvalidInput(format!(
                "time to answer must be a non-negative number of seconds, got {}",
                self.time_to_answer_secs
            )));
        }
        Ok(())
    }

    /// Scheduler input for this review
    pub fn outcome(&self) -> ReviewOutcome {
        ReviewOutcome::from_answer(self.is_correct, self.time_to_answer_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ReviewQuality;

    #[test]
    fn test_outcome_buckets_answer_speed() {
        let fast = ReviewSubmission::new("p", "s", "c", true, 3.0).unwrap();
        assert_eq!(fast.outcome().quality, ReviewQuality::Easy);

        let wrong = ReviewSubmission::new("p", "s", "c", false, 3.0).unwrap();
        assert_eq!(wrong.outcome().quality, ReviewQuality::Again);
    }

    #[test]
    fn test_validate_rejects_blank_ids() {
        assert!(ReviewSubmission::new(" ", "s", "c", true, 1.0).is_err());
        assert!(ReviewSubmission::new("p", "s", "c", true, -1.0).is_err());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let review = ReviewSubmission::new("p", "s", "c", true, 1.0).unwrap();
        let value = serde_json::to_value(&review).unwrap();
        assert_eq!(value["cardId"], "c");
        assert!(value.get("reviewedAt").is_some());
    }
}
