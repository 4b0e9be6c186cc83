//! Card answer model

use serde::{Deserialize, Serialize};

use super::SessionId;
use crate::error::{Error, Result};

/// Self-reported confidence for an answer, 1 (guess) to 5 (certain)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidInput(format!(
                "confidence must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Confidence {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Confidence> for u8 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

/// One answer to one card within a session. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardResult {
    pub session_id: SessionId,
    pub card_id: String,
    pub is_correct: bool,
    pub time_to_answer_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Answer timestamp (Unix ms)
    pub answered_at: i64,
}

impl CardResult {
    /// Create a result answered now
    pub fn new(
        session_id: SessionId,
        card_id: impl Into<String>,
        is_correct: bool,
        time_to_answer_secs: f64,
        confidence: Option<Confidence>,
    ) -> Result<Self> {
        let card_id = card_id.into();
        if card_id.trim().is_empty() {
            return Err(Error::InvalidInput("card id cannot be empty".into()));
        }
        if !time_to_answer_secs.is_finite() || time_to_answer_secs < 0.0 {
            return Err(Error::InvalidInput(format!(
                "time to answer must be a non-negative number of seconds, got {time_to_answer_secs}"
            )));
        }

        Ok(Self {
            session_id,
            card_id,
            is_correct,
            time_to_answer_secs,
            confidence,
            answered_at: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Accuracy figures for a single card across sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAccuracy {
    pub attempts: u32,
    pub correct: u32,
    pub average_secs: f64,
}

impl CardAccuracy {
    /// Summarize a card's answer history
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a CardResult>) -> Self {
        let mut accuracy = Self::default();
        let mut total_secs = 0.0;
        for result in results {
            accuracy.attempts += 1;
            if result.is_correct {
                accuracy.correct += 1;
            }
            total_secs += result.time_to_answer_secs;
        }
        if accuracy.attempts > 0 {
            accuracy.average_secs = total_secs / f64::from(accuracy.attempts);
        }
        accuracy
    }

    pub fn ratio(&self) -> Option<f64> {
        (self.attempts > 0).then(|| f64::from(self.correct) / f64::from(self.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        assert!(Confidence::new(0).is_err());
        assert_eq!(Confidence::new(1).unwrap().get(), 1);
        assert_eq!(Confidence::new(5).unwrap().get(), 5);
        assert!(Confidence::new(6).is_err());
    }

    #[test]
    fn test_confidence_deserialize_rejects_out_of_range() {
        let parsed: std::result::Result<Confidence, _> = serde_json::from_str("9");
        assert!(parsed.is_err());
        let parsed: Confidence = serde_json::from_str("3").unwrap();
        assert_eq!(parsed.get(), 3);
    }

    #[test]
    fn test_result_rejects_negative_time() {
        let session = SessionId::new();
        assert!(CardResult::new(session, "card", true, -1.0, None).is_err());
        assert!(CardResult::new(session, "card", true, f64::NAN, None).is_err());
        assert!(CardResult::new(session, "  ", true, 1.0, None).is_err());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = CardResult::new(SessionId::new(), "card-7", true, 1.5, None).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["cardId"], "card-7");
        assert_eq!(json["isCorrect"], true);
        assert!(json.get("confidence").is_none());
    }

    #[test]
    fn test_card_accuracy() {
        let session = SessionId::new();
        let results = [
            CardResult::new(session, "c", true, 2.0, None).unwrap(),
            CardResult::new(session, "c", false, 4.0, None).unwrap(),
        ];
        let accuracy = CardAccuracy::from_results(&results);
        assert_eq!(accuracy.attempts, 2);
        assert_eq!(accuracy.ratio(), Some(0.5));
        assert!((accuracy.average_secs - 3.0).abs() < f64::EPSILON);
        assert_eq!(CardAccuracy::from_results(std::iter::empty()).ratio(), None);
    }
}
