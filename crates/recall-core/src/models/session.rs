//! Study session model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::CardResult;

/// A unique identifier for a study session, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new unique session ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which side of the card is shown as the prompt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyDirection {
    #[default]
    FrontToBack,
    BackToFront,
}

impl StudyDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FrontToBack => "front_to_back",
            Self::BackToFront => "back_to_front",
        }
    }
}

impl FromStr for StudyDirection {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front_to_back" => Ok(Self::FrontToBack),
            "back_to_front" => Ok(Self::BackToFront),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown study direction '{other}'"
            ))),
        }
    }
}

/// Summary of one study session over a set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySessionSummary {
    pub id: SessionId,
    pub set_id: String,
    pub set_name: String,
    /// Start timestamp (Unix ms)
    pub started_at: i64,
    /// End timestamp (Unix ms), set once the session completes
    pub ended_at: Option<i64>,
    pub total_cards: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub completed_cards: u32,
    pub duration_secs: f64,
    /// Session was started while disconnected
    pub is_offline: bool,
    pub direction: StudyDirection,
    pub is_completed: bool,
}

impl StudySessionSummary {
    /// Start a new session over a set
    #[must_use]
    pub fn new(
        set_id: impl Into<String>,
        set_name: impl Into<String>,
        direction: StudyDirection,
        is_offline: bool,
    ) -> Self {
        Self {
            id: SessionId::new(),
            set_id: set_id.into(),
            set_name: set_name.into(),
            started_at: chrono::Utc::now().timestamp_millis(),
            ended_at: None,
            total_cards: 0,
            correct_count: 0,
            incorrect_count: 0,
            completed_cards: 0,
            duration_secs: 0.0,
            is_offline,
            direction,
            is_completed: false,
        }
    }

    /// Set the number of cards the session is expected to cover
    #[must_use]
    pub const fn with_total_cards(mut self, total_cards: u32) -> Self {
        self.total_cards = total_cards;
        self
    }

    /// Fold one answer into the counters. Completed sessions are terminal.
    pub fn record(&mut self, result: &CardResult) {
        if self.is_completed {
            return;
        }
        self.completed_cards += 1;
        self.total_cards = self.total_cards.max(self.completed_cards);
        if result.is_correct {
            self.correct_count += 1;
        } else {
            self.incorrect_count += 1;
        }
        self.duration_secs += result.time_to_answer_secs;
    }

    /// Mark the session completed at `ended_at` (Unix ms)
    pub fn complete(&mut self, ended_at: i64) {
        if self.is_completed {
            return;
        }
        self.ended_at = Some(ended_at.max(self.started_at));
        self.is_completed = true;
    }

    /// Share of correct answers in `[0, 1]`, `None` before the first answer
    pub fn accuracy(&self) -> Option<f64> {
        if self.completed_cards == 0 {
            None
        } else {
            Some(f64::from(self.correct_count) / f64::from(self.completed_cards))
        }
    }
}

/// A session waiting to be delivered to the remote service.
///
/// The set id is stored beside the session id so delivery never has to
/// recover it from the session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQueueEntry {
    pub session_id: SessionId,
    pub set_id: String,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Delivery attempts so far; informational, never caps the entry
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(session: &StudySessionSummary, correct: bool, secs: f64) -> CardResult {
        CardResult::new(session.id, "card-1", correct, secs, None).unwrap()
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        let parsed: SessionId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_updates_counters() {
        let mut session = StudySessionSummary::new("set-1", "Spanish", StudyDirection::default(), true);
        let correct = result(&session, true, 2.5);
        let wrong = result(&session, false, 4.0);
        session.record(&correct);
        session.record(&wrong);

        assert_eq!(session.total_cards, 2);
        assert_eq!(session.correct_count, 1);
        assert_eq!(session.incorrect_count, 1);
        assert!((session.duration_secs - 6.5).abs() < f64::EPSILON);
        assert_eq!(session.accuracy(), Some(0.5));
    }

    #[test]
    fn test_completed_session_is_terminal() {
        let mut session = StudySessionSummary::new("set-1", "Spanish", StudyDirection::default(), false);
        session.complete(session.started_at + 1_000);
        let late = result(&session, true, 1.0);
        session.record(&late);
        session.complete(session.started_at + 9_000);

        assert!(session.is_completed);
        assert_eq!(session.total_cards, 0);
        assert_eq!(session.ended_at, Some(session.started_at + 1_000));
    }

    #[test]
    fn test_direction_round_trips_through_str() {
        for direction in [StudyDirection::FrontToBack, StudyDirection::BackToFront] {
            assert_eq!(direction.as_str().parse::<StudyDirection>().unwrap(), direction);
        }
        assert!("sideways".parse::<StudyDirection>().is_err());
    }
}
