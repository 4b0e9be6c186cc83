//! Spaced repetition scheduling (SM-2 family)
//!
//! Review outcomes are bucketed into four qualities:
//! - 0 `Again`: incorrect, the card goes back to relearning
//! - 1 `Hard`: correct but slow
//! - 2 `Good`: correct at a normal pace
//! - 3 `Easy`: correct and fast
//!
//! Everything here is a pure function of its inputs. The current time is an
//! argument, so identical inputs always give identical outputs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ease factor given to a card that has never been reviewed
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;
/// Minimum ease factor allowed
pub const MIN_EASE_FACTOR: f64 = 1.3;
/// Maximum ease factor allowed
pub const MAX_EASE_FACTOR: f64 = 3.0;

/// Relearn delay after an incorrect answer (10 minutes)
const RELEARN_INTERVAL_DAYS: f64 = 10.0 / (24.0 * 60.0);
const FIRST_INTERVAL_DAYS: f64 = 1.0;
const SECOND_INTERVAL_DAYS: f64 = 6.0;
const MIN_INTERVAL_DAYS: f64 = 1.0;
const MAX_INTERVAL_DAYS: f64 = 365.0;

/// Correct answers at or under this many seconds count as `Easy`
const FAST_ANSWER_SECS: f64 = 5.0;
/// Correct answers at or under this many seconds count as `Good`
const SLOW_ANSWER_SECS: f64 = 15.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Quality bucket of a single review
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewQuality {
    Again = 0,
    Hard = 1,
    Good = 2,
    Easy = 3,
}

impl ReviewQuality {
    pub const ALL: [Self; 4] = [Self::Again, Self::Hard, Self::Good, Self::Easy];

    /// Bucket an answer by correctness and answer time
    pub fn from_answer(correct: bool, elapsed_secs: f64) -> Self {
        if !correct {
            Self::Again
        } else if elapsed_secs <= FAST_ANSWER_SECS {
            Self::Easy
        } else if elapsed_secs <= SLOW_ANSWER_SECS {
            Self::Good
        } else {
            Self::Hard
        }
    }

    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Again),
            1 => Some(Self::Hard),
            2 => Some(Self::Good),
            3 => Some(Self::Easy),
            _ => None,
        }
    }

    pub const fn value(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }

    const fn ease_delta(self) -> f64 {
        match self {
            Self::Again => -0.2,
            Self::Hard => -0.15,
            Self::Good => 0.0,
            Self::Easy => 0.15,
        }
    }

    const fn interval_factor(self) -> f64 {
        match self {
            Self::Again => 0.0,
            Self::Hard => 0.8,
            Self::Good => 1.0,
            Self::Easy => 1.3,
        }
    }
}

/// What happened when the card was shown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub quality: ReviewQuality,
    pub elapsed_secs: f64,
}

impl ReviewOutcome {
    pub const fn new(quality: ReviewQuality, elapsed_secs: f64) -> Self {
        Self {
            quality,
            elapsed_secs,
        }
    }

    /// Outcome of an answer, bucketed with [`ReviewQuality::from_answer`]
    pub fn from_answer(correct: bool, elapsed_secs: f64) -> Self {
        Self::new(ReviewQuality::from_answer(correct, elapsed_secs), elapsed_secs)
    }
}

/// Scheduling inputs carried between reviews
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub stage: u32,
    pub ease_factor: f64,
    /// Last interval in days
    pub interval_days: f64,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            stage: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0.0,
        }
    }
}

/// Result of scheduling one review
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdate {
    pub next_review_at: DateTime<Utc>,
    pub stage: u32,
    pub ease_factor: f64,
    pub interval_days: f64,
}

/// Calculate the next review for a card.
///
/// `Again` resets the stage to 0 and schedules a short relearn. Any other
/// quality advances the stage, nudges the ease factor, and grows the interval
/// (1 day, then 6 days, then the previous interval times the new ease).
pub fn compute_next_review(
    state: &ScheduleState,
    outcome: &ReviewOutcome,
    now: DateTime<Utc>,
) -> ScheduleUpdate {
    let prior_ease = if state.ease_factor.is_finite() {
        state.ease_factor
    } else {
        DEFAULT_EASE_FACTOR
    };
    let ease_factor = clamp_ease(prior_ease + outcome.quality.ease_delta());

    let (stage, interval_days) = match outcome.quality {
        ReviewQuality::Again => (0, RELEARN_INTERVAL_DAYS),
        quality => {
            let stage = state.stage.saturating_add(1);
            let base = match stage {
                1 => FIRST_INTERVAL_DAYS,
                2 => SECOND_INTERVAL_DAYS,
                _ => sanitize_interval(state.interval_days) * ease_factor,
            };
            let interval =
                (base * quality.interval_factor()).clamp(MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS);
            (stage, interval)
        }
    };

    ScheduleUpdate {
        next_review_at: now + days_to_duration(interval_days),
        stage,
        ease_factor,
        interval_days,
    }
}

/// Interval (days) each quality would produce, indexed by quality value.
/// Used to label answer buttons.
pub fn preview_intervals(state: &ScheduleState, now: DateTime<Utc>) -> [f64; 4] {
    ReviewQuality::ALL.map(|quality| {
        compute_next_review(state, &ReviewOutcome::new(quality, 0.0), now).interval_days
    })
}

/// Format an interval in days as a short label (`10m`, `1d`, `2w`, `3mo`, `1y`)
#[allow(clippy::cast_possible_truncation)]
pub fn format_interval(days: f64) -> String {
    if days < 1.0 {
        let minutes = (days * 24.0 * 60.0).round().max(0.0) as i64;
        return if minutes == 0 {
            "now".to_string()
        } else if minutes < 60 {
            format!("{minutes}m")
        } else {
            format!("{}h", minutes / 60)
        };
    }

    let days = days.round() as i64;
    if days < 7 {
        format!("{days}d")
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}

fn clamp_ease(ease: f64) -> f64 {
    ease.clamp(MIN_EASE_FACTOR, MAX_EASE_FACTOR)
}

fn sanitize_interval(interval_days: f64) -> f64 {
    if interval_days.is_finite() {
        interval_days.max(MIN_INTERVAL_DAYS)
    } else {
        MIN_INTERVAL_DAYS
    }
}

#[allow(clippy::cast_possible_truncation)]
fn days_to_duration(days: f64) -> Duration {
    Duration::milliseconds((days * MS_PER_DAY).round() as i64)
}
