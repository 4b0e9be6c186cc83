use chrono::Utc;
use recall_core::scheduler::{
    format_interval, preview_intervals, ReviewQuality, ScheduleState, MAX_EASE_FACTOR,
    MIN_EASE_FACTOR,
};

use crate::error::CliError;

pub fn schedule_state(stage: u32, ease: f64, interval: f64) -> Result<ScheduleState, CliError> {
    if !ease.is_finite() || !(MIN_EASE_FACTOR..=MAX_EASE_FACTOR).contains(&ease) {
        return Err(recall_core::Error::InvalidInput(format!(
            "ease must be between {MIN_EASE_FACTOR} and {MAX_EASE_FACTOR}"
        ))
        .into());
    }
    if !interval.is_finite() || interval < 0.0 {
        return Err(
            recall_core::Error::InvalidInput("interval cannot be negative".to_string()).into(),
        );
    }
    Ok(ScheduleState {
        stage,
        ease_factor: ease,
        interval_days: interval,
    })
}

pub fn preview_lines(state: &ScheduleState) -> Vec<String> {
    let intervals = preview_intervals(state, Utc::now());
    ReviewQuality::ALL
        .iter()
        .zip(intervals)
        .map(|(quality, days)| format!("{:<6} {}", quality.as_str(), format_interval(days)))
        .collect()
}

pub fn run_preview(stage: u32, ease: f64, interval: f64) -> Result<(), CliError> {
    let state = schedule_state(stage, ease, interval)?;
    for line in preview_lines(&state) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_card_preview() {
        let state = schedule_state(0, 2.5, 0.0).unwrap();
        assert_eq!(
            preview_lines(&state),
            vec!["again  10m", "hard   1d", "good   1d", "easy   1d"]
        );
    }

    #[test]
    fn mature_card_preview_grows() {
        let state = schedule_state(3, 2.5, 10.0).unwrap();
        let lines = preview_lines(&state);
        assert_eq!(lines[0], "again  10m");
        assert_eq!(lines[2], "good   3w");
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(schedule_state(0, 0.5, 0.0).is_err());
        assert!(schedule_state(0, f64::NAN, 0.0).is_err());
        assert!(schedule_state(0, 2.5, -1.0).is_err());
    }
}
