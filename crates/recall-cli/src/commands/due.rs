use chrono::Local;
use recall_core::{DueBucket, DueCards};

use crate::commands::common::Context;
use crate::error::CliError;

/// Sets listed under each bucket
const MAX_SETS_PER_BUCKET: usize = 3;

pub fn local_offset_minutes() -> i32 {
    Local::now().offset().local_minus_utc() / 60
}

pub fn format_due_lines(due: &DueCards) -> Vec<String> {
    let mut lines = Vec::new();
    push_bucket(&mut lines, "Today", &due.today);
    push_bucket(&mut lines, "Tomorrow", &due.tomorrow);
    push_bucket(&mut lines, "This week", &due.this_week);

    let later = due
        .next_14_days
        .iter()
        .filter(|day| day.count > 0)
        .map(|day| format!("{} {}", day.date.format("%b %d"), day.count))
        .collect::<Vec<_>>();
    if !later.is_empty() {
        lines.push(format!("Next 14 days: {}", later.join(", ")));
    }
    lines
}

fn push_bucket(lines: &mut Vec<String>, label: &str, bucket: &DueBucket) {
    lines.push(format!("{label}: {}", bucket.count));
    for set in bucket.by_set.iter().take(MAX_SETS_PER_BUCKET) {
        lines.push(format!("  {} ({})", set.set_name, set.count));
    }
    let hidden = bucket.by_set.len().saturating_sub(MAX_SETS_PER_BUCKET);
    if hidden > 0 {
        lines.push(format!("  +{hidden} more"));
    }
}

pub async fn run_due(
    context: &Context,
    profile_id: &str,
    tz_offset_minutes: Option<i32>,
    as_json: bool,
) -> Result<(), CliError> {
    let remote = context.remote()?;
    let offset = tz_offset_minutes.unwrap_or_else(local_offset_minutes);
    let due = remote.due_cards(profile_id.trim(), offset).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&due)?);
        return Ok(());
    }
    for line in format_due_lines(&due) {
        println!("{line}");
    }
    Ok(())
}
