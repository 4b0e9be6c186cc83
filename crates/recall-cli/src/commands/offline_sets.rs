use std::path::Path;

use recall_core::models::{OfflineCard, OfflineSet};
use serde::Deserialize;

use crate::commands::common::{format_relative_time, Context};
use crate::error::CliError;

/// Set file accepted by `offline-sets --import`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetFile {
    set_id: String,
    name: String,
    cards: Vec<OfflineCard>,
}

pub fn parse_set_file(raw: &str) -> Result<OfflineSet, CliError> {
    let file: SetFile = serde_json::from_str(raw)?;
    let set_id = file.set_id.trim();
    if set_id.is_empty() {
        return Err(recall_core::Error::InvalidInput("setId cannot be empty".to_string()).into());
    }
    if let Some(card) = file.cards.iter().find(|card| card.id.trim().is_empty()) {
        return Err(recall_core::Error::InvalidInput(format!(
            "card with front '{}' has no id",
            card.front
        ))
        .into());
    }
    Ok(OfflineSet::new(set_id, file.name.trim(), file.cards))
}

pub async fn import_set(context: &Context, path: &Path) -> Result<OfflineSet, CliError> {
    let set = parse_set_file(&std::fs::read_to_string(path)?)?;
    let store = context.open_store().await?;
    store.put_offline_set(&set).await?;
    Ok(set)
}

pub fn format_set_lines(sets: &[OfflineSet], now_ms: i64) -> Vec<String> {
    sets.iter()
        .map(|set| {
            format!(
                "{}  {} ({} cards, downloaded {})",
                set.set_id,
                set.name,
                set.cards.len(),
                format_relative_time(set.downloaded_at, now_ms)
            )
        })
        .collect()
}

pub async fn run_offline_sets(
    context: &Context,
    import: Option<&Path>,
    remove: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    if let Some(path) = import {
        let set = import_set(context, path).await?;
        println!("Cached {} ({} cards)", set.name, set.cards.len());
        return Ok(());
    }

    let store = context.open_store().await?;
    if let Some(set_id) = remove {
        store.delete_offline_set(set_id.trim()).await?;
        println!("Removed {}", set_id.trim());
        return Ok(());
    }

    let sets = store.offline_sets().await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&sets)?);
        return Ok(());
    }
    if sets.is_empty() {
        println!("No sets cached for offline study.");
        return Ok(());
    }
    for line in format_set_lines(&sets, chrono::Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}
