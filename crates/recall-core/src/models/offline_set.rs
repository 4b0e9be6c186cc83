//! Downloaded study set model

use serde::{Deserialize, Serialize};

/// A card as cached for offline study
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCard {
    pub id: String,
    pub front: String,
    pub back: String,
}

/// A study set downloaded so it can be studied without connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSet {
    pub set_id: String,
    pub name: String,
    pub cards: Vec<OfflineCard>,
    /// Download timestamp (Unix ms)
    pub downloaded_at: i64,
}

impl OfflineSet {
    #[must_use]
    pub fn new(set_id: impl Into<String>, name: impl Into<String>, cards: Vec<OfflineCard>) -> Self {
        Self {
            set_id: set_id.into(),
            name: name.into(),
            cards,
            downloaded_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn card(&self, card_id: &str) -> Option<&OfflineCard> {
        self.cards.iter().find(|card| card.id == card_id)
    }
}
