//! Due-card aggregation.
//!
//! Folds per-card review dates into today / tomorrow / this week buckets and a
//! 14 day histogram, in the caller's time zone. Rows that point at a deleted
//! set are left out and removed in the background.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::models::CardScheduleState;
use crate::Result;

/// Days covered by [`DueCards::next_14_days`]
pub const HISTOGRAM_DAYS: usize = 14;
const WEEK_DAYS: i64 = 7;

/// Where the aggregator reads schedule rows from
#[async_trait]
pub trait DueCardSource: Send + Sync {
    /// Every schedule row of a profile
    async fn schedule_rows(&self, profile_id: &str) -> Result<Vec<CardScheduleState>>;

    /// Names of the sets that still exist, keyed by set id
    async fn set_names(&self, set_ids: &[String]) -> Result<HashMap<String, String>>;

    /// Remove a profile's rows for sets that no longer exist. Returns rows removed.
    async fn delete_orphaned_rows(&self, profile_id: &str, set_ids: &[String]) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDueCount {
    pub set_id: String,
    pub set_name: String,
    pub count: usize,
}

/// Cards due within one window, with a per-set breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueBucket {
    pub count: usize,
    /// Largest count first, ties by set name
    pub by_set: Vec<SetDueCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueDay {
    pub date: NaiveDate,
    pub count: usize,
}

/// Due cards of one profile.
///
/// `this_week` includes the cards counted in `today` and `tomorrow`. Overdue
/// cards count as due today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCards {
    pub today: DueBucket,
    pub tomorrow: DueBucket,
    pub this_week: DueBucket,
    pub next_14_days: Vec<DueDay>,
}

#[derive(Default)]
struct BucketBuilder {
    count: usize,
    by_set: HashMap<String, usize>,
}

impl BucketBuilder {
    fn add(&mut self, set_id: &str) {
        self.count += 1;
        *self.by_set.entry(set_id.to_string()).or_default() += 1;
    }

    fn build(self, names: &HashMap<String, String>) -> DueBucket {
        let mut by_set: Vec<SetDueCount> = self
            .by_set
            .into_iter()
            .map(|(set_id, count)| SetDueCount {
                set_name: names.get(&set_id).cloned().unwrap_or_default(),
                set_id,
                count,
            })
            .collect();
        by_set.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.set_name.cmp(&b.set_name))
                .then_with(|| a.set_id.cmp(&b.set_id))
        });
        DueBucket {
            count: self.count,
            by_set,
        }
    }
}

/// Computes [`DueCards`] from a [`DueCardSource`].
pub struct DueCardAggregator {
    source: Arc<dyn DueCardSource>,
    cleanups: Mutex<Vec<JoinHandle<()>>>,
}

impl DueCardAggregator {
    pub fn new(source: Arc<dyn DueCardSource>) -> Self {
        Self {
            source,
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Aggregate relative to the current local time
    pub async fn aggregate(&self, profile_id: &str) -> Result<DueCards> {
        self.aggregate_at(profile_id, chrono::Local::now()).await
    }

    /// Aggregate relative to `now`; calendar days follow `now`'s time zone.
    pub async fn aggregate_at<Tz>(&self, profile_id: &str, now: DateTime<Tz>) -> Result<DueCards>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: Send + Sync,
    {
        let rows = self.source.schedule_rows(profile_id).await?;
        let set_ids: Vec<String> = rows
            .iter()
            .map(|row| row.set_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let names = if set_ids.is_empty() {
            HashMap::new()
        } else {
            self.source.set_names(&set_ids).await?
        };

        let orphaned: Vec<String> = set_ids
            .into_iter()
            .filter(|set_id| !names.contains_key(set_id))
            .collect();
        if !orphaned.is_empty() {
            self.spawn_cleanup(profile_id, orphaned);
        }

        let tz = now.timezone();
        let today = now.date_naive();
        let mut today_bucket = BucketBuilder::default();
        let mut tomorrow_bucket = BucketBuilder::default();
        let mut week_bucket = BucketBuilder::default();
        let mut histogram = [0usize; HISTOGRAM_DAYS];

        for row in rows.iter().filter(|row| names.contains_key(&row.set_id)) {
            let due_day = row.next_review_at.with_timezone(&tz).date_naive();
            let offset = due_day.signed_duration_since(today).num_days().max(0);

            if offset == 0 {
                today_bucket.add(&row.set_id);
            } else if offset == 1 {
                tomorrow_bucket.add(&row.set_id);
            }
            if offset < WEEK_DAYS {
                week_bucket.add(&row.set_id);
            }
            if let Some(slot) = usize::try_from(offset)
                .ok()
                .and_then(|index| histogram.get_mut(index))
            {
                *slot += 1;
            }
        }

        let next_14_days = (0i64..)
            .zip(histogram)
            .map(|(index, count)| DueDay {
                date: today + chrono::Duration::days(index),
                count,
            })
            .collect();

        Ok(DueCards {
            today: today_bucket.build(&names),
            tomorrow: tomorrow_bucket.build(&names),
            this_week: week_bucket.build(&names),
            next_14_days,
        })
    }

    fn spawn_cleanup(&self, profile_id: &str, set_ids: Vec<String>) {
        let source = Arc::clone(&self.source);
        let profile_id = profile_id.to_string();
        let handle = tokio::spawn(async move {
            match source.delete_orphaned_rows(&profile_id, &set_ids).await {
                Ok(removed) => tracing::info!(
                    "Removed {removed} schedule rows for {} deleted sets",
                    set_ids.len()
                ),
                Err(error) => {
                    tracing::debug!("Orphaned schedule row cleanup failed: {error}");
                }
            }
        });

        let mut cleanups = self.cleanups.lock().unwrap_or_else(PoisonError::into_inner);
        cleanups.retain(|handle| !handle.is_finished());
        cleanups.push(handle);
    }

    /// Wait for background cleanups started by earlier aggregations
    pub async fn wait_for_cleanup(&self) {
        let handles = std::mem::take(
            &mut *self.cleanups.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::debug!("Orphaned schedule row cleanup task failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use chrono::{Duration, FixedOffset, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        rows: Mutex<Vec<CardScheduleState>>,
        sets: HashMap<String, String>,
        fail_cleanup: bool,
        cleanup_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_sets(sets: &[(&str, &str)]) -> Self {
            Self {
                sets: sets
                    .iter()
                    .map(|(id, name)| ((*id).to_string(), (*name).to_string()))
                    .collect(),
                ..Self::default()
            }
        }

        fn add(&self, set_id: &str, card_id: &str, due: DateTime<Utc>) {
            let mut row = CardScheduleState::new("profile-1", set_id, card_id, due);
            row.next_review_at = due;
            self.rows.lock().unwrap().push(row);
        }
    }

    #[async_trait]
    impl DueCardSource for FakeSource {
        async fn schedule_rows(&self, profile_id: &str) -> Result<Vec<CardScheduleState>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.profile_id == profile_id)
                .cloned()
                .collect())
        }

        async fn set_names(&self, set_ids: &[String]) -> Result<HashMap<String, String>> {
            Ok(set_ids
                .iter()
                .filter_map(|id| self.sets.get(id).map(|name| (id.clone(), name.clone())))
                .collect())
        }

        async fn delete_orphaned_rows(&self, profile_id: &str, set_ids: &[String]) -> Result<u64> {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_cleanup {
                return Err(Error::Database("database is locked".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|row| row.profile_id != profile_id || !set_ids.contains(&row.set_id));
            Ok((before - rows.len()) as u64)
        }
    }

    fn ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn buckets_follow_calendar_days() {
        let source = Arc::new(FakeSource::with_sets(&[("set-1", "Spanish")]));
        let now = ten_am();
        source.add("set-1", "a", now + Duration::hours(2));
        source.add("set-1", "b", now + Duration::hours(30));
        source.add("set-1", "c", now + Duration::days(6));
        source.add("set-1", "d", now + Duration::days(20));
        let aggregator = DueCardAggregator::new(source);

        let due = aggregator.aggregate_at("profile-1", now).await.unwrap();

        assert_eq!(due.today.count, 1);
        assert_eq!(due.tomorrow.count, 1);
        assert_eq!(due.this_week.count, 3);
        assert_eq!(
            due.this_week.by_set,
            vec![SetDueCount {
                set_id: "set-1".to_string(),
                set_name: "Spanish".to_string(),
                count: 3,
            }]
        );

        let counts: Vec<usize> = due.next_14_days.iter().map(|day| day.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(due.next_14_days[0].date, now.date_naive());
        assert_eq!(due.next_14_days[13].date, now.date_naive() + Duration::days(13));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overdue_cards_count_as_today() {
        let source = Arc::new(FakeSource::with_sets(&[("set-1", "Spanish")]));
        let now = ten_am();
        source.add("set-1", "a", now - Duration::days(3));
        let aggregator = DueCardAggregator::new(source);

        let due = aggregator.aggregate_at("profile-1", now).await.unwrap();
        assert_eq!(due.today.count, 1);
        assert_eq!(due.this_week.count, 1);
        assert_eq!(due.next_14_days[0].count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn day_boundaries_use_the_callers_time_zone() {
        let source = Arc::new(FakeSource::with_sets(&[("set-1", "Spanish")]));
        // 23:00 UTC is already tomorrow at UTC+2.
        let due_at = Utc.with_ymd_and_hms(2026, 5, 4, 23, 0, 0).unwrap();
        source.add("set-1", "a", due_at);
        let aggregator = DueCardAggregator::new(source);

        let utc = aggregator.aggregate_at("profile-1", ten_am()).await.unwrap();
        assert_eq!(utc.today.count, 1);

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = aggregator
            .aggregate_at("profile-1", ten_am().with_timezone(&plus_two))
            .await
            .unwrap();
        assert_eq!(local.today.count, 0);
        assert_eq!(local.tomorrow.count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sets_are_ranked_by_count_then_name() {
        let source = Arc::new(FakeSource::with_sets(&[
            ("set-1", "Spanish"),
            ("set-2", "French"),
            ("set-3", "Biology"),
        ]));
        let now = ten_am();
        source.add("set-1", "a", now);
        source.add("set-2", "b", now);
        source.add("set-3", "c", now);
        source.add("set-3", "d", now);
        let aggregator = DueCardAggregator::new(source);

        let due = aggregator.aggregate_at("profile-1", now).await.unwrap();
        let names: Vec<&str> = due
            .today
            .by_set
            .iter()
            .map(|set| set.set_name.as_str())
            .collect();
        assert_eq!(names, vec!["Biology", "French", "Spanish"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn orphaned_rows_are_excluded_then_removed() {
        let source = Arc::new(FakeSource::with_sets(&[("set-1", "Spanish")]));
        let now = ten_am();
        source.add("set-1", "a", now);
        source.add("deleted-set", "b", now);
        source.add("deleted-set", "c", now);
        let aggregator = DueCardAggregator::new(Arc::clone(&source) as Arc<dyn DueCardSource>);

        let first = aggregator.aggregate_at("profile-1", now).await.unwrap();
        assert_eq!(first.today.count, 1);
        aggregator.wait_for_cleanup().await;
        assert_eq!(source.rows.lock().unwrap().len(), 1);

        let second = aggregator.aggregate_at("profile-1", now).await.unwrap();
        assert_eq!(second, first);
        aggregator.wait_for_cleanup().await;
        assert_eq!(source.cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_failure_is_swallowed() {
        let source = Arc::new(FakeSource {
            fail_cleanup: true,
            ..FakeSource::with_sets(&[])
        });
        source.add("deleted-set", "a", ten_am());
        let aggregator = DueCardAggregator::new(Arc::clone(&source) as Arc<dyn DueCardSource>);

        let due = aggregator.aggregate_at("profile-1", ten_am()).await.unwrap();
        aggregator.wait_for_cleanup().await;

        assert_eq!(due.today, DueBucket::default());
        assert_eq!(source.cleanup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_profile_has_empty_histogram() {
        let aggregator = DueCardAggregator::new(Arc::new(FakeSource::default()));
        let due = aggregator.aggregate("nobody").await.unwrap();
        assert_eq!(due.this_week.count, 0);
        assert_eq!(due.next_14_days.len(), HISTOGRAM_DAYS);
        assert!(due.next_14_days.iter().all(|day| day.count == 0));
    }
}
