use std::sync::Arc;

use crate::db::{MilestoneSource, SnapshotStore};
use crate::error::{Result, TrackerError};
use crate::models::{LatestSnapshot, MilestoneTarget, ProgressView};

#[derive(Clone)]
pub struct MilestoneAggregator {
    snapshots: Arc<dyn SnapshotStore>,
    milestones: Arc<dyn MilestoneSource>,
}

impl MilestoneAggregator {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, milestones: Arc<dyn MilestoneSource>) -> Self {
        Self {
            snapshots,
            milestones,
        }
    }

    pub async fn current_milestone(&self) -> Result<MilestoneTarget> {
        self.milestones
            .latest_milestone()
            .await?
            .ok_or_else(|| TrackerError::NotFound("no milestone has been published".to_string()))
    }

    /// `filtered` holds the rows whose GitHub username equals `github_username`;
    /// without a filter it is empty.
    pub async fn progress_view(&self, github_username: Option<&str>) -> Result<ProgressView> {
        let target = self.current_milestone().await?;
        let all = self.snapshots.latest_per_trainee().await?;
        let filtered = filter_by_github(&all, github_username);

        Ok(ProgressView {
            all,
            filtered,
            target,
        })
    }
}

fn filter_by_github(rows: &[LatestSnapshot], github_username: Option<&str>) -> Vec<LatestSnapshot> {
    let Some(username) = github_username else {
        return Vec::new();
    };

    rows.iter()
        .filter(|row| row.github_username == username)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::db::memory::{trainee, MemoryStore};
    use crate::models::{SkillMetrics, TraineeMetrics};

    fn target(id: i32, module: &str, date: NaiveDate) -> MilestoneTarget {
        MilestoneTarget {
            id,
            module_name: module.to_string(),
            date,
            codewars_rank_target: 7,
            codewars_points_target: 100,
            github_prs_target: 8,
        }
    }

    async fn populated_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_trainees(vec![
            trainee(1, "alice"),
            trainee(2, "bob"),
        ]));
        let metrics = TraineeMetrics {
            skill: SkillMetrics { rank: 6, score: 120 },
            github_prs: 5,
        };
        store.append(1, &metrics, Utc::now()).await.unwrap();
        store.append(2, &metrics, Utc::now()).await.unwrap();
        store.publish_milestone(target(1, "HTML-CSS", NaiveDate::from_ymd_opt(2026, 1, 12).unwrap()));
        store.publish_milestone(target(2, "JS1", NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        store
    }

    fn aggregator(store: Arc<MemoryStore>) -> MilestoneAggregator {
        MilestoneAggregator::new(store.clone(), store)
    }

    #[tokio::test]
    async fn current_milestone_has_latest_date() {
        let aggregator = aggregator(populated_store().await);
        let current = aggregator.current_milestone().await.unwrap();
        assert_eq!(current.module_name, "JS1");
    }

    #[tokio::test]
    async fn no_milestone_is_not_found() {
        let aggregator = aggregator(Arc::new(MemoryStore::default()));

        let err = aggregator.current_milestone().await.unwrap_err();
        assert!(err.is_not_found());

        let err = aggregator.progress_view(Some("alice")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn filter_selects_matching_trainee() {
        let aggregator = aggregator(populated_store().await);

        let view = aggregator.progress_view(Some("bob")).await.unwrap();
        assert_eq!(view.all.len(), 2);
        assert_eq!(view.filtered.len(), 1);
        assert_eq!(view.filtered[0].snapshot.trainee_id, 2);
        assert_eq!(view.target.module_name, "JS1");
    }

    #[tokio::test]
    async fn unknown_filter_yields_empty_subset() {
        let aggregator = aggregator(populated_store().await);

        let view = aggregator.progress_view(Some("nobody")).await.unwrap();
        assert!(view.filtered.is_empty());
        assert_eq!(view.all.len(), 2);
    }

    #[tokio::test]
    async fn no_filter_yields_empty_subset() {
        let aggregator = aggregator(populated_store().await);

        let view = aggregator.progress_view(None).await.unwrap();
        assert!(view.filtered.is_empty());
        assert_eq!(view.all.len(), 2);
    }
}
