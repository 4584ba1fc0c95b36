use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

pub type TraineeId = i32;
pub type SnapshotId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trainee {
    pub id: TraineeId,
    #[serde(rename = "githubusername")]
    pub github_username: String,
    #[serde(rename = "codewarsusername")]
    pub codewars_username: String,
    #[serde(rename = "displayname")]
    pub display_name: String,
    pub cohort: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneTarget {
    pub id: i32,
    #[serde(rename = "modulename")]
    pub module_name: String,
    pub date: NaiveDate,
    #[serde(rename = "codewarsrank")]
    pub codewars_rank_target: i32,
    #[serde(rename = "codewarsjspoints")]
    pub codewars_points_target: i32,
    #[serde(rename = "githubprs")]
    pub github_prs_target: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillMetrics {
    pub rank: i32,
    pub score: i32,
}

impl SkillMetrics {
    /// Worst known rank, no points.
    pub const DEFAULT: SkillMetrics = SkillMetrics { rank: 9, score: 0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraineeMetrics {
    pub skill: SkillMetrics,
    pub github_prs: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    #[serde(rename = "traineeid")]
    pub trainee_id: TraineeId,
    #[serde(rename = "codewarsrank")]
    pub codewars_rank: i32,
    #[serde(rename = "codewarsjspoints")]
    pub codewars_js_points: i32,
    #[serde(rename = "githubprs")]
    pub github_prs: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestSnapshot {
    #[serde(rename = "githubusername")]
    pub github_username: String,
    #[serde(rename = "codewarsusername")]
    pub codewars_username: String,
    #[serde(rename = "displayname")]
    pub display_name: String,
    pub cohort: String,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    pub all: Vec<LatestSnapshot>,
    pub filtered: Vec<LatestSnapshot>,
    pub target: MilestoneTarget,
}

impl Serialize for ProgressView {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (&self.all, &self.filtered, &self.target).serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded { snapshot_id: SnapshotId },
    Failed { reason: String },
    /// Never started because the run was cancelled first.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraineeOutcome {
    pub trainee_id: TraineeId,
    pub github_username: String,
    #[serde(flatten)]
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<TraineeOutcome>,
}

impl ExtractionReport {
    pub fn succeeded(&self) -> usize {
        self.count(|status| matches!(status, UnitStatus::Succeeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, UnitStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, UnitStatus::Skipped))
    }

    pub fn is_complete_success(&self) -> bool {
        self.succeeded() == self.outcomes.len()
    }

    fn count(&self, predicate: impl Fn(&UnitStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}
