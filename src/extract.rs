use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::SnapshotStore;
use crate::metrics::{Contributions, SkillRanking};
use crate::models::{ExtractionReport, Trainee, TraineeMetrics, TraineeOutcome, UnitStatus};

#[derive(Clone)]
pub struct Orchestrator {
    skills: Arc<dyn SkillRanking>,
    contributions: Arc<dyn Contributions>,
    store: Arc<dyn SnapshotStore>,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        skills: Arc<dyn SkillRanking>,
        contributions: Arc<dyn Contributions>,
        store: Arc<dyn SnapshotStore>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            skills,
            contributions,
            store,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run_extraction(
        &self,
        trainees: &[Trainee],
        cancel: &CancellationToken,
    ) -> ExtractionReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, trainees = trainees.len(), %started_at, "extraction run started");

        let units: Vec<_> = trainees
            .iter()
            .enumerate()
            .map(|(index, trainee)| self.isolated_unit(index, run_id, trainee.clone(), started_at, cancel))
            .collect();
        let mut indexed: Vec<(usize, TraineeOutcome)> = stream::iter(units)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let report = ExtractionReport {
            run_id,
            started_at,
            outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        info!(
            %run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "extraction run finished"
        );
        report
    }

    /// Runs one unit; a panic inside it becomes a failed outcome for that trainee.
    async fn isolated_unit(
        &self,
        index: usize,
        run_id: Uuid,
        trainee: Trainee,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> (usize, TraineeOutcome) {
        let unit = AssertUnwindSafe(self.run_unit(run_id, &trainee, timestamp, cancel));
        let status = match unit.catch_unwind().await {
            Ok(status) => status,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(%run_id, trainee_id = trainee.id, reason, "extraction unit panicked");
                UnitStatus::Failed {
                    reason: format!("unit panicked: {reason}"),
                }
            }
        };

        let outcome = TraineeOutcome {
            trainee_id: trainee.id,
            github_username: trainee.github_username,
            status,
        };
        (index, outcome)
    }

    async fn run_unit(
        &self,
        run_id: Uuid,
        trainee: &Trainee,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> UnitStatus {
        if cancel.is_cancelled() {
            return UnitStatus::Skipped;
        }

        let (skill, github_prs) = tokio::join!(
            self.skills.fetch(&trainee.codewars_username),
            self.contributions.fetch(&trainee.github_username),
        );
        let metrics = TraineeMetrics { skill, github_prs };

        match self.store.append(trainee.id, &metrics, timestamp).await {
            Ok(snapshot_id) => UnitStatus::Succeeded { snapshot_id },
            Err(err) => {
                warn!(%run_id, trainee_id = trainee.id, error = %err, "snapshot append failed");
                UnitStatus::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
