use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::models::{LatestSnapshot, MilestoneTarget, Snapshot, SnapshotId, Trainee, TraineeId, TraineeMetrics};

/// Appends may arrive concurrently; each writes its own row.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(
        &self,
        trainee_id: TraineeId,
        metrics: &TraineeMetrics,
        timestamp: DateTime<Utc>,
    ) -> Result<SnapshotId>;

    /// One row per trainee that has snapshots: the one with the highest id.
    async fn latest_per_trainee(&self) -> Result<Vec<LatestSnapshot>>;

    /// Every snapshot of a trainee, oldest first.
    async fn history(&self, trainee_id: TraineeId) -> Result<Vec<Snapshot>>;
}

#[async_trait]
pub trait TraineeDirectory: Send + Sync {
    async fn list_trainees(&self) -> Result<Vec<Trainee>>;
}

#[async_trait]
pub trait MilestoneSource: Send + Sync {
    /// Target with the latest date; ties go to the most recently inserted row.
    async fn latest_milestone(&self) -> Result<Option<MilestoneTarget>>;
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn snapshot_from_row(row: &PgRow) -> std::result::Result<Snapshot, sqlx::Error> {
    Ok(Snapshot {
        id: row.try_get("id")?,
        trainee_id: row.try_get("traineeid")?,
        codewars_rank: row.try_get("codewarsrank")?,
        codewars_js_points: row.try_get("codewarsjspoints")?,
        github_prs: row.try_get("githubprs")?,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn append(
        &self,
        trainee_id: TraineeId,
        metrics: &TraineeMetrics,
        timestamp: DateTime<Utc>,
    ) -> Result<SnapshotId> {
        let id: SnapshotId = sqlx::query(
            r#"
            INSERT INTO extracteddata
            (traineeid, codewarsrank, codewarsjspoints, githubprs, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(trainee_id)
        .bind(metrics.skill.rank)
        .bind(metrics.skill.score)
        .bind(metrics.github_prs)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(id)
    }

    async fn latest_per_trainee(&self) -> Result<Vec<LatestSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT t.githubusername, t.codewarsusername, t.displayname, t.cohort,
                   e.id, e.traineeid, e.codewarsrank, e.codewarsjspoints, e.githubprs, e.timestamp
            FROM trainee t
            JOIN (
                SELECT traineeid, MAX(id) AS latest_id
                FROM extracteddata
                GROUP BY traineeid
            ) latest ON latest.traineeid = t.id
            JOIN extracteddata e ON e.id = latest.latest_id
            ORDER BY t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latest = Vec::with_capacity(rows.len());
        for row in rows {
            latest.push(LatestSnapshot {
                github_username: row.try_get("githubusername")?,
                codewars_username: row.try_get("codewarsusername")?,
                display_name: row.try_get("displayname")?,
                cohort: row.try_get("cohort")?,
                snapshot: snapshot_from_row(&row)?,
            });
        }

        Ok(latest)
    }

    async fn history(&self, trainee_id: TraineeId) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, traineeid, codewarsrank, codewarsjspoints, githubprs, timestamp
            FROM extracteddata
            WHERE traineeid = $1
            ORDER BY id ASC
            "#,
        )
        .bind(trainee_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(snapshot_from_row(&row)?);
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl TraineeDirectory for PgStore {
    async fn list_trainees(&self) -> Result<Vec<Trainee>> {
        let rows = sqlx::query(
            "SELECT id, githubusername, codewarsusername, displayname, cohort FROM trainee ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut trainees = Vec::with_capacity(rows.len());
        for row in rows {
            trainees.push(Trainee {
                id: row.try_get("id")?,
                github_username: row.try_get("githubusername")?,
                codewars_username: row.try_get("codewarsusername")?,
                display_name: row.try_get("displayname")?,
                cohort: row.try_get("cohort")?,
            });
        }
        Ok(trainees)
    }
}

#[async_trait]
impl MilestoneSource for PgStore {
    async fn latest_milestone(&self) -> Result<Option<MilestoneTarget>> {
        let row = sqlx::query(
            r#"
            SELECT id, modulename, date, codewarsrank, codewarsjspoints, githubprs
            FROM milestone
            ORDER BY date DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(MilestoneTarget {
            id: row.try_get("id")?,
            module_name: row.try_get("modulename")?,
            date: row.try_get("date")?,
            codewars_rank_target: row.try_get("codewarsrank")?,
            codewars_points_target: row.try_get("codewarsjspoints")?,
            github_prs_target: row.try_get("githubprs")?,
        }))
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let trainees = vec![
        ("avery-lee", "averylee", "Avery Lee", "WM5"),
        ("jules-moreno", "jmoreno", "Jules Moreno", "WM5"),
        ("kiara-patel", "kiarap", "Kiara Patel", "LDN10"),
    ];

    for (github, codewars, name, cohort) in trainees {
        sqlx::query(
            r#"
            INSERT INTO trainee (githubusername, codewarsusername, displayname, cohort)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (githubusername) DO UPDATE
            SET codewarsusername = EXCLUDED.codewarsusername,
                displayname = EXCLUDED.displayname,
                cohort = EXCLUDED.cohort
            "#,
        )
        .bind(github)
        .bind(codewars)
        .bind(name)
        .bind(cohort)
        .execute(pool)
        .await?;
    }

    let milestones = vec![
        (
            "HTML-CSS",
            NaiveDate::from_ymd_opt(2026, 1, 12).context("invalid date")?,
            8,
            20,
            3,
        ),
        (
            "JavaScript-Core-1",
            NaiveDate::from_ymd_opt(2026, 3, 2).context("invalid date")?,
            7,
            100,
            8,
        ),
    ];

    for (module, date, rank, points, prs) in milestones {
        sqlx::query(
            r#"
            INSERT INTO milestone (modulename, date, codewarsrank, codewarsjspoints, githubprs)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (modulename, date) DO NOTHING
            "#,
        )
        .bind(module)
        .bind(date)
        .bind(rank)
        .bind(points)
        .bind(prs)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        githubusername: String,
        codewarsusername: String,
        displayname: String,
        cohort: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid trainee row {}", line + 1))?;
        if row.githubusername.trim().is_empty() {
            anyhow::bail!("row {} has no github username", line + 1);
        }

        // xmax = 0 only for freshly inserted rows.
        let fresh: bool = sqlx::query(
            r#"
            INSERT INTO trainee (githubusername, codewarsusername, displayname, cohort)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (githubusername) DO UPDATE
            SET codewarsusername = EXCLUDED.codewarsusername,
                displayname = EXCLUDED.displayname,
                cohort = EXCLUDED.cohort
            RETURNING (xmax = 0) AS fresh
            "#,
        )
        .bind(row.githubusername.trim())
        .bind(row.codewarsusername.trim())
        .bind(row.displayname.trim())
        .bind(row.cohort.trim())
        .fetch_one(pool)
        .await?
        .try_get("fresh")?;

        if fresh {
            inserted += 1;
        }
    }

    Ok(inserted)
}
