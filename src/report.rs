use std::fmt::Write;

use crate::models::{ExtractionReport, LatestSnapshot, MilestoneTarget, ProgressView, UnitStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGap {
    pub rank_met: bool,
    pub points_short: i32,
    pub prs_short: i32,
}

impl TargetGap {
    pub fn is_on_track(&self) -> bool {
        self.rank_met && self.points_short == 0 && self.prs_short == 0
    }
}

/// Lower rank numbers are better, so a rank at or below the target meets it.
pub fn gap_to_target(row: &LatestSnapshot, target: &MilestoneTarget) -> TargetGap {
    TargetGap {
        rank_met: row.snapshot.codewars_rank <= target.codewars_rank_target,
        points_short: (target.codewars_points_target - row.snapshot.codewars_js_points).max(0),
        prs_short: (target.github_prs_target - row.snapshot.github_prs).max(0),
    }
}

pub fn render_extraction(report: &ExtractionReport) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "Extraction run {} started {}",
        report.run_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if report.outcomes.is_empty() {
        let _ = writeln!(output, "No trainees registered.");
        return output;
    }

    for outcome in &report.outcomes {
        let line = match &outcome.status {
            UnitStatus::Succeeded { snapshot_id } => format!("snapshot {snapshot_id}"),
            UnitStatus::Failed { reason } => format!("FAILED: {reason}"),
            UnitStatus::Skipped => "skipped (run cancelled)".to_string(),
        };
        let _ = writeln!(
            output,
            "- {} (#{}): {}",
            outcome.github_username, outcome.trainee_id, line
        );
    }

    let _ = writeln!(
        output,
        "{} succeeded, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped()
    );
    output
}

pub fn render_progress(view: &ProgressView) -> String {
    let mut output = String::new();
    let target = &view.target;

    let _ = writeln!(output, "# Milestone Progress");
    let _ = writeln!(
        output,
        "Target {} ({}): rank {} kyu, {} points, {} PRs",
        target.module_name,
        target.date,
        target.codewars_rank_target,
        target.codewars_points_target,
        target.github_prs_target
    );
    let _ = writeln!(output);

    if view.filtered.is_empty() {
        let _ = writeln!(output, "No snapshot recorded for this trainee yet.");
    } else {
        for row in &view.filtered {
            let gap = gap_to_target(row, target);
            let _ = writeln!(
                output,
                "{} ({}): rank {} kyu, {} points, {} PRs as of {}",
                row.display_name,
                row.github_username,
                row.snapshot.codewars_rank,
                row.snapshot.codewars_js_points,
                row.snapshot.github_prs,
                row.snapshot.timestamp.format("%Y-%m-%d")
            );
            let _ = writeln!(output, "{}", describe_gap(&gap));
        }
    }

    let on_track = view
        .all
        .iter()
        .filter(|row| gap_to_target(row, target).is_on_track())
        .count();
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Cohort: {} of {} trainees on track",
        on_track,
        view.all.len()
    );

    output
}

fn describe_gap(gap: &TargetGap) -> String {
    if gap.is_on_track() {
        return "On track for this milestone.".to_string();
    }

    let mut missing = Vec::new();
    if !gap.rank_met {
        missing.push("rank target not reached".to_string());
    }
    if gap.points_short > 0 {
        missing.push(format!("{} points short", gap.points_short));
    }
    if gap.prs_short > 0 {
        missing.push(format!("{} PRs short", gap.prs_short));
    }
    format!("Behind: {}.", missing.join(", "))
}
