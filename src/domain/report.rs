//! Run and batch reports.
//!
//! A `RunReport` records what executed for one input volume, with what
//! outcome. It is created at run start, appended to by the orchestrator, and
//! finalized exactly once; the JSON schema is consumed by downstream tooling
//! and is part of the compatibility surface.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::qc::{QcReport, QcVerdict};

/// Outcome of a single resolved step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step ran and produced a new current artifact
    Ok,

    /// Step was disabled in the configuration
    Skipped,

    /// Step raised or returned an invalid artifact
    Failed,
}

/// Record of one step's execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name from the plan
    pub step: String,

    /// Chosen method(s); chained methods joined with '+'
    pub method: Option<String>,

    pub status: StepStatus,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// Error detail when status is `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Where the snapshot was persisted, if saving was configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,

    /// sha256 of the persisted snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_sha256: Option<String>,

    /// Set when the step succeeded but its snapshot could not be written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_warning: Option<String>,
}

impl StepResult {
    pub fn skipped(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            method: None,
            status: StepStatus::Skipped,
            duration_ms: 0,
            error: None,
            snapshot_path: None,
            snapshot_sha256: None,
            persist_warning: None,
        }
    }

    pub fn ok(step: impl Into<String>, method: Option<String>, duration_ms: u64) -> Self {
        Self {
            step: step.into(),
            method,
            status: StepStatus::Ok,
            duration_ms,
            error: None,
            snapshot_path: None,
            snapshot_sha256: None,
            persist_warning: None,
        }
    }

    pub fn failed(
        step: impl Into<String>,
        method: Option<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step: step.into(),
            method,
            status: StepStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            snapshot_path: None,
            snapshot_sha256: None,
            persist_warning: None,
        }
    }
}

/// Overall state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Currently executing
    Running,

    /// All plan entries produced a result (failures may be recorded)
    Completed,

    /// A critical failure or strict QC failure stopped the plan early
    Aborted { step: String, error: String },
}

/// Structured record of one pipeline run over one input volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// Experiment-scoped identifier, also the snapshot filename prefix
    pub experiment_id: String,

    /// Input volume this run processed
    pub input: PathBuf,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// One entry per resolved step, in plan order up to any abort
    pub steps: Vec<StepResult>,

    /// Gate report, present if the quality-control checkpoint ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qc: Option<QcReport>,
}

impl RunReport {
    pub fn new(experiment_id: impl Into<String>, input: PathBuf) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            experiment_id: experiment_id.into(),
            input,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            qc: None,
        }
    }

    pub fn push(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn abort(&mut self, step: impl Into<String>, error: impl Into<String>) {
        self.status = RunStatus::Aborted {
            step: step.into(),
            error: error.into(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Completed and no recorded QC `fail` verdict. This is what the CLI
    /// exit code reflects.
    pub fn is_clean(&self) -> bool {
        self.is_completed() && self.qc.as_ref().map_or(true, |q| q.verdict != QcVerdict::Fail)
    }
}

/// Aggregation of every run report in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub aborted: usize,
    pub reports: Vec<RunReport>,
}

impl BatchSummary {
    pub fn from_reports(reports: Vec<RunReport>) -> Self {
        let completed = reports.iter().filter(|r| r.is_completed()).count();
        Self {
            total: reports.len(),
            completed,
            aborted: reports.len() - completed,
            reports,
        }
    }

    /// True when every run completed and no QC gate failed.
    pub fn all_clean(&self) -> bool {
        self.reports.iter().all(|r| r.is_clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lifecycle() {
        let mut report = RunReport::new("exp-sub01", PathBuf::from("sub01.vol.json"));
        assert_eq!(report.status, RunStatus::Running);

        report.push(StepResult::ok("denoising", Some("gaussian".into()), 12));
        report.complete();

        assert!(report.is_completed());
        assert!(report.completed_at.is_some());
        assert_eq!(report.steps.len(), 1);
    }

    #[test]
    fn test_abort_records_step_and_error() {
        let mut report = RunReport::new("exp-sub02", PathBuf::from("sub02.vol.json"));
        report.abort("image_loading", "no such file");

        match &report.status {
            RunStatus::Aborted { step, error } => {
                assert_eq!(step, "image_loading");
                assert_eq!(error, "no such file");
            }
            other => panic!("expected aborted, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_summary_counts() {
        let mut ok = RunReport::new("a", PathBuf::from("a"));
        ok.complete();
        let mut bad = RunReport::new("b", PathBuf::from("b"));
        bad.abort("image_loading", "boom");

        let summary = BatchSummary::from_reports(vec![ok, bad]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.aborted, 1);
        assert!(!summary.all_clean());
    }

    #[test]
    fn test_report_serializes_with_status_tag() {
        let mut report = RunReport::new("exp", PathBuf::from("x"));
        report.complete();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"completed\""));
    }
}
