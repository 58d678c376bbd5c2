//! Plan execution for a single input volume.
//!
//! The orchestrator walks the resolved steps strictly in plan order,
//! threading one current `ImageArtifact` through them. Runs are strictly
//! forward-progressing: no step re-entry, no backtracking.
//!
//! Failure policy:
//! - Critical steps (loading, saving) abort the remaining plan; nothing
//!   downstream can operate on a nonexistent artifact.
//! - Non-critical failures are recorded and execution continues with the
//!   artifact unchanged from before the failed step.
//! - A strict-mode quality gate failure aborts like a critical step.
//!
//! Every exit path produces a finalized, persisted run report.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::core::qc::{self, QcMode};
use crate::core::registry::{StepError, StepRegistry};
use crate::core::resolver::{ExecutionPlan, ResolvedStep, StepAction};
use crate::core::store::{ArtifactStore, Snapshot};
use crate::domain::{ImageArtifact, QcReport, QcVerdict, RunReport, RunStatus, StepResult};

/// Executes resolved plans over single inputs.
pub struct Orchestrator {
    registry: Arc<StepRegistry>,
}

/// What a successfully executed step produced
enum Output {
    /// Step was disabled
    Skipped,

    /// A new current artifact
    Image(ImageArtifact),

    /// The current artifact was persisted
    Saved(Snapshot),

    /// The quality gate ran
    Gate(QcReport, QcMode),
}

impl Orchestrator {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }

    /// Execute a plan over one input volume. Failures are captured at the
    /// step boundary and recorded in the returned report; this function
    /// never loses a partial run.
    #[instrument(skip(self, plan, store), fields(experiment = %store.experiment_id()))]
    pub fn run(&self, plan: &ExecutionPlan, input: &Path, store: &mut ArtifactStore) -> RunReport {
        let mut report = RunReport::new(store.experiment_id(), input.to_path_buf());
        let mut current: Option<ImageArtifact> = None;

        info!(input = %input.display(), steps = plan.steps.len(), "Starting run");

        for resolved in &plan.steps {
            let started = Instant::now();
            let mut outcome = self.execute_action(resolved, input, &current, store);
            let elapsed = started.elapsed();
            let duration_ms = elapsed.as_millis() as u64;

            // Strategies are opaque, non-cooperative computations, so the
            // wall-clock budget is checked when they return. Skips do no
            // work and the gate's verdict must reach the run report, so
            // both are exempt.
            if let (Ok(output), Some(budget)) = (&outcome, resolved.timeout) {
                if !matches!(output, Output::Skipped | Output::Gate(..)) && elapsed > budget {
                    outcome = Err(StepError::Timeout {
                        elapsed_ms: duration_ms,
                        budget_ms: budget.as_millis() as u64,
                    });
                }
            }

            match outcome {
                Ok(Output::Skipped) => {
                    debug!(step = %resolved.step, "Step disabled, skipping");
                    report.push(StepResult::skipped(&resolved.step));
                }

                Ok(Output::Image(image)) => {
                    let mut result =
                        StepResult::ok(&resolved.step, resolved.method_label(), duration_ms);
                    if let Some(ref save) = resolved.save_snapshot {
                        self.persist_snapshot(resolved, &image, save.output_dir.as_deref(), store, &mut result);
                    }
                    debug!(step = %resolved.step, duration_ms, "Step completed");
                    current = Some(image);
                    report.push(result);
                }

                Ok(Output::Saved(snapshot)) => {
                    let mut result =
                        StepResult::ok(&resolved.step, resolved.method_label(), duration_ms);
                    result.snapshot_path = Some(snapshot.path);
                    result.snapshot_sha256 = Some(snapshot.sha256);
                    report.push(result);
                }

                Ok(Output::Gate(qc_report, mode)) => {
                    let verdict = qc_report.verdict;
                    report.qc = Some(qc_report);

                    match (verdict, mode) {
                        (QcVerdict::Fail, QcMode::Strict) => {
                            let detail = "quality control failed in strict mode";
                            error!(step = %resolved.step, "{}", detail);
                            report.push(StepResult::failed(
                                &resolved.step,
                                None,
                                duration_ms,
                                detail,
                            ));
                            report.abort(&resolved.step, detail);
                            break;
                        }
                        (QcVerdict::Fail, QcMode::Advisory) => {
                            warn!(step = %resolved.step, "Quality control failed (advisory mode), continuing");
                            report.push(StepResult::ok(&resolved.step, None, duration_ms));
                        }
                        (QcVerdict::Warn, _) => {
                            warn!(step = %resolved.step, "Quality control passed with warnings");
                            report.push(StepResult::ok(&resolved.step, None, duration_ms));
                        }
                        (QcVerdict::Pass, _) => {
                            debug!(step = %resolved.step, "Quality control passed");
                            report.push(StepResult::ok(&resolved.step, None, duration_ms));
                        }
                    }
                }

                Err(e) => {
                    report.push(StepResult::failed(
                        &resolved.step,
                        resolved.method_label(),
                        duration_ms,
                        e.to_string(),
                    ));

                    if resolved.critical {
                        error!(step = %resolved.step, error = %e, "Critical step failed, aborting run");
                        report.abort(&resolved.step, e.to_string());
                        break;
                    }

                    // Non-critical: bounded blast radius, keep going with
                    // the artifact as it stood before this step.
                    warn!(step = %resolved.step, error = %e, "Step failed, continuing");
                }
            }
        }

        if report.status == RunStatus::Running {
            report.complete();
        }

        match store.persist_report(&report) {
            Ok(path) => info!(report = %path.display(), "Run report persisted"),
            Err(e) => warn!(error = %e, "Failed to persist run report"),
        }

        report
    }

    fn execute_action(
        &self,
        resolved: &ResolvedStep,
        input: &Path,
        current: &Option<ImageArtifact>,
        store: &mut ArtifactStore,
    ) -> Result<Output, StepError> {
        match &resolved.action {
            StepAction::Skip => Ok(Output::Skipped),

            StepAction::Load { .. } => {
                let image = ArtifactStore::load_volume(input)
                    .map_err(|e| StepError::Algorithm(e.to_string()))?;
                image
                    .validate()
                    .map_err(|e| StepError::Algorithm(format!("input volume rejected: {}", e)))?;
                info!(dims = ?image.dims, spacing = ?image.spacing, "Loaded volume");
                Ok(Output::Image(image))
            }

            StepAction::Save { output_dir } => {
                let image = current.as_ref().ok_or(StepError::NoArtifact)?;
                let snapshot = store
                    .persist_snapshot(&resolved.step, image, output_dir.as_deref())
                    .map_err(|e| StepError::Algorithm(format!("failed to save output: {}", e)))?;
                Ok(Output::Saved(snapshot))
            }

            StepAction::QualityGate { expectations } => {
                let image = current.as_ref().ok_or(StepError::NoArtifact)?;
                Ok(Output::Gate(qc::evaluate(image, expectations), expectations.mode))
            }

            StepAction::Transform { methods, .. } => {
                let spec = self.registry.get(&resolved.step).ok_or_else(|| {
                    StepError::Algorithm(format!("step '{}' missing from registry", resolved.step))
                })?;

                let mut working = current.clone().ok_or(StepError::NoArtifact)?;
                for method in methods {
                    let strategy = spec.method(&method.name).ok_or_else(|| {
                        StepError::Algorithm(format!(
                            "method '{}' missing from registry",
                            method.name
                        ))
                    })?;
                    working = strategy.apply(working, &method.params)?;
                    working.validate()?;
                }
                Ok(Output::Image(working))
            }
        }
    }

    /// Snapshot persistence is best-effort: failure is a recorded warning,
    /// never a rollback of the in-memory artifact.
    fn persist_snapshot(
        &self,
        resolved: &ResolvedStep,
        image: &ImageArtifact,
        dir: Option<&Path>,
        store: &mut ArtifactStore,
        result: &mut StepResult,
    ) {
        match store.persist_snapshot(&resolved.step, image, dir) {
            Ok(snapshot) => {
                result.snapshot_path = Some(snapshot.path);
                result.snapshot_sha256 = Some(snapshot.sha256);
            }
            Err(e) => {
                warn!(step = %resolved.step, error = %e, "Snapshot not durably saved, continuing");
                result.persist_warning = Some(format!("snapshot not saved: {}", e));
            }
        }
    }
}
