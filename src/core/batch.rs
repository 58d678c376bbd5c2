//! Batch execution over a collection of input volumes.
//!
//! Inputs are enumerated from the loading step's parameters (explicit
//! files, directories, or glob patterns) and processed on a bounded worker
//! pool. Each worker executes one orchestrator run to completion; runs
//! share only the read-only registry and a collision-free filesystem
//! namespace (experiment name, batch index, input stem), so one item's
//! failure never affects its siblings.
//!
//! Cancellation stops dispatching new items; in-flight runs finish or fail
//! naturally (strategies are non-cooperative, so there is no mid-step
//! preemption).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::core::orchestrator::Orchestrator;
use crate::core::registry::{Params, StepRegistry};
use crate::core::resolver::{resolve, ResolveError, StepAction};
use crate::core::store::{ArtifactStore, VOLUME_EXT};
use crate::domain::{BatchSummary, RunReport};

/// Failures before any run starts
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("the plan has no enabled image_loading step; batch execution needs one")]
    NoLoadStep,

    #[error("no input volumes found")]
    NoInputs,

    #[error("invalid input pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("io error while discovering inputs: {0}")]
    Io(#[from] std::io::Error),
}

/// Fans the orchestrator out across a batch of inputs.
pub struct BatchRunner {
    registry: Arc<StepRegistry>,
    cancel: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops dispatch of further items when set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Resolve the configuration once, then run the plan over every
    /// discovered input. Resolution failures return before any image is
    /// touched.
    #[instrument(skip(self, config), fields(experiment = %config.experiment))]
    pub async fn run(&self, config: &PipelineConfig) -> Result<BatchSummary, BatchError> {
        let plan = resolve(config, &self.registry)?;

        let load = plan.load_step().ok_or(BatchError::NoLoadStep)?;
        let StepAction::Load { params } = &load.action else {
            return Err(BatchError::NoLoadStep);
        };
        let inputs = discover_inputs(params)?;

        info!(inputs = inputs.len(), workers = config.workers, "Starting batch");

        let plan = Arc::new(plan);
        let semaphore = Arc::new(Semaphore::new(config.workers));
        let mut tasks: JoinSet<(usize, RunReport)> = JoinSet::new();

        for (index, input) in inputs.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(remaining = inputs.len() - index, "Batch cancelled, not dispatching remaining items");
                break;
            }

            // Acquire before spawning so dispatch itself is bounded.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let plan = plan.clone();
            let registry = self.registry.clone();
            let input = input.clone();
            let input_for_panic = input.clone();
            let output_dir = config.output_dir.clone();
            // The batch index keeps the id unique even when two inputs in
            // different directories share a filename.
            let experiment_id =
                format!("{}-{:03}-{}", plan.experiment, index, subject_stem(&input));
            let experiment_for_panic = experiment_id.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = tokio::task::spawn_blocking(move || {
                    let orchestrator = Orchestrator::new(registry);
                    match ArtifactStore::create(&output_dir, &experiment_id) {
                        Ok(mut store) => orchestrator.run(&plan, &input, &mut store),
                        Err(e) => {
                            let mut report = RunReport::new(experiment_id, input);
                            report.abort("artifact_store", e.to_string());
                            report
                        }
                    }
                })
                .await;

                let report = outcome.unwrap_or_else(|join_error| {
                    // A panicking strategy must not take the batch down.
                    error!(error = %join_error, "Run worker panicked");
                    let mut report = RunReport::new(experiment_for_panic, input_for_panic);
                    report.abort("worker", format!("run worker panicked: {}", join_error));
                    report
                });

                (index, report)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => error!(error = %e, "Batch task failed to join"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        let summary =
            BatchSummary::from_reports(indexed.into_iter().map(|(_, report)| report).collect());
        info!(
            total = summary.total,
            completed = summary.completed,
            aborted = summary.aborted,
            "Batch finished"
        );
        Ok(summary)
    }
}

/// Expand the loading step's `inputs` entries into concrete files.
///
/// Directories are walked (optionally recursively) for volume snapshots;
/// glob patterns are expanded; explicit file paths are kept as-is even if
/// missing, so a missing file becomes an aborted run rather than a
/// discovery error.
fn discover_inputs(params: &Params) -> Result<Vec<PathBuf>, BatchError> {
    let entries = params.str_list("inputs").unwrap_or_default();
    let recursive = params.bool_or("recursive", false);

    let mut inputs = Vec::new();
    for entry in &entries {
        let path = PathBuf::from(entry);
        if path.is_dir() {
            let mut found = Vec::new();
            collect_volumes(&path, recursive, &mut found)?;
            found.sort();
            inputs.extend(found);
        } else if entry.contains(['*', '?', '[']) {
            let mut found = Vec::new();
            for matched in glob::glob(entry)? {
                match matched {
                    Ok(p) if p.is_file() => found.push(p),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping unreadable glob match"),
                }
            }
            found.sort();
            inputs.extend(found);
        } else {
            inputs.push(path);
        }
    }

    if inputs.is_empty() {
        return Err(BatchError::NoInputs);
    }
    Ok(inputs)
}

fn collect_volumes(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_volumes(&path, true, out)?;
            }
        } else if path
            .to_string_lossy()
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", VOLUME_EXT))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Subject identifier from an input path: `sub01.vol.json` → `sub01`.
fn subject_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    name.trim_end_matches(&format!(".{}", VOLUME_EXT))
        .trim_end_matches(".json")
        .to_string()
}
