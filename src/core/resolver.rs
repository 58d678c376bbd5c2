//! Configuration resolution: raw document → immutable execution plan.
//!
//! Resolution is a pure transform with no side effects, so a plan can be
//! inspected and tested without executing anything. All structural problems
//! (unknown steps or methods, nothing enabled under an enabled step, bad
//! parameters) surface here, before any image is touched.

use std::time::Duration;

use thiserror::Error;

use crate::config::{ParamMap, PipelineConfig, StepConfig};
use crate::core::qc::QcExpectations;
use crate::core::registry::{
    validate_params, MethodPolicy, ParamKind, ParamSpec, Params, StepKind, StepRegistry, StepSpec,
};

/// Parameter schema of the loading step. `inputs` entries may be files,
/// directories, or glob patterns; the batch runner expands them.
const LOAD_SCHEMA: &[ParamSpec] = &[
    ParamSpec::required("inputs", ParamKind::StrList),
    ParamSpec::optional("recursive", ParamKind::Bool),
];

/// Structured validation failure; always fatal before execution starts
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown step '{0}' in selected_steps")]
    UnknownStep(String),

    #[error("step '{0}' appears more than once in selected_steps")]
    DuplicateSelection(String),

    #[error("selected step '{0}' has no configuration block")]
    MissingStepConfig(String),

    #[error("unknown method '{method}' for step '{step}'")]
    UnknownMethod { step: String, method: String },

    #[error("step '{0}' is enabled but none of its methods is enabled")]
    NoMethodSelected(String),

    #[error("invalid parameters for step '{step}'{}: {detail}", method.as_ref().map(|m| format!(" method '{}'", m)).unwrap_or_default())]
    InvalidParam {
        step: String,
        method: Option<String>,
        detail: String,
    },
}

/// A method chosen for execution, with its merged parameters
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub name: String,
    pub params: Params,
}

/// What a resolved step does when the orchestrator reaches it
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Step disabled in configuration; recorded, never an error
    Skip,

    /// Materialize the initial artifact from the run input
    Load { params: Params },

    /// Persist the current artifact as the run output
    Save {
        output_dir: Option<std::path::PathBuf>,
    },

    /// Quality-control checkpoint
    QualityGate { expectations: QcExpectations },

    /// Apply the chosen method(s) in order. `shadowed` lists enabled methods
    /// that lost the priority tie-break, kept for diagnostics.
    Transform {
        methods: Vec<ResolvedMethod>,
        shadowed: Vec<String>,
    },
}

/// Snapshot persistence request attached to a step
#[derive(Debug, Clone)]
pub struct SaveSpec {
    pub output_dir: Option<std::path::PathBuf>,
}

/// One entry of the execution plan
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub step: String,
    pub critical: bool,
    pub action: StepAction,

    /// Persist a snapshot of this step's output
    pub save_snapshot: Option<SaveSpec>,

    /// Wall-clock budget for this step
    pub timeout: Option<Duration>,
}

impl ResolvedStep {
    pub fn is_skip(&self) -> bool {
        matches!(self.action, StepAction::Skip)
    }

    /// Chosen method name(s) for reporting; chained methods joined with '+'.
    pub fn method_label(&self) -> Option<String> {
        match &self.action {
            StepAction::Transform { methods, .. } => Some(
                methods
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join("+"),
            ),
            _ => None,
        }
    }
}

/// Immutable, ordered plan for one run. Built once per configuration;
/// never mutated by the orchestrator.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub experiment: String,
    pub steps: Vec<ResolvedStep>,
}

impl ExecutionPlan {
    /// Number of steps that will actually execute (not marked skip).
    pub fn active_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.is_skip()).count()
    }

    pub fn load_step(&self) -> Option<&ResolvedStep> {
        self.steps
            .iter()
            .find(|s| matches!(s.action, StepAction::Load { .. }))
    }
}

/// Resolve a configuration against the registry into an execution plan.
pub fn resolve(
    config: &PipelineConfig,
    registry: &StepRegistry,
) -> Result<ExecutionPlan, ResolveError> {
    let mut steps = Vec::with_capacity(config.selected_steps.len());

    for (i, name) in config.selected_steps.iter().enumerate() {
        if config.selected_steps[..i].contains(name) {
            return Err(ResolveError::DuplicateSelection(name.clone()));
        }

        let spec = registry
            .get(name)
            .ok_or_else(|| ResolveError::UnknownStep(name.clone()))?;

        let step_config = config
            .step(name)
            .ok_or_else(|| ResolveError::MissingStepConfig(name.clone()))?;

        steps.push(resolve_step(spec, step_config, config)?);
    }

    Ok(ExecutionPlan {
        experiment: config.experiment.clone(),
        steps,
    })
}

fn resolve_step(
    spec: &StepSpec,
    config: &StepConfig,
    pipeline: &PipelineConfig,
) -> Result<ResolvedStep, ResolveError> {
    let timeout = config
        .timeout_seconds
        .or(pipeline.step_timeout_seconds)
        .map(Duration::from_secs);

    let save_snapshot = config.saving_files.then(|| SaveSpec {
        output_dir: config.output_dir.clone(),
    });

    // Step-level enabled: false always wins, even over enabled methods.
    if !config.enabled {
        return Ok(ResolvedStep {
            step: spec.name.to_string(),
            critical: spec.critical,
            action: StepAction::Skip,
            save_snapshot: None,
            timeout,
        });
    }

    let action = match spec.kind {
        StepKind::Load => {
            validate_params(&config.params, LOAD_SCHEMA).map_err(|detail| {
                ResolveError::InvalidParam {
                    step: spec.name.to_string(),
                    method: None,
                    detail,
                }
            })?;
            StepAction::Load {
                params: Params::new(config.params.clone()),
            }
        }
        StepKind::Save => StepAction::Save {
            output_dir: config.output_dir.clone(),
        },
        StepKind::Gate => {
            let expectations: QcExpectations =
                serde_json::from_value(serde_json::Value::Object(config.params.clone())).map_err(
                    |e| ResolveError::InvalidParam {
                        step: spec.name.to_string(),
                        method: None,
                        detail: e.to_string(),
                    },
                )?;
            StepAction::QualityGate { expectations }
        }
        StepKind::Transform => resolve_transform(spec, config)?,
    };

    Ok(ResolvedStep {
        step: spec.name.to_string(),
        critical: spec.critical,
        action,
        save_snapshot,
        timeout,
    })
}

fn resolve_transform(spec: &StepSpec, config: &StepConfig) -> Result<StepAction, ResolveError> {
    let Some(ref method_configs) = config.methods else {
        // No methods map: legal only when the step has a single strategy;
        // the step's params are carried verbatim.
        if spec.methods.len() == 1 {
            let strategy = &spec.methods[0];
            let params = config.params.clone();
            validate_params(&params, strategy.param_schema()).map_err(|detail| {
                ResolveError::InvalidParam {
                    step: spec.name.to_string(),
                    method: Some(strategy.name().to_string()),
                    detail,
                }
            })?;
            return Ok(StepAction::Transform {
                methods: vec![ResolvedMethod {
                    name: strategy.name().to_string(),
                    params: Params::new(params),
                }],
                shadowed: Vec::new(),
            });
        }
        return Err(ResolveError::NoMethodSelected(spec.name.to_string()));
    };

    // Reject unknown method names before looking at enablement.
    for method_name in method_configs.keys() {
        if spec.method(method_name).is_none() {
            return Err(ResolveError::UnknownMethod {
                step: spec.name.to_string(),
                method: method_name.clone(),
            });
        }
    }

    // Collect enabled methods in *registry priority order*, never in
    // configuration key order.
    let enabled: Vec<_> = spec
        .methods
        .iter()
        .filter(|s| method_configs.get(s.name()).is_some_and(|mc| mc.enabled))
        .collect();

    if enabled.is_empty() {
        // An enabled step with nothing to run is ambiguous; it must never
        // silently no-op.
        return Err(ResolveError::NoMethodSelected(spec.name.to_string()));
    }

    let (chosen, shadowed) = match spec.policy {
        MethodPolicy::Exclusive => (vec![enabled[0]], enabled[1..].to_vec()),
        MethodPolicy::Chained => (enabled, Vec::new()),
    };

    let mut methods = Vec::with_capacity(chosen.len());
    for strategy in chosen {
        let name = strategy.name();
        let merged = merge_params(&config.params, &method_configs[name].params);
        validate_params(&merged, strategy.param_schema()).map_err(|detail| {
            ResolveError::InvalidParam {
                step: spec.name.to_string(),
                method: Some(name.to_string()),
                detail,
            }
        })?;
        methods.push(ResolvedMethod {
            name: name.to_string(),
            params: Params::new(merged),
        });
    }

    Ok(StepAction::Transform {
        methods,
        shadowed: shadowed.into_iter().map(|s| s.name().to_string()).collect(),
    })
}

/// Step-level params form the base; method-level params override.
fn merge_params(step: &ParamMap, method: &ParamMap) -> ParamMap {
    let mut merged = step.clone();
    for (k, v) in method {
        merged.insert(k.clone(), v.clone());
    }
    merged
}
