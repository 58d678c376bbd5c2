//! Pipeline configuration documents.
//!
//! A document declares `selected_steps` (insertion order = execution order)
//! and one configuration block per selected step, keyed by step name at the
//! top level. Documents are YAML by default; `.json` files are accepted for
//! compatibility with older experiment configs. Unrecognized top-level keys
//! are ignored for forward compatibility; only blocks named in
//! `selected_steps` are schema-checked.
//!
//! ```yaml
//! experiment: demo
//! selected_steps: [image_loading, quality_control, denoising, image_saving]
//!
//! image_loading:
//!   enabled: true
//!   params:
//!     inputs: ["data/volumes"]
//!     recursive: true
//!
//! denoising:
//!   enabled: true
//!   saving_files: true
//!   methods:
//!     gaussian: { enabled: true, sigma_gaussian: 1.2 }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Free-form key→value parameters, validated against a method's declared
/// schema during plan resolution (not at parse time).
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// Configuration block for a single step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// A disabled step is skipped entirely, regardless of its methods
    pub enabled: bool,

    /// Method variants, absent for single-method steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<HashMap<String, MethodConfig>>,

    /// Step-level parameters, merged under each chosen method's parameters
    #[serde(default, skip_serializing_if = "ParamMap::is_empty")]
    pub params: ParamMap,

    /// Persist a snapshot of this step's output artifact
    #[serde(default)]
    pub saving_files: bool,

    /// Where snapshots for this step go (defaults to the run output dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Per-step wall-clock budget override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Configuration for one method variant of a step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodConfig {
    pub enabled: bool,

    /// Method-specific parameters (untyped until resolution)
    #[serde(flatten)]
    pub params: ParamMap,
}

/// Raw document schema. Step blocks live at the top level, so everything
/// that is not a recognized key is collected and matched against
/// `selected_steps` afterwards.
#[derive(Debug, Clone, Deserialize)]
struct Document {
    #[serde(default = "default_experiment")]
    experiment: String,

    selected_steps: Vec<String>,

    #[serde(default = "default_output_dir")]
    output_dir: PathBuf,

    #[serde(default = "default_workers")]
    workers: usize,

    /// Default per-step wall-clock budget in seconds (none = unlimited)
    #[serde(default)]
    step_timeout_seconds: Option<u64>,

    #[serde(flatten)]
    blocks: HashMap<String, serde_yaml::Value>,
}

fn default_experiment() -> String {
    "experiment".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_workers() -> usize {
    4
}

/// A parsed pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Experiment name, prefixes every snapshot and report filename
    pub experiment: String,

    /// Ordered step selection; execution order
    pub selected_steps: Vec<String>,

    /// Root directory for snapshots and run reports
    pub output_dir: PathBuf,

    /// Bounded worker pool size for batch execution
    pub workers: usize,

    /// Default per-step wall-clock budget in seconds
    pub step_timeout_seconds: Option<u64>,

    /// Step name → parsed configuration block
    pub steps: HashMap<String, StepConfig>,
}

impl PipelineConfig {
    /// Load a configuration from a YAML or JSON file (chosen by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
        .with_context(|| format!("Failed to parse configuration file: {}", path.display()))
    }

    /// Parse a YAML configuration document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: Document =
            serde_yaml::from_str(content).context("Failed to parse configuration YAML")?;
        Self::from_document(doc)
    }

    /// Parse a JSON configuration document.
    pub fn from_json(content: &str) -> Result<Self> {
        let doc: Document =
            serde_json::from_str(content).context("Failed to parse configuration JSON")?;
        Self::from_document(doc)
    }

    fn from_document(doc: Document) -> Result<Self> {
        let mut steps = HashMap::new();

        // Only blocks for selected steps are parsed; everything else is
        // forward-compatible noise.
        for name in &doc.selected_steps {
            if let Some(value) = doc.blocks.get(name) {
                let step: StepConfig = serde_yaml::from_value(value.clone())
                    .with_context(|| format!("Invalid configuration block for step '{}'", name))?;
                steps.insert(name.clone(), step);
            }
        }

        Ok(Self {
            experiment: doc.experiment,
            selected_steps: doc.selected_steps,
            output_dir: doc.output_dir,
            workers: doc.workers.max(1),
            step_timeout_seconds: doc.step_timeout_seconds,
            steps,
        })
    }

    /// Get the configuration block for a step.
    pub fn step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.get(name)
    }
}
