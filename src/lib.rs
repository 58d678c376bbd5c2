//! voxprep - configurable preprocessing pipelines for volumetric images
//!
//! A pipeline engine for 3D/4D image volumes: a configuration document
//! selects and orders steps, each step dispatches to one of its registered
//! method strategies, and a quality-control gate can stop bad data before
//! the expensive stages run.
//!
//! # Architecture
//!
//! Execution is split into two phases:
//! - Resolution: the raw configuration is checked against the step registry
//!   and turned into an immutable execution plan. Every structural problem
//!   (unknown step or method, bad parameter, no enabled method) fails here.
//! - Orchestration: the plan runs over each input volume, threading one
//!   current image artifact through the steps and recording a run report.
//!
//! Batches fan out on a bounded worker pool; one input's failure is
//! isolated to its own aborted report.
//!
//! # Modules
//!
//! - `config`: configuration documents (YAML/JSON)
//! - `core`: registry, resolver, orchestrator, QC gate, artifact store, batch
//! - `domain`: data structures (ImageArtifact, RunReport, QcReport)
//! - `steps`: built-in steps and their method strategies
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a configured pipeline over its input batch
//! voxprep run experiment.yaml
//!
//! # Inspect the resolved plan without executing
//! voxprep plan experiment.yaml
//!
//! # List registered steps and methods
//! voxprep steps
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod steps;

// Re-export main types at crate root for convenience
pub use config::{MethodConfig, PipelineConfig, StepConfig};
pub use core::{
    resolve, BatchRunner, ExecutionPlan, MethodStrategy, Orchestrator, QcExpectations, QcMode,
    StepRegistry,
};
pub use domain::{BatchSummary, ImageArtifact, QcReport, QcVerdict, RunReport, RunStatus};
pub use steps::builtin_registry;
