//! Core engine logic.
//!
//! This module contains:
//! - Registry: the read-only step/method table and strategy contract
//! - Resolver: configuration → immutable execution plan
//! - Orchestrator: plan execution over one input volume
//! - Qc: the quality-control gate
//! - Store: snapshot and report persistence
//! - Batch: bounded fan-out over a collection of inputs

pub mod batch;
pub mod orchestrator;
pub mod qc;
pub mod registry;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use batch::{BatchError, BatchRunner};
pub use orchestrator::Orchestrator;
pub use qc::{QcExpectations, QcMode};
pub use registry::{
    MethodPolicy, MethodStrategy, ParamKind, ParamSpec, Params, RegistryError, StepError, StepKind,
    StepRegistry, StepSpec,
};
pub use resolver::{resolve, ExecutionPlan, ResolveError, ResolvedStep, StepAction};
pub use store::{ArtifactStore, Snapshot, StoreError};
