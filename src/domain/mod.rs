//! Domain types for the voxprep engine.
//!
//! This module contains the core data structures:
//! - ImageArtifact: the working volume that flows between steps
//! - Qc types: per-check results and the gate report
//! - Report: per-step results and the run/batch report schema

pub mod image;
pub mod qc;
pub mod report;

// Re-export commonly used types
pub use image::{ImageArtifact, ImageError};
pub use qc::{QcCheckResult, QcReport, QcVerdict};
pub use report::{BatchSummary, RunReport, RunStatus, StepResult, StepStatus};
