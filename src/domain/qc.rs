//! Quality-control report types.
//!
//! One `QcCheckResult` per declared expectation, combined into a `QcReport`
//! with an overall verdict. The gate logic that produces these lives in
//! `core::qc`.

use serde::{Deserialize, Serialize};

/// Outcome of a single quality check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcCheckResult {
    /// Name of the check, e.g. "voxel_spacing"
    pub check: String,

    /// What the configuration expected, rendered for the report
    pub expected: String,

    /// What the image actually showed
    pub observed: String,

    /// Whether the check passed
    pub passed: bool,

    /// Hard checks fail the gate; soft checks only downgrade to warn
    pub hard: bool,
}

/// Overall gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcVerdict {
    /// Every check passed
    Pass,

    /// Only soft checks (SNR, contrast) failed
    Warn,

    /// At least one hard structural check failed
    Fail,
}

/// Ordered collection of check results plus the combined verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcReport {
    pub checks: Vec<QcCheckResult>,
    pub verdict: QcVerdict,
}

impl QcReport {
    /// Combine check results into a report. Verdict: `fail` if any hard
    /// check failed, `warn` if only soft checks failed, `pass` otherwise.
    pub fn from_checks(checks: Vec<QcCheckResult>) -> Self {
        let any_hard_failed = checks.iter().any(|c| c.hard && !c.passed);
        let any_soft_failed = checks.iter().any(|c| !c.hard && !c.passed);

        let verdict = if any_hard_failed {
            QcVerdict::Fail
        } else if any_soft_failed {
            QcVerdict::Warn
        } else {
            QcVerdict::Pass
        };

        Self { checks, verdict }
    }

    pub fn passed(&self) -> bool {
        self.verdict == QcVerdict::Pass
    }
}
