//! The quality-control gate.
//!
//! Evaluates the current artifact against declared expectations and produces
//! one `QcCheckResult` per criterion. Hard structural checks (dimensions,
//! spacing, orientation, voxel count, aspect ratio, finite samples) fail the
//! gate; soft signal checks (SNR, contrast) only downgrade the verdict to
//! `warn`. Spacing comparisons use a tolerance band, never exact equality,
//! since resampled volumes rarely match floating targets bit-for-bit.

use serde::{Deserialize, Serialize};

use crate::domain::{ImageArtifact, QcCheckResult, QcReport};

/// Enforcement policy; must be explicit in the configuration, never inferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcMode {
    /// A `fail` verdict aborts the run, like a critical step failure
    Strict,

    /// A `fail` verdict is recorded and the run continues
    Advisory,
}

/// Declared expectations for the gate. Every field except `mode` is
/// optional; absent expectations produce no check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcExpectations {
    pub mode: QcMode,

    /// Exact grid dimensions, e.g. [182, 218, 182]
    #[serde(default)]
    pub expected_dims: Option<Vec<usize>>,

    /// Target voxel spacing in millimetres
    #[serde(default)]
    pub expected_spacing: Option<[f64; 3]>,

    /// Absolute per-axis tolerance for the spacing check
    #[serde(default = "default_spacing_tolerance")]
    pub spacing_tolerance: f64,

    #[serde(default)]
    pub min_voxel_count: Option<u64>,

    #[serde(default)]
    pub max_aspect_ratio: Option<f64>,

    /// Expected anatomical orientation codes, e.g. "RAS"
    #[serde(default)]
    pub expected_orientation: Option<String>,

    #[serde(default)]
    pub min_snr: Option<f64>,

    #[serde(default)]
    pub min_contrast: Option<f64>,

    /// Reject volumes containing NaN or infinite samples
    #[serde(default = "default_true")]
    pub check_finite: bool,
}

fn default_spacing_tolerance() -> f64 {
    1e-3
}

fn default_true() -> bool {
    true
}

fn check(name: &str, expected: String, observed: String, passed: bool, hard: bool) -> QcCheckResult {
    QcCheckResult {
        check: name.to_string(),
        expected,
        observed,
        passed,
        hard,
    }
}

/// Evaluate every declared expectation independently and combine the results.
pub fn evaluate(image: &ImageArtifact, expectations: &QcExpectations) -> QcReport {
    let mut checks = Vec::new();

    if let Some(ref dims) = expectations.expected_dims {
        checks.push(check(
            "dimensions",
            format!("{:?}", dims),
            format!("{:?}", image.dims),
            &image.dims == dims,
            true,
        ));
    }

    if let Some(spacing) = expectations.expected_spacing {
        let tol = expectations.spacing_tolerance;
        let within = image
            .spacing
            .iter()
            .zip(spacing.iter())
            .all(|(observed, expected)| (observed - expected).abs() <= tol);
        checks.push(check(
            "voxel_spacing",
            format!("{:?} ± {}", spacing, tol),
            format!("{:?}", image.spacing),
            within,
            true,
        ));
    }

    if let Some(min) = expectations.min_voxel_count {
        let count = image.voxel_count() as u64;
        checks.push(check(
            "voxel_count",
            format!(">= {}", min),
            count.to_string(),
            count >= min,
            true,
        ));
    }

    if let Some(max) = expectations.max_aspect_ratio {
        let ratio = image.aspect_ratio();
        checks.push(check(
            "aspect_ratio",
            format!("<= {}", max),
            format!("{:.3}", ratio),
            ratio <= max,
            true,
        ));
    }

    if let Some(ref orientation) = expectations.expected_orientation {
        checks.push(check(
            "orientation",
            orientation.clone(),
            image.orientation.clone(),
            image.orientation.eq_ignore_ascii_case(orientation),
            true,
        ));
    }

    if expectations.check_finite {
        let finite = image.all_finite();
        checks.push(check(
            "finite_samples",
            "all samples finite".to_string(),
            if finite {
                "all finite".to_string()
            } else {
                "NaN or infinite samples present".to_string()
            },
            finite,
            true,
        ));
    }

    if let Some(min) = expectations.min_snr {
        let snr = image.snr();
        checks.push(check(
            "snr",
            format!(">= {}", min),
            format!("{:.3}", snr),
            snr >= min,
            false,
        ));
    }

    if let Some(min) = expectations.min_contrast {
        let contrast = image.contrast();
        checks.push(check(
            "contrast",
            format!(">= {}", min),
            format!("{:.3}", contrast),
            contrast >= min,
            false,
        ));
    }

    QcReport::from_checks(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QcVerdict;

    fn expectations(mode: QcMode) -> QcExpectations {
        QcExpectations {
            mode,
            expected_dims: None,
            expected_spacing: None,
            spacing_tolerance: default_spacing_tolerance(),
            min_voxel_count: None,
            max_aspect_ratio: None,
            expected_orientation: None,
            min_snr: None,
            min_contrast: None,
            check_finite: true,
        }
    }

    fn image(spacing: [f64; 3]) -> ImageArtifact {
        let data: Vec<f32> = (0..64).map(|i| (i % 7) as f32).collect();
        ImageArtifact::new("sub", vec![4, 4, 4], spacing, "RAS", data).unwrap()
    }

    #[test]
    fn test_matching_spacing_passes() {
        let mut exp = expectations(QcMode::Strict);
        exp.expected_spacing = Some([1.0, 1.0, 1.0]);

        let report = evaluate(&image([1.0, 1.0, 1.0]), &exp);
        assert_eq!(report.verdict, QcVerdict::Pass);
    }

    #[test]
    fn test_spacing_outside_zero_tolerance_fails_hard() {
        let mut exp = expectations(QcMode::Strict);
        exp.expected_spacing = Some([1.0, 1.0, 1.0]);
        exp.spacing_tolerance = 0.0;

        let report = evaluate(&image([1.2, 1.0, 1.0]), &exp);
        assert_eq!(report.verdict, QcVerdict::Fail);
        let spacing_check = report
            .checks
            .iter()
            .find(|c| c.check == "voxel_spacing")
            .unwrap();
        assert!(spacing_check.hard);
        assert!(!spacing_check.passed);
    }

    #[test]
    fn test_spacing_within_tolerance_passes() {
        let mut exp = expectations(QcMode::Advisory);
        exp.expected_spacing = Some([1.0, 1.0, 1.0]);
        exp.spacing_tolerance = 0.25;

        let report = evaluate(&image([1.2, 1.0, 1.0]), &exp);
        assert_eq!(report.verdict, QcVerdict::Pass);
    }

    #[test]
    fn test_low_snr_only_warns() {
        let mut exp = expectations(QcMode::Strict);
        exp.min_snr = Some(1e6);

        let report = evaluate(&image([1.0, 1.0, 1.0]), &exp);
        assert_eq!(report.verdict, QcVerdict::Warn);
    }

    #[test]
    fn test_nan_fails_finite_check() {
        let mut img = image([1.0, 1.0, 1.0]);
        img.data[10] = f32::NAN;

        let report = evaluate(&img, &expectations(QcMode::Strict));
        assert_eq!(report.verdict, QcVerdict::Fail);
    }

    #[test]
    fn test_dims_mismatch_fails() {
        let mut exp = expectations(QcMode::Strict);
        exp.expected_dims = Some(vec![8, 8, 8]);

        let report = evaluate(&image([1.0, 1.0, 1.0]), &exp);
        assert_eq!(report.verdict, QcVerdict::Fail);
    }

    #[test]
    fn test_mode_must_be_explicit() {
        // Deserializing expectations without a mode is rejected.
        let result: Result<QcExpectations, _> =
            serde_json::from_value(serde_json::json!({ "min_snr": 2.0 }));
        assert!(result.is_err());
    }
}
