//! Intensity binning strategies.
//!
//! Both methods replace each sample with its 1-based bin index, mirroring
//! histogram digitization: a value below the first edge maps to 0, a value
//! at or above the last edge maps to the number of edges.

use crate::core::registry::{MethodStrategy, ParamKind, ParamSpec, Params, StepError};
use crate::domain::ImageArtifact;

fn digitize(data: &[f32], edges: &[f32]) -> Vec<f32> {
    data.iter()
        .map(|v| edges.partition_point(|edge| v >= edge) as f32)
        .collect()
}

/// Upper bound on the number of bin edges a configuration may produce.
const MAX_EDGES: usize = 1 << 20;

/// Equal-width bins starting at the volume minimum.
pub struct FixedWidthBinning;

const FIXED_WIDTH_SCHEMA: &[ParamSpec] = &[ParamSpec::required("bin_width", ParamKind::Float)];

impl MethodStrategy for FixedWidthBinning {
    fn name(&self) -> &'static str {
        "fixed_width"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        FIXED_WIDTH_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let bin_width = params.f64_or("bin_width", 0.0);
        if bin_width <= 0.0 {
            return Err(StepError::InvalidParam {
                name: "bin_width".into(),
                detail: "must be positive".into(),
            });
        }

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for v in &image.data {
            min = min.min(*v);
            max = max.max(*v);
        }

        // Edges are derived by index in f64; accumulating f32 additions
        // would stall once `min + bin_width` rounds back to `min`.
        let ratio = ((max - min) as f64) / bin_width;
        if !ratio.is_finite() || ratio >= MAX_EDGES as f64 {
            return Err(StepError::InvalidParam {
                name: "bin_width".into(),
                detail: format!(
                    "produces more than {} edges over the intensity range",
                    MAX_EDGES
                ),
            });
        }
        let edges: Vec<f32> = (0..=ratio.max(0.0).floor() as usize)
            .map(|i| (min as f64 + i as f64 * bin_width) as f32)
            .collect();

        let data = digitize(&image.data, &edges);
        Ok(image.with_data(data)?)
    }
}

/// Quantile bins: edges chosen so each bin holds roughly the same number
/// of samples.
pub struct QuantileBinning;

const QUANTILE_SCHEMA: &[ParamSpec] = &[ParamSpec::required("num_bins", ParamKind::Int)];

impl MethodStrategy for QuantileBinning {
    fn name(&self) -> &'static str {
        "quantile"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        QUANTILE_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let num_bins = params.usize_or("num_bins", 0);
        if num_bins < 2 {
            return Err(StepError::InvalidParam {
                name: "num_bins".into(),
                detail: "must be at least 2".into(),
            });
        }

        let mut sorted = image.data.clone();
        sorted.sort_unstable_by(f32::total_cmp);

        // Interior quantile edges; first/last edge are the data extremes.
        let mut edges = Vec::with_capacity(num_bins + 1);
        edges.push(sorted[0]);
        for i in 1..num_bins {
            let rank = (i as f64 / num_bins as f64 * (sorted.len() - 1) as f64).round() as usize;
            edges.push(sorted[rank]);
        }
        edges.push(sorted[sorted.len() - 1]);
        edges.dedup();

        let data = digitize(&image.data, &edges);
        Ok(image.with_data(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> ImageArtifact {
        let data: Vec<f32> = (0..64).map(|i| i as f32).collect();
        ImageArtifact::new("s", vec![4, 4, 4], [1.0, 1.0, 1.0], "RAS", data).unwrap()
    }

    #[test]
    fn test_fixed_width_requires_positive_width() {
        let params = Params::new(
            serde_json::json!({ "bin_width": -1.0 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(matches!(
            FixedWidthBinning.apply(ramp(), &params),
            Err(StepError::InvalidParam { .. })
        ));
    }

    #[test]
    fn test_fixed_width_bins_are_uniform_steps() {
        let params = Params::new(
            serde_json::json!({ "bin_width": 16.0 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let out = FixedWidthBinning.apply(ramp(), &params).unwrap();
        // 0..16 -> bin 1, 16..32 -> bin 2, etc.
        assert_eq!(out.data[0], 1.0);
        assert_eq!(out.data[15], 1.0);
        assert_eq!(out.data[16], 2.0);
        assert_eq!(out.data[63], 4.0);
    }

    #[test]
    fn test_fixed_width_terminates_on_large_magnitude_values() {
        // At 1e8, adding 1.0 in f32 rounds back to 1e8; edges must not be
        // built by repeated f32 accumulation.
        let data = vec![1.0e8, 1.0e8 + 16.0, 1.0e8 + 32.0, 1.0e8 + 48.0];
        let img =
            ImageArtifact::new("s", vec![4, 1, 1], [1.0, 1.0, 1.0], "RAS", data).unwrap();
        let params = Params::new(
            serde_json::json!({ "bin_width": 16.0 })
                .as_object()
                .cloned()
                .unwrap(),
        );

        let out = FixedWidthBinning.apply(img, &params).unwrap();
        assert_eq!(out.data.len(), 4);
        assert!(out.data.iter().all(|v| *v >= 1.0));
    }

    #[test]
    fn test_fixed_width_rejects_excessive_edge_count() {
        let img = ImageArtifact::new(
            "s",
            vec![2, 1, 1],
            [1.0, 1.0, 1.0],
            "RAS",
            vec![0.0, 1.0e8],
        )
        .unwrap();
        let params = Params::new(
            serde_json::json!({ "bin_width": 0.001 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(matches!(
            FixedWidthBinning.apply(img, &params),
            Err(StepError::InvalidParam { .. })
        ));
    }

    #[test]
    fn test_quantile_bins_hold_equal_counts() {
        let params = Params::new(
            serde_json::json!({ "num_bins": 4 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let out = QuantileBinning.apply(ramp(), &params).unwrap();

        let mut counts = std::collections::HashMap::new();
        for v in &out.data {
            *counts.entry(*v as i64).or_insert(0usize) += 1;
        }
        // A uniform ramp splits into near-equal quantile bins (the maximum
        // lands in a terminal bin of its own).
        for bin in 1..=4 {
            let count = counts.get(&bin).copied().unwrap_or(0);
            assert!((14..=18).contains(&count), "bin {} has {} samples", bin, count);
        }
    }
}
