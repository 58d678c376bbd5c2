//! Intensity normalization strategies.

use crate::core::registry::{MethodStrategy, ParamSpec, Params, StepError};
use crate::domain::ImageArtifact;

fn intensity_range(data: &[f32]) -> (f32, f32) {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for v in data {
        min = min.min(*v);
        max = max.max(*v);
    }
    (min, max)
}

/// Min-max rescaling to `[0, 1]`.
pub struct IntensityNormalize;

impl MethodStrategy for IntensityNormalize {
    fn name(&self) -> &'static str {
        "intensity"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn apply(&self, image: ImageArtifact, _params: &Params) -> Result<ImageArtifact, StepError> {
        let (min, max) = intensity_range(&image.data);
        if !(max > min) {
            return Err(StepError::Algorithm(
                "constant volume has no intensity range to normalize".into(),
            ));
        }
        let span = max - min;
        let data = image.data.iter().map(|v| (v - min) / span).collect();
        Ok(image.with_data(data)?)
    }
}

/// Z-score standardization: zero mean, unit variance.
pub struct ZscoreNormalize;

impl MethodStrategy for ZscoreNormalize {
    fn name(&self) -> &'static str {
        "zscore"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn apply(&self, image: ImageArtifact, _params: &Params) -> Result<ImageArtifact, StepError> {
        let mean = image.mean();
        let std_dev = image.std_dev();
        if std_dev == 0.0 {
            return Err(StepError::Algorithm(
                "constant volume has zero variance, cannot z-score".into(),
            ));
        }
        let data = image
            .data
            .iter()
            .map(|v| ((*v as f64 - mean) / std_dev) as f32)
            .collect();
        Ok(image.with_data(data)?)
    }
}

const HISTOGRAM_BINS: usize = 256;

/// Histogram equalization mapped onto `[0, 1]` via the cumulative
/// distribution over 256 bins.
pub struct HistogramNormalize;

impl MethodStrategy for HistogramNormalize {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn apply(&self, image: ImageArtifact, _params: &Params) -> Result<ImageArtifact, StepError> {
        let (min, max) = intensity_range(&image.data);
        if !(max > min) {
            return Err(StepError::Algorithm(
                "constant volume has no histogram to equalize".into(),
            ));
        }
        let width = (max - min) / HISTOGRAM_BINS as f32;

        let mut histogram = [0usize; HISTOGRAM_BINS];
        for v in &image.data {
            let bin = (((v - min) / width) as usize).min(HISTOGRAM_BINS - 1);
            histogram[bin] += 1;
        }

        let mut cdf = [0.0f64; HISTOGRAM_BINS];
        let mut running = 0usize;
        for (i, count) in histogram.iter().enumerate() {
            running += count;
            cdf[i] = running as f64 / image.data.len() as f64;
        }

        let data = image
            .data
            .iter()
            .map(|v| {
                let bin = (((v - min) / width) as usize).min(HISTOGRAM_BINS - 1);
                cdf[bin] as f32
            })
            .collect();
        Ok(image.with_data(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> ImageArtifact {
        let data: Vec<f32> = (0..64).map(|i| i as f32 * 4.0 + 100.0).collect();
        ImageArtifact::new("s", vec![4, 4, 4], [1.0, 1.0, 1.0], "RAS", data).unwrap()
    }

    #[test]
    fn test_intensity_maps_to_unit_interval() {
        let out = IntensityNormalize.apply(ramp(), &Params::default()).unwrap();
        let (min, max) = intensity_range(&out.data);
        assert_eq!(min, 0.0);
        assert_eq!(max, 1.0);
    }

    #[test]
    fn test_zscore_centers_and_scales() {
        let out = ZscoreNormalize.apply(ramp(), &Params::default()).unwrap();
        assert!(out.mean().abs() < 1e-5);
        assert!((out.std_dev() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_histogram_output_is_monotone_in_input() {
        let img = ramp();
        let out = HistogramNormalize.apply(img.clone(), &Params::default()).unwrap();
        for pair in out.data.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(out.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_constant_volume_rejected_everywhere() {
        let img =
            ImageArtifact::new("s", vec![2, 2, 2], [1.0, 1.0, 1.0], "RAS", vec![3.0; 8]).unwrap();
        for strategy in [
            &IntensityNormalize as &dyn MethodStrategy,
            &ZscoreNormalize,
            &HistogramNormalize,
        ] {
            assert!(
                matches!(
                    strategy.apply(img.clone(), &Params::default()),
                    Err(StepError::Algorithm(_))
                ),
                "{} accepted a constant volume",
                strategy.name()
            );
        }
    }
}
