//! Filtering strategies: smoothing filters plus Otsu binarization.

use crate::core::registry::{MethodStrategy, ParamKind, ParamSpec, Params, StepError};
use crate::domain::ImageArtifact;
use crate::steps::kernels;

/// Gaussian smoothing filter.
pub struct GaussianFilter;

const GAUSSIAN_SCHEMA: &[ParamSpec] = &[ParamSpec::optional("sigma", ParamKind::Float)];

impl MethodStrategy for GaussianFilter {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        GAUSSIAN_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let sigma = params.f64_or("sigma", 1.0);
        if sigma <= 0.0 {
            return Err(StepError::InvalidParam {
                name: "sigma".into(),
                detail: "must be positive".into(),
            });
        }
        let data = kernels::gaussian_blur(&image, sigma);
        Ok(image.with_data(data)?)
    }
}

/// Median filter over a cube neighborhood.
pub struct MedianFilter;

const MEDIAN_SCHEMA: &[ParamSpec] = &[ParamSpec::optional("radius", ParamKind::Int)];

impl MethodStrategy for MedianFilter {
    fn name(&self) -> &'static str {
        "median"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        MEDIAN_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let radius = params.usize_or("radius", 1);
        if radius == 0 {
            return Err(StepError::InvalidParam {
                name: "radius".into(),
                detail: "must be at least 1".into(),
            });
        }
        let data = kernels::median_filter(&image, radius);
        Ok(image.with_data(data)?)
    }
}

const OTSU_BINS: usize = 256;

/// Otsu thresholding: samples above the computed threshold become 1.0,
/// the rest 0.0.
pub struct OtsuFilter;

impl MethodStrategy for OtsuFilter {
    fn name(&self) -> &'static str {
        "otsu"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn apply(&self, image: ImageArtifact, _params: &Params) -> Result<ImageArtifact, StepError> {
        let threshold = otsu_threshold(&image.data)
            .ok_or_else(|| StepError::Algorithm("cannot threshold a constant volume".into()))?;
        let data = image
            .data
            .iter()
            .map(|v| if *v > threshold { 1.0 } else { 0.0 })
            .collect();
        Ok(image.with_data(data)?)
    }
}

/// Threshold maximizing inter-class variance over a 256-bin histogram.
fn otsu_threshold(data: &[f32]) -> Option<f32> {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for v in data {
        min = min.min(*v);
        max = max.max(*v);
    }
    if !(max > min) {
        return None;
    }

    let width = (max - min) / OTSU_BINS as f32;
    let mut histogram = [0usize; OTSU_BINS];
    for v in data {
        let bin = (((v - min) / width) as usize).min(OTSU_BINS - 1);
        histogram[bin] += 1;
    }

    let total = data.len() as f64;
    let total_mean: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, count)| i as f64 * *count as f64)
        .sum::<f64>()
        / total;

    let mut best_bin = 0;
    let mut best_variance = f64::MIN;
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;

    for (i, count) in histogram.iter().enumerate() {
        weight_bg += *count as f64 / total;
        sum_bg += i as f64 * *count as f64 / total;
        let weight_fg = 1.0 - weight_bg;
        if weight_bg == 0.0 || weight_fg == 0.0 {
            continue;
        }
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (total_mean - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_bin = i;
        }
    }

    Some(min + (best_bin as f32 + 0.5) * width)
}
