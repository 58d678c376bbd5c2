//! Denoising strategies.
//!
//! Unlike the exclusive steps, enabled denoisers are chained: each one
//! consumes the previous method's output, in registry priority order.

use crate::core::registry::{MethodStrategy, ParamKind, ParamSpec, Params, StepError};
use crate::domain::ImageArtifact;
use crate::steps::kernels;

/// Gaussian smoothing denoiser.
pub struct GaussianDenoise;

const GAUSSIAN_SCHEMA: &[ParamSpec] = &[ParamSpec::optional("sigma_gaussian", ParamKind::Float)];

impl MethodStrategy for GaussianDenoise {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        GAUSSIAN_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let sigma = params.f64_or("sigma_gaussian", 1.0);
        if sigma <= 0.0 {
            return Err(StepError::InvalidParam {
                name: "sigma_gaussian".into(),
                detail: "must be positive".into(),
            });
        }
        let data = kernels::gaussian_blur(&image, sigma);
        Ok(image.with_data(data)?)
    }
}

/// Median denoiser over a cube neighborhood.
pub struct MedianDenoise;

const MEDIAN_SCHEMA: &[ParamSpec] = &[ParamSpec::optional("kernel_size", ParamKind::Int)];

impl MethodStrategy for MedianDenoise {
    fn name(&self) -> &'static str {
        "median"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        MEDIAN_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let kernel_size = params.usize_or("kernel_size", 3);
        if kernel_size < 3 || kernel_size % 2 == 0 {
            return Err(StepError::InvalidParam {
                name: "kernel_size".into(),
                detail: "must be an odd number >= 3".into(),
            });
        }
        let data = kernels::median_filter(&image, kernel_size / 2);
        Ok(image.with_data(data)?)
    }
}

/// Non-local means denoiser.
///
/// Patches are compared by their box means, which trades some edge fidelity
/// for a tractable search. The smoothing strength `h` is derived from the
/// volume's standard deviation scaled by `h_factor`.
pub struct NlmDenoise;

const NLM_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("search_radius", ParamKind::Int),
    ParamSpec::optional("patch_radius", ParamKind::Int),
    ParamSpec::optional("h_factor", ParamKind::Float),
];

impl MethodStrategy for NlmDenoise {
    fn name(&self) -> &'static str {
        "nlm"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        NLM_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let search = params.usize_or("search_radius", 3) as isize;
        let patch = params.usize_or("patch_radius", 1);
        let h_factor = params.f64_or("h_factor", 1.15);
        if search < 1 {
            return Err(StepError::InvalidParam {
                name: "search_radius".into(),
                detail: "must be at least 1".into(),
            });
        }
        if h_factor <= 0.0 {
            return Err(StepError::InvalidParam {
                name: "h_factor".into(),
                detail: "must be positive".into(),
            });
        }

        let h = h_factor * image.std_dev();
        if h == 0.0 {
            // Constant volume, nothing to denoise.
            return Ok(image);
        }
        let h2 = h * h;

        let descriptors = kernels::box_mean(&image, patch);
        let [nx, ny, nz] = image.spatial_dims();
        let volume = nx * ny * nz;
        let mut out = vec![0.0f32; image.data.len()];

        for frame in 0..image.frames() {
            let base = frame * volume;
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let here = base + x + nx * (y + ny * z);
                        let mut weight_sum = 0.0f64;
                        let mut value_sum = 0.0f64;
                        for dz in -search..=search {
                            for dy in -search..=search {
                                for dx in -search..=search {
                                    let cx =
                                        (x as isize + dx).clamp(0, nx as isize - 1) as usize;
                                    let cy =
                                        (y as isize + dy).clamp(0, ny as isize - 1) as usize;
                                    let cz =
                                        (z as isize + dz).clamp(0, nz as isize - 1) as usize;
                                    let there = base + cx + nx * (cy + ny * cz);
                                    let d =
                                        (descriptors[here] - descriptors[there]) as f64;
                                    let w = (-(d * d) / h2).exp();
                                    weight_sum += w;
                                    value_sum += w * image.data[there] as f64;
                                }
                            }
                        }
                        out[here] = (value_sum / weight_sum) as f32;
                    }
                }
            }
        }
        Ok(image.with_data(out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy() -> ImageArtifact {
        // Deterministic pseudo-noise over a flat background.
        let data: Vec<f32> = (0..216)
            .map(|i| 100.0 + ((i * 2654435761usize) % 17) as f32 - 8.0)
            .collect();
        ImageArtifact::new("s", vec![6, 6, 6], [1.0, 1.0, 1.0], "RAS", data).unwrap()
    }

    #[test]
    fn test_gaussian_rejects_non_positive_sigma() {
        let params = Params::new(
            serde_json::json!({ "sigma_gaussian": 0.0 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let err = GaussianDenoise.apply(noisy(), &params);
        assert!(matches!(err, Err(StepError::InvalidParam { .. })));
    }

    #[test]
    fn test_median_rejects_even_kernel() {
        let params = Params::new(
            serde_json::json!({ "kernel_size": 4 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let err = MedianDenoise.apply(noisy(), &params);
        assert!(matches!(err, Err(StepError::InvalidParam { .. })));
    }

    #[test]
    fn test_each_denoiser_reduces_noise() {
        let img = noisy();
        let before = img.std_dev();

        for strategy in [
            &GaussianDenoise as &dyn MethodStrategy,
            &MedianDenoise,
            &NlmDenoise,
        ] {
            let out = strategy.apply(img.clone(), &Params::default()).unwrap();
            assert!(
                out.std_dev() < before,
                "{} did not reduce noise",
                strategy.name()
            );
            assert_eq!(out.dims, img.dims);
        }
    }

    #[test]
    fn test_nlm_leaves_constant_volume_unchanged() {
        let img =
            ImageArtifact::new("s", vec![4, 4, 4], [1.0, 1.0, 1.0], "RAS", vec![7.0; 64]).unwrap();
        let out = NlmDenoise.apply(img.clone(), &Params::default()).unwrap();
        assert_eq!(out.data, img.data);
    }
}
