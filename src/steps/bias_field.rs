//! Bias field correction strategies.
//!
//! Scanner coil sensitivity shows up as a smooth multiplicative (or, for
//! mild cases, additive) intensity gradient across the volume. Both
//! methods here estimate that slow-varying field and remove it while
//! preserving the volume's mean intensity.

use crate::core::registry::{MethodStrategy, ParamKind, ParamSpec, Params, StepError};
use crate::domain::ImageArtifact;
use crate::steps::kernels;

/// Divide out a heavily blurred copy of the volume.
///
/// The blur radius is large relative to anatomy, so the blurred copy
/// approximates the multiplicative field.
pub struct LowpassBias;

const LOWPASS_SCHEMA: &[ParamSpec] = &[ParamSpec::optional("sigma", ParamKind::Float)];

impl MethodStrategy for LowpassBias {
    fn name(&self) -> &'static str {
        "lowpass"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        LOWPASS_SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let sigma = params.f64_or("sigma", 8.0);
        if sigma <= 0.0 {
            return Err(StepError::InvalidParam {
                name: "sigma".into(),
                detail: "must be positive".into(),
            });
        }

        let field = kernels::gaussian_blur(&image, sigma);
        let field_mean =
            field.iter().map(|v| *v as f64).sum::<f64>() / field.len().max(1) as f64;

        let data = image
            .data
            .iter()
            .zip(field.iter())
            .map(|(v, f)| {
                if f.abs() > f32::EPSILON {
                    (*v as f64 * field_mean / *f as f64) as f32
                } else {
                    // Field is zero where the image is empty; leave it.
                    *v
                }
            })
            .collect();
        Ok(image.with_data(data)?)
    }
}

/// Subtract a least-squares linear trend `a + bx + cy + dz`, fitted per
/// frame, and restore the frame mean.
pub struct LinearDetrend;

impl MethodStrategy for LinearDetrend {
    fn name(&self) -> &'static str {
        "linear_detrend"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn apply(&self, image: ImageArtifact, _params: &Params) -> Result<ImageArtifact, StepError> {
        let [nx, ny, nz] = image.spatial_dims();
        let volume = nx * ny * nz;
        let mut data = image.data.clone();

        for frame in 0..image.frames() {
            let samples = &mut data[frame * volume..(frame + 1) * volume];
            let coeffs = fit_linear_trend(samples, nx, ny, nz)
                .ok_or_else(|| StepError::Algorithm("degenerate trend fit".into()))?;

            let mean =
                samples.iter().map(|v| *v as f64).sum::<f64>() / samples.len().max(1) as f64;
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let trend = coeffs[0]
                            + coeffs[1] * x as f64
                            + coeffs[2] * y as f64
                            + coeffs[3] * z as f64;
                        let i = x + nx * (y + ny * z);
                        samples[i] = (samples[i] as f64 - trend + mean) as f32;
                    }
                }
            }
        }
        Ok(image.with_data(data)?)
    }
}

/// Least-squares fit of `v ≈ a + bx + cy + dz` via the 4x4 normal
/// equations. Returns `None` if the system is singular.
fn fit_linear_trend(samples: &[f32], nx: usize, ny: usize, nz: usize) -> Option<[f64; 4]> {
    let mut ata = [[0.0f64; 4]; 4];
    let mut atv = [0.0f64; 4];

    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let row = [1.0, x as f64, y as f64, z as f64];
                let v = samples[x + nx * (y + ny * z)] as f64;
                for i in 0..4 {
                    for j in 0..4 {
                        ata[i][j] += row[i] * row[j];
                    }
                    atv[i] += row[i] * v;
                }
            }
        }
    }

    solve4(ata, atv)
}

/// Gaussian elimination with partial pivoting for a 4x4 system.
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 4];
    for row in (0..4).rev() {
        let mut sum = b[row];
        for k in row + 1..4 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}
