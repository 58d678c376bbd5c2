//! Spatial resampling onto a target voxel spacing.
//!
//! Output grid dimensions are chosen so the physical extent is preserved:
//! `new_n = round(n * old_spacing / new_spacing)`, clamped to at least 1.
//! A 4D series is resampled frame by frame; the time axis is untouched.

use crate::core::registry::{MethodStrategy, ParamKind, ParamSpec, Params, StepError};
use crate::domain::ImageArtifact;

const SCHEMA: &[ParamSpec] = &[ParamSpec::required("spacing", ParamKind::FloatList)];

fn target_spacing(params: &Params) -> Result<[f64; 3], StepError> {
    let values = params.f64_list("spacing").unwrap_or_default();
    if values.len() != 3 || values.iter().any(|s| *s <= 0.0) {
        return Err(StepError::InvalidParam {
            name: "spacing".into(),
            detail: "must be three positive numbers".into(),
        });
    }
    Ok([values[0], values[1], values[2]])
}

struct Grid {
    old: [usize; 3],
    new: [usize; 3],
    /// Source index per unit output index, per axis.
    scale: [f64; 3],
}

fn output_grid(image: &ImageArtifact, spacing: [f64; 3]) -> Grid {
    let old = image.spatial_dims();
    let mut new = [0usize; 3];
    let mut scale = [0.0f64; 3];
    for axis in 0..3 {
        let ratio = image.spacing[axis] / spacing[axis];
        new[axis] = ((old[axis] as f64 * ratio).round() as usize).max(1);
        scale[axis] = if new[axis] > 1 {
            (old[axis] as f64 - 1.0) / (new[axis] as f64 - 1.0)
        } else {
            0.0
        };
    }
    Grid { old, new, scale }
}

fn rebuild(
    image: ImageArtifact,
    grid: &Grid,
    spacing: [f64; 3],
    data: Vec<f32>,
) -> Result<ImageArtifact, StepError> {
    let mut dims = vec![grid.new[0], grid.new[1], grid.new[2]];
    if image.dims.len() == 4 {
        dims.push(image.dims[3]);
    }
    let mut out = image;
    out.dims = dims;
    out.spacing = spacing;
    out.data = data;
    out.validate()?;
    Ok(out)
}

/// Trilinear interpolation resampler.
pub struct TrilinearResample;

impl MethodStrategy for TrilinearResample {
    fn name(&self) -> &'static str {
        "trilinear"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let spacing = target_spacing(params)?;
        let grid = output_grid(&image, spacing);
        let [onx, ony, onz] = grid.old;
        let [nx, ny, nz] = grid.new;
        let old_volume = onx * ony * onz;
        let new_volume = nx * ny * nz;

        let mut data = vec![0.0f32; new_volume * image.frames()];
        for frame in 0..image.frames() {
            let src = &image.data[frame * old_volume..(frame + 1) * old_volume];
            let dst = &mut data[frame * new_volume..(frame + 1) * new_volume];
            for z in 0..nz {
                let fz = z as f64 * grid.scale[2];
                let z0 = fz.floor() as usize;
                let z1 = (z0 + 1).min(onz - 1);
                let wz = fz - z0 as f64;
                for y in 0..ny {
                    let fy = y as f64 * grid.scale[1];
                    let y0 = fy.floor() as usize;
                    let y1 = (y0 + 1).min(ony - 1);
                    let wy = fy - y0 as f64;
                    for x in 0..nx {
                        let fx = x as f64 * grid.scale[0];
                        let x0 = fx.floor() as usize;
                        let x1 = (x0 + 1).min(onx - 1);
                        let wx = fx - x0 as f64;

                        let at = |xi: usize, yi: usize, zi: usize| {
                            src[xi + onx * (yi + ony * zi)] as f64
                        };
                        let c00 = at(x0, y0, z0) * (1.0 - wx) + at(x1, y0, z0) * wx;
                        let c10 = at(x0, y1, z0) * (1.0 - wx) + at(x1, y1, z0) * wx;
                        let c01 = at(x0, y0, z1) * (1.0 - wx) + at(x1, y0, z1) * wx;
                        let c11 = at(x0, y1, z1) * (1.0 - wx) + at(x1, y1, z1) * wx;
                        let c0 = c00 * (1.0 - wy) + c10 * wy;
                        let c1 = c01 * (1.0 - wy) + c11 * wy;
                        dst[x + nx * (y + ny * z)] = (c0 * (1.0 - wz) + c1 * wz) as f32;
                    }
                }
            }
        }
        rebuild(image, &grid, spacing, data)
    }
}

/// Nearest-neighbour resampler; preserves the discrete value set, suitable
/// for label volumes.
pub struct NearestResample;

impl MethodStrategy for NearestResample {
    fn name(&self) -> &'static str {
        "nearest"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError> {
        let spacing = target_spacing(params)?;
        let grid = output_grid(&image, spacing);
        let [onx, ony, onz] = grid.old;
        let [nx, ny, nz] = grid.new;
        let old_volume = onx * ony * onz;
        let new_volume = nx * ny * nz;

        let mut data = vec![0.0f32; new_volume * image.frames()];
        for frame in 0..image.frames() {
            let src = &image.data[frame * old_volume..(frame + 1) * old_volume];
            let dst = &mut data[frame * new_volume..(frame + 1) * new_volume];
            for z in 0..nz {
                let sz = ((z as f64 * grid.scale[2]).round() as usize).min(onz - 1);
                for y in 0..ny {
                    let sy = ((y as f64 * grid.scale[1]).round() as usize).min(ony - 1);
                    for x in 0..nx {
                        let sx = ((x as f64 * grid.scale[0]).round() as usize).min(onx - 1);
                        dst[x + nx * (y + ny * z)] = src[sx + onx * (sy + ony * sz)];
                    }
                }
            }
        }
        rebuild(image, &grid, spacing, data)
    }
}
