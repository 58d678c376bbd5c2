//! Shared voxel-level primitives used by several strategies.
//!
//! All filters operate per frame: a 4D series is treated as independent 3D
//! volumes along the time axis. Borders are handled by clamping.

use crate::domain::ImageArtifact;

/// Normalized 1D gaussian kernel with radius `ceil(3*sigma)`.
pub(crate) fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (sigma * 3.0).ceil().max(1.0) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-0.5 * (d / sigma).powi(2)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable gaussian blur over the three spatial axes.
pub(crate) fn gaussian_blur(image: &ImageArtifact, sigma: f64) -> Vec<f32> {
    if sigma <= 0.0 {
        return image.data.clone();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let [nx, ny, nz] = image.spatial_dims();
    let volume = nx * ny * nz;

    let mut src = image.data.clone();
    let mut dst = vec![0.0f32; src.len()];

    for axis in 0..3 {
        let extent = [nx, ny, nz][axis] as isize;
        for frame in 0..image.frames() {
            let base = frame * volume;
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let mut acc = 0.0f64;
                        for (k, w) in kernel.iter().enumerate() {
                            let mut c = [x as isize, y as isize, z as isize];
                            c[axis] = (c[axis] + k as isize - radius).clamp(0, extent - 1);
                            let idx = base
                                + c[0] as usize
                                + nx * (c[1] as usize + ny * c[2] as usize);
                            acc += src[idx] as f64 * w;
                        }
                        dst[base + x + nx * (y + ny * z)] = acc as f32;
                    }
                }
            }
        }
        std::mem::swap(&mut src, &mut dst);
    }
    src
}

/// Cube-neighborhood median filter with the given radius.
pub(crate) fn median_filter(image: &ImageArtifact, radius: usize) -> Vec<f32> {
    if radius == 0 {
        return image.data.clone();
    }

    let [nx, ny, nz] = image.spatial_dims();
    let volume = nx * ny * nz;
    let r = radius as isize;

    let mut out = vec![0.0f32; image.data.len()];
    let mut window = Vec::with_capacity((2 * radius + 1).pow(3));

    for frame in 0..image.frames() {
        let base = frame * volume;
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    window.clear();
                    for dz in -r..=r {
                        for dy in -r..=r {
                            for dx in -r..=r {
                                let cx = (x as isize + dx).clamp(0, nx as isize - 1) as usize;
                                let cy = (y as isize + dy).clamp(0, ny as isize - 1) as usize;
                                let cz = (z as isize + dz).clamp(0, nz as isize - 1) as usize;
                                window.push(image.data[base + cx + nx * (cy + ny * cz)]);
                            }
                        }
                    }
                    window.sort_unstable_by(f32::total_cmp);
                    out[base + x + nx * (y + ny * z)] = window[window.len() / 2];
                }
            }
        }
    }
    out
}

/// Box mean over a cube neighborhood; cheap patch descriptor for NLM.
pub(crate) fn box_mean(image: &ImageArtifact, radius: usize) -> Vec<f32> {
    let [nx, ny, nz] = image.spatial_dims();
    let volume = nx * ny * nz;
    let r = radius as isize;
    let count = (2 * radius + 1).pow(3) as f64;

    let mut out = vec![0.0f32; image.data.len()];
    for frame in 0..image.frames() {
        let base = frame * volume;
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let mut acc = 0.0f64;
                    for dz in -r..=r {
                        for dy in -r..=r {
                            for dx in -r..=r {
                                let cx = (x as isize + dx).clamp(0, nx as isize - 1) as usize;
                                let cy = (y as isize + dy).clamp(0, ny as isize - 1) as usize;
                                let cz = (z as isize + dz).clamp(0, nz as isize - 1) as usize;
                                acc += image.data[base + cx + nx * (cy + ny * cz)] as f64;
                            }
                        }
                    }
                    out[base + x + nx * (y + ny * z)] = (acc / count) as f32;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> ImageArtifact {
        let data: Vec<f32> = (0..512).map(|i| (i % 8) as f32).collect();
        ImageArtifact::new("s", vec![8, 8, 8], [1.0, 1.0, 1.0], "RAS", data).unwrap()
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let kernel = gaussian_kernel(1.5);
        let sum: f64 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert_eq!(kernel.len() % 2, 1);
    }

    #[test]
    fn test_gaussian_blur_preserves_constant_volume() {
        let img =
            ImageArtifact::new("s", vec![4, 4, 4], [1.0, 1.0, 1.0], "RAS", vec![5.0; 64]).unwrap();
        let out = gaussian_blur(&img, 1.0);
        assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-4));
    }

    #[test]
    fn test_gaussian_blur_reduces_variance() {
        let img = ramp();
        let out = gaussian_blur(&img, 1.0);
        let smoothed = img.clone().with_data(out).unwrap();
        assert!(smoothed.std_dev() < img.std_dev());
    }

    #[test]
    fn test_median_removes_impulse() {
        let mut img =
            ImageArtifact::new("s", vec![5, 5, 5], [1.0, 1.0, 1.0], "RAS", vec![1.0; 125]).unwrap();
        let center = img.index(2, 2, 2);
        img.data[center] = 1000.0;

        let out = median_filter(&img, 1);
        assert!((out[center] - 1.0).abs() < 1e-6);
    }
}
