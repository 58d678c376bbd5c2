//! The working image volume passed between pipeline steps.
//!
//! Exactly one `ImageArtifact` is current at any point in a run; each step
//! consumes the current artifact and returns a new (or mutated) one. The
//! struct doubles as the on-disk snapshot schema (`.vol.json`) — real
//! scanner formats (DICOM/NIfTI) are read by external strategies, not here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A volumetric image plus the metadata the engine cares about.
///
/// `dims` is `[x, y, z]` for a 3D volume or `[x, y, z, t]` for a 4D series.
/// Samples are stored in x-fastest order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Identifier of the subject/scan this volume belongs to
    pub subject_id: String,

    /// Path the volume was originally loaded from (if any)
    pub source: Option<PathBuf>,

    /// Grid dimensions, length 3 or 4
    pub dims: Vec<usize>,

    /// Voxel spacing in millimetres along x, y, z
    pub spacing: [f64; 3],

    /// Anatomical orientation codes, e.g. "RAS"
    pub orientation: String,

    /// Sample buffer, length = product of `dims`
    pub data: Vec<f32>,
}

/// Structural problems with an image artifact
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("expected 3 or 4 dimensions, got {0}")]
    BadRank(usize),

    #[error("zero-sized dimension in {0:?}")]
    EmptyDim(Vec<usize>),

    #[error("sample buffer has {actual} samples, dims imply {expected}")]
    SampleCountMismatch { actual: usize, expected: usize },

    #[error("non-positive voxel spacing: {0:?}")]
    BadSpacing([f64; 3]),
}

impl ImageArtifact {
    /// Create a validated artifact.
    pub fn new(
        subject_id: impl Into<String>,
        dims: Vec<usize>,
        spacing: [f64; 3],
        orientation: impl Into<String>,
        data: Vec<f32>,
    ) -> Result<Self, ImageError> {
        let artifact = Self {
            subject_id: subject_id.into(),
            source: None,
            dims,
            spacing,
            orientation: orientation.into(),
            data,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Check the structural invariants. Used on construction and on every
    /// strategy output before it replaces the current artifact.
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.dims.len() != 3 && self.dims.len() != 4 {
            return Err(ImageError::BadRank(self.dims.len()));
        }
        // A zero-sized axis would make every strategy's indexing unsound.
        if self.dims.iter().any(|d| *d == 0) {
            return Err(ImageError::EmptyDim(self.dims.clone()));
        }
        let expected: usize = self.dims.iter().product();
        if self.data.len() != expected {
            return Err(ImageError::SampleCountMismatch {
                actual: self.data.len(),
                expected,
            });
        }
        if self.spacing.iter().any(|s| *s <= 0.0) {
            return Err(ImageError::BadSpacing(self.spacing));
        }
        Ok(())
    }

    /// Spatial dimensions `[x, y, z]` (ignores a trailing time axis).
    pub fn spatial_dims(&self) -> [usize; 3] {
        [self.dims[0], self.dims[1], self.dims[2]]
    }

    /// Number of volumes along the time axis (1 for a plain 3D image).
    pub fn frames(&self) -> usize {
        if self.dims.len() == 4 {
            self.dims[3]
        } else {
            1
        }
    }

    /// Total number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Ratio of the largest to the smallest physical extent.
    pub fn aspect_ratio(&self) -> f64 {
        let extents: Vec<f64> = self
            .spatial_dims()
            .iter()
            .zip(self.spacing.iter())
            .map(|(d, s)| *d as f64 * s)
            .collect();
        let max = extents.iter().cloned().fold(f64::MIN, f64::max);
        let min = extents.iter().cloned().fold(f64::MAX, f64::min);
        if min > 0.0 {
            max / min
        } else {
            f64::INFINITY
        }
    }

    /// Whether every sample is a finite number.
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Mean sample value.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|v| *v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.data.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .data
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64;
        var.sqrt()
    }

    /// Crude signal-to-noise estimate: mean over standard deviation.
    pub fn snr(&self) -> f64 {
        let sd = self.std_dev();
        if sd > 0.0 {
            self.mean() / sd
        } else {
            f64::INFINITY
        }
    }

    /// Michelson contrast over the intensity range.
    pub fn contrast(&self) -> f64 {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for v in &self.data {
            min = min.min(*v);
            max = max.max(*v);
        }
        let (min, max) = (min as f64, max as f64);
        if max + min != 0.0 && max > min {
            (max - min) / (max + min).abs()
        } else {
            0.0
        }
    }

    /// Linear index of voxel `(x, y, z)` in the first frame.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    /// Replace the sample buffer, keeping the metadata.
    pub fn with_data(mut self, data: Vec<f32>) -> Result<Self, ImageError> {
        self.data = data;
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(side: usize, value: f32) -> ImageArtifact {
        ImageArtifact::new(
            "sub-01",
            vec![side, side, side],
            [1.0, 1.0, 1.0],
            "RAS",
            vec![value; side * side * side],
        )
        .unwrap()
    }

    #[test]
    fn test_sample_count_invariant() {
        let err = ImageArtifact::new("s", vec![2, 2, 2], [1.0, 1.0, 1.0], "RAS", vec![0.0; 7]);
        assert!(matches!(
            err,
            Err(ImageError::SampleCountMismatch { actual: 7, expected: 8 })
        ));
    }

    #[test]
    fn test_zero_sized_dimension_rejected() {
        let err = ImageArtifact::new("s", vec![0, 4, 4], [1.0, 1.0, 1.0], "RAS", vec![]);
        assert!(matches!(err, Err(ImageError::EmptyDim(_))));
    }

    #[test]
    fn test_rank_invariant() {
        let err = ImageArtifact::new("s", vec![4, 4], [1.0, 1.0, 1.0], "RAS", vec![0.0; 16]);
        assert!(matches!(err, Err(ImageError::BadRank(2))));
    }

    #[test]
    fn test_aspect_ratio_uses_physical_extent() {
        let img = ImageArtifact::new(
            "s",
            vec![10, 10, 5],
            [1.0, 1.0, 2.0],
            "RAS",
            vec![0.0; 500],
        )
        .unwrap();
        // 10mm x 10mm x 10mm once spacing is applied
        assert!((img.aspect_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_snr_of_constant_volume_is_infinite() {
        let img = cube(4, 100.0);
        assert!(img.snr().is_infinite());
    }

    #[test]
    fn test_finite_check_catches_nan() {
        let mut img = cube(2, 1.0);
        img.data[3] = f32::NAN;
        assert!(!img.all_finite());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let img = cube(3, 2.5);
        let json = serde_json::to_string(&img).unwrap();
        let back: ImageArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dims, vec![3, 3, 3]);
        assert_eq!(back.data, img.data);
    }
}
