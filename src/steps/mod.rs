//! Built-in steps and their method strategies.
//!
//! `builtin_registry` assembles the default step table. Strategy
//! registration order within a step is its documented priority order: when
//! a configuration enables several methods of an exclusive step, the first
//! registered one wins.

pub mod bias_field;
pub mod binning;
pub mod denoising;
pub mod filtering;
mod kernels;
pub mod normalization;
pub mod resampling;

use std::sync::Arc;

use crate::core::registry::{
    MethodPolicy, MethodStrategy, RegistryError, StepKind, StepRegistry, StepSpec,
};

/// The default step table, in pipeline-typical order.
pub fn builtin_registry() -> Result<StepRegistry, RegistryError> {
    let mut registry = StepRegistry::new();

    registry.register(StepSpec {
        name: "image_loading",
        kind: StepKind::Load,
        critical: true,
        policy: MethodPolicy::Exclusive,
        methods: Vec::new(),
    })?;

    registry.register(StepSpec {
        name: "quality_control",
        kind: StepKind::Gate,
        critical: false,
        policy: MethodPolicy::Exclusive,
        methods: Vec::new(),
    })?;

    registry.register(StepSpec {
        name: "bias_field_correction",
        kind: StepKind::Transform,
        critical: false,
        policy: MethodPolicy::Exclusive,
        methods: vec![
            Arc::new(bias_field::LowpassBias) as Arc<dyn MethodStrategy>,
            Arc::new(bias_field::LinearDetrend),
        ],
    })?;

    registry.register(StepSpec {
        name: "resampling",
        kind: StepKind::Transform,
        critical: false,
        policy: MethodPolicy::Exclusive,
        methods: vec![
            Arc::new(resampling::TrilinearResample) as Arc<dyn MethodStrategy>,
            Arc::new(resampling::NearestResample),
        ],
    })?;

    // Denoisers compose, so every enabled one runs.
    registry.register(StepSpec {
        name: "denoising",
        kind: StepKind::Transform,
        critical: false,
        policy: MethodPolicy::Chained,
        methods: vec![
            Arc::new(denoising::GaussianDenoise) as Arc<dyn MethodStrategy>,
            Arc::new(denoising::MedianDenoise),
            Arc::new(denoising::NlmDenoise),
        ],
    })?;

    registry.register(StepSpec {
        name: "normalization",
        kind: StepKind::Transform,
        critical: false,
        policy: MethodPolicy::Exclusive,
        methods: vec![
            Arc::new(normalization::IntensityNormalize) as Arc<dyn MethodStrategy>,
            Arc::new(normalization::ZscoreNormalize),
            Arc::new(normalization::HistogramNormalize),
        ],
    })?;

    registry.register(StepSpec {
        name: "filtering",
        kind: StepKind::Transform,
        critical: false,
        policy: MethodPolicy::Exclusive,
        methods: vec![
            Arc::new(filtering::GaussianFilter) as Arc<dyn MethodStrategy>,
            Arc::new(filtering::MedianFilter),
            Arc::new(filtering::OtsuFilter),
        ],
    })?;

    registry.register(StepSpec {
        name: "binning",
        kind: StepKind::Transform,
        critical: false,
        policy: MethodPolicy::Exclusive,
        methods: vec![
            Arc::new(binning::FixedWidthBinning) as Arc<dyn MethodStrategy>,
            Arc::new(binning::QuantileBinning),
        ],
    })?;

    registry.register(StepSpec {
        name: "image_saving",
        kind: StepKind::Save,
        critical: true,
        policy: MethodPolicy::Exclusive,
        methods: Vec::new(),
    })?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_builds() {
        let registry = builtin_registry().unwrap();
        for step in [
            "image_loading",
            "quality_control",
            "bias_field_correction",
            "resampling",
            "denoising",
            "normalization",
            "filtering",
            "binning",
            "image_saving",
        ] {
            assert!(registry.contains(step), "missing step {}", step);
        }
    }

    #[test]
    fn test_denoising_is_the_only_chained_step() {
        let registry = builtin_registry().unwrap();
        for step in registry.iter() {
            let expected = if step.name == "denoising" {
                MethodPolicy::Chained
            } else {
                MethodPolicy::Exclusive
            };
            assert_eq!(step.policy, expected, "step {}", step.name);
        }
    }

    #[test]
    fn test_documented_method_priorities() {
        let registry = builtin_registry().unwrap();
        let denoising = registry.get("denoising").unwrap();
        assert_eq!(denoising.priority_of("gaussian"), Some(0));
        assert_eq!(denoising.priority_of("median"), Some(1));
        assert_eq!(denoising.priority_of("nlm"), Some(2));

        let normalization = registry.get("normalization").unwrap();
        assert_eq!(normalization.priority_of("intensity"), Some(0));
    }
}
