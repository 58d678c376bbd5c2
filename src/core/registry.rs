//! The step registry and the method strategy contract.
//!
//! The registry is a read-only table built once at startup: step name →
//! { kind, criticality, selection policy, priority-ordered strategies }.
//! Registration order within a step *is* the documented priority order used
//! to break ties between simultaneously enabled methods; configuration key
//! iteration order is never a priority signal.
//!
//! Adding a new algorithm means registering one more strategy under its
//! step; the resolver and orchestrator are unaffected.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ParamMap;
use crate::domain::{ImageArtifact, ImageError};

/// What the orchestrator does when a step of this kind comes up in the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Materializes the initial artifact from the run's input path
    Load,

    /// Persists the current artifact as the run's output
    Save,

    /// Quality-control checkpoint over the current artifact
    Gate,

    /// Regular image transform with one or more method variants
    Transform,
}

/// How multiple simultaneously enabled methods are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodPolicy {
    /// Exactly one method runs: the first enabled in priority order wins,
    /// the rest are recorded as shadowed
    Exclusive,

    /// Every enabled method runs, chained in priority order
    Chained,
}

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    Str,
    FloatList,
    StrList,
}

/// One entry in a method's declared parameter schema
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self.kind {
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Int => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::Str => value.is_string(),
            ParamKind::FloatList => match value {
                Value::Array(items) => items.iter().all(|v| v.is_number()),
                _ => false,
            },
            ParamKind::StrList => match value {
                Value::Array(items) => items.iter().all(|v| v.is_string()),
                _ => false,
            },
        }
    }
}

/// Validate a merged parameter map against a declared schema.
///
/// Unknown keys and type mismatches are rejected so that a typo in a
/// configuration fails resolution instead of silently falling back to a
/// default inside the strategy.
pub fn validate_params(params: &ParamMap, schema: &[ParamSpec]) -> Result<(), String> {
    for (key, value) in params {
        match schema.iter().find(|s| s.name == key) {
            None => return Err(format!("unknown parameter '{}'", key)),
            Some(spec) => {
                if !spec.accepts(value) {
                    return Err(format!(
                        "parameter '{}' has the wrong type (expected {:?})",
                        key, spec.kind
                    ));
                }
            }
        }
    }
    for spec in schema.iter().filter(|s| s.required) {
        if !params.contains_key(spec.name) {
            return Err(format!("missing required parameter '{}'", spec.name));
        }
    }
    Ok(())
}

/// Typed read access over a validated parameter map.
///
/// Getters with defaults are safe to use inside strategies because the
/// resolver has already schema-checked every key.
#[derive(Debug, Clone, Default)]
pub struct Params(ParamMap);

impl Params {
    pub fn new(map: ParamMap) -> Self {
        Self(map)
    }

    pub fn raw(&self) -> &ParamMap {
        &self.0
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.0
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.0.get(key).and_then(|v| v.as_str()).unwrap_or(default)
    }

    pub fn f64_list(&self, key: &str) -> Option<Vec<f64>> {
        self.0
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_f64()).collect())
    }

    pub fn str_list(&self, key: &str) -> Option<Vec<String>> {
        self.0.get(key).and_then(|v| v.as_array()).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }
}

/// Failures at the step boundary during execution
#[derive(Debug, Error)]
pub enum StepError {
    #[error("invalid parameter '{name}': {detail}")]
    InvalidParam { name: String, detail: String },

    #[error("{0}")]
    Algorithm(String),

    #[error("strategy returned an invalid artifact: {0}")]
    InvalidOutput(#[from] ImageError),

    #[error("no current image artifact; an earlier loading step must run first")]
    NoArtifact,

    #[error("step exceeded its wall-clock budget: {elapsed_ms}ms > {budget_ms}ms")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One concrete algorithm implementing a step's transformation.
///
/// Strategies are opaque to the engine beyond this contract: deterministic
/// given identical inputs, no shared mutable state.
pub trait MethodStrategy: Send + Sync {
    /// Method name as it appears in configuration
    fn name(&self) -> &'static str;

    /// Declared parameter schema; checked during plan resolution
    fn param_schema(&self) -> &'static [ParamSpec];

    /// Consume the current artifact and produce the next one
    fn apply(&self, image: ImageArtifact, params: &Params) -> Result<ImageArtifact, StepError>;
}

/// Registry entry for one step
pub struct StepSpec {
    pub name: &'static str,
    pub kind: StepKind,

    /// Critical steps abort the remaining plan on failure
    pub critical: bool,

    pub policy: MethodPolicy,

    /// Strategies in priority order (first = highest priority)
    pub methods: Vec<Arc<dyn MethodStrategy>>,
}

impl StepSpec {
    pub fn method(&self, name: &str) -> Option<&Arc<dyn MethodStrategy>> {
        self.methods.iter().find(|m| m.name() == name)
    }

    /// Priority slot of a method; lower is higher priority.
    pub fn priority_of(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name() == name)
    }
}

/// Registration-time failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("method '{method}' is already registered under step '{step}'")]
    DuplicateMethod { step: String, method: String },
}

/// Process-wide, read-only step table. Built once at startup; safe for
/// concurrent reads afterwards.
pub struct StepRegistry {
    steps: Vec<StepSpec>,
    index: HashMap<&'static str, usize>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a step. Duplicate step names, or duplicate method names
    /// within a step, are startup-time errors.
    pub fn register(&mut self, spec: StepSpec) -> Result<(), RegistryError> {
        if self.index.contains_key(spec.name) {
            return Err(RegistryError::DuplicateStep(spec.name.to_string()));
        }
        for (i, method) in spec.methods.iter().enumerate() {
            if spec.methods[..i].iter().any(|m| m.name() == method.name()) {
                return Err(RegistryError::DuplicateMethod {
                    step: spec.name.to_string(),
                    method: method.name().to_string(),
                });
            }
        }
        self.index.insert(spec.name, self.steps.len());
        self.steps.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StepSpec> {
        self.index.get(name).map(|i| &self.steps[*i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered steps, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StepSpec> {
        self.steps.iter()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl MethodStrategy for Noop {
        fn name(&self) -> &'static str {
            self.0
        }
        fn param_schema(&self) -> &'static [ParamSpec] {
            &[]
        }
        fn apply(&self, image: ImageArtifact, _: &Params) -> Result<ImageArtifact, StepError> {
            Ok(image)
        }
    }

    fn spec(name: &'static str, methods: Vec<&'static str>) -> StepSpec {
        StepSpec {
            name,
            kind: StepKind::Transform,
            critical: false,
            policy: MethodPolicy::Exclusive,
            methods: methods
                .into_iter()
                .map(|m| Arc::new(Noop(m)) as Arc<dyn MethodStrategy>)
                .collect(),
        }
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut registry = StepRegistry::new();
        registry.register(spec("denoising", vec!["gaussian"])).unwrap();
        let err = registry.register(spec("denoising", vec!["median"]));
        assert!(matches!(err, Err(RegistryError::DuplicateStep(_))));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let mut registry = StepRegistry::new();
        let err = registry.register(spec("denoising", vec!["gaussian", "gaussian"]));
        assert!(matches!(err, Err(RegistryError::DuplicateMethod { .. })));
    }

    #[test]
    fn test_priority_is_registration_order() {
        let mut registry = StepRegistry::new();
        registry
            .register(spec("denoising", vec!["gaussian", "median", "nlm"]))
            .unwrap();

        let step = registry.get("denoising").unwrap();
        assert_eq!(step.priority_of("gaussian"), Some(0));
        assert_eq!(step.priority_of("nlm"), Some(2));
    }

    #[test]
    fn test_param_validation() {
        const SCHEMA: &[ParamSpec] = &[
            ParamSpec::optional("sigma", ParamKind::Float),
            ParamSpec::required("spacing", ParamKind::FloatList),
        ];

        let mut params = ParamMap::new();
        params.insert("spacing".into(), serde_json::json!([1.0, 1.0, 1.0]));
        params.insert("sigma".into(), serde_json::json!(2.0));
        assert!(validate_params(&params, SCHEMA).is_ok());

        let mut unknown = params.clone();
        unknown.insert("sgima".into(), serde_json::json!(2.0));
        assert!(validate_params(&unknown, SCHEMA).unwrap_err().contains("sgima"));

        let mut wrong_type = params.clone();
        wrong_type.insert("sigma".into(), serde_json::json!("big"));
        assert!(validate_params(&wrong_type, SCHEMA).is_err());

        let missing = ParamMap::new();
        assert!(validate_params(&missing, SCHEMA)
            .unwrap_err()
            .contains("spacing"));
    }
}
