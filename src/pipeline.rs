//! Conversion facade
//!
//! Drives a model through validation, symbolic compilation and code
//! emission:
//!
//! ```ignore
//! use sbmlgen::{convert_json, ConversionOptions};
//!
//! let source = convert_json(model_json, "rust", &ConversionOptions::default())?;
//! std::fs::write("model.rs", source)?;
//! ```
//!
//! [`Converter`] keeps the intermediate artifacts for callers that want the
//! compiled model, optimizer statistics or a reference simulation next to
//! the source.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use cached::proc_macro::cached;
use cached::SizedCache;
use serde::Serialize;
use tracing::{debug, info};

use crate::codegen::{backend_for, Backend, GeneratedCode, PackageBuilder};
use crate::config::ConversionOptions;
use crate::error::{CompileError, ValidationError};
use crate::model::{Model, Rule, ValidatedModel, Validator};
use crate::runtime::Simulator;
use crate::symbolic::{CompiledModel, OptimizationStats};

/// Size and shape of a compiled model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub num_species: usize,
    /// Species with a state slot
    pub num_states: usize,
    pub num_parameters: usize,
    pub num_compartments: usize,
    pub num_reactions: usize,
    pub num_functions: usize,
    pub num_assignment_rules: usize,
    pub num_rate_rules: usize,
    pub num_static_rules: usize,
    pub num_dynamic_rules: usize,
    pub num_initial_assignments: usize,
    pub num_events: usize,
    /// Values a simulation input must supply
    pub num_inputs: usize,
    pub jacobian_nonzeros: usize,
    pub jacobian_total: usize,
    pub jacobian_density: f64,
    pub dose_species: Option<String>,
    /// Present once code has been emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationStats>,
}

impl ModelInfo {
    pub fn new(model: &Model, compiled: &CompiledModel) -> Self {
        let rate_rules = model
            .rules
            .iter()
            .filter(|r| matches!(r, Rule::Rate { .. }))
            .count();
        let n = compiled.ode.len();
        Self {
            id: compiled.id.clone(),
            name: compiled.name.clone(),
            num_species: model.species.len(),
            num_states: n,
            num_parameters: model.parameters.len(),
            num_compartments: model.compartments.len(),
            num_reactions: model.reactions.len(),
            num_functions: model.functions.len(),
            num_assignment_rules: model.rules.len() - rate_rules,
            num_rate_rules: rate_rules,
            num_static_rules: compiled.rules.static_rules.len(),
            num_dynamic_rules: compiled.rules.dynamic_rules.len(),
            num_initial_assignments: model.initial_assignments.len(),
            num_events: compiled.events.len(),
            num_inputs: compiled.inputs.len(),
            jacobian_nonzeros: compiled.jacobian.nnz(),
            jacobian_total: n * n,
            jacobian_density: compiled.jacobian.density(),
            dose_species: compiled.dose_species().map(String::from),
            optimization: None,
        }
    }
}

/// Everything produced by one conversion
#[derive(Debug, Clone)]
pub struct Conversion {
    pub info: ModelInfo,
    pub model: CompiledModel,
    pub code: GeneratedCode,
}

impl Conversion {
    pub fn source(&self) -> &str {
        &self.code.source
    }

    /// Reference simulator for the converted model
    pub fn simulator(&self) -> Simulator<'_> {
        Simulator::new(&self.model)
    }

    /// Write the source into `out_dir` and hand it to `builder`
    pub fn package(
        &self,
        builder: &dyn PackageBuilder,
        out_dir: &Path,
    ) -> Result<PathBuf, CompileError> {
        let source = self.code.write_to(out_dir)?;
        let package = builder.build(&source, out_dir)?;
        info!(model = %self.model.id, package = %package.display(), "built package");
        Ok(package)
    }
}

/// Converts models with fixed options and backend
pub struct Converter {
    options: ConversionOptions,
    backend: Box<dyn Backend>,
    validator: Validator,
}

impl Converter {
    /// Converter for the Rust backend
    pub fn new(options: ConversionOptions) -> Self {
        Self {
            options,
            backend: Box::new(crate::codegen::RustBackend),
            validator: Validator::new(),
        }
    }

    /// Converter for the backend registered under `target`
    pub fn for_target(target: &str, options: ConversionOptions) -> Result<Self, CompileError> {
        let backend = backend_for(target).ok_or_else(|| {
            CompileError::unsupported("target", format!("no backend named '{target}'"))
        })?;
        Ok(Self {
            options,
            backend,
            validator: Validator::new(),
        })
    }

    /// Validate with [`Validator::strict`] before compiling
    pub fn strict(mut self) -> Self {
        self.validator = Validator::strict();
        self
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Validate and lower `model` without emitting code
    pub fn compile(&self, model: &Model) -> Result<CompiledModel, CompileError> {
        let validated = self.validator.validate(model)?;
        if !validated.warnings().is_empty() {
            debug!(model = %model.id, warnings = validated.warnings().len(), "validated with warnings");
        }
        CompiledModel::compile(validated.inner(), &self.options)
    }

    pub fn convert(&self, model: &Model) -> Result<Conversion, CompileError> {
        let compiled = self.compile(model)?;
        let code = self.backend.emit(&compiled, &self.options)?;
        let mut info = ModelInfo::new(model, &compiled);
        info.optimization = Some(code.stats);
        info!(
            model = %model.id,
            backend = self.backend.name(),
            states = info.num_states,
            nonzero = info.jacobian_nonzeros,
            total = info.jacobian_total,
            "converted model"
        );
        Ok(Conversion {
            info,
            model: compiled,
            code,
        })
    }
}

/// Parse a model from JSON
pub fn parse_model(json: &str) -> Result<Model, CompileError> {
    Model::from_str(json)
}

/// Structural validation, separate from conversion
pub fn validate(model: &Model) -> Result<ValidatedModel, ValidationError> {
    Validator::new().validate(model)
}

/// Parse and validate a JSON model
pub fn validate_json(json: &str) -> Result<ValidatedModel, CompileError> {
    let model = Model::from_str(json)?;
    Ok(validate(&model)?)
}

/// Statistics of `model` as it would be compiled with `options`
pub fn model_info(model: &Model, options: &ConversionOptions) -> Result<ModelInfo, CompileError> {
    let compiled = Converter::new(options.clone()).compile(model)?;
    Ok(ModelInfo::new(model, &compiled))
}

/// Source text of `model` for the backend named `target`
pub fn convert(
    model: &Model,
    target: &str,
    options: &ConversionOptions,
) -> Result<String, CompileError> {
    let conversion = Converter::for_target(target, options.clone())?.convert(model)?;
    Ok(conversion.code.source)
}

/// Parse, validate and convert a JSON model
pub fn convert_json(
    json: &str,
    target: &str,
    options: &ConversionOptions,
) -> Result<String, CompileError> {
    convert(&Model::from_str(json)?, target, options)
}

fn options_hash(options: &ConversionOptions) -> u64 {
    let mut hasher = DefaultHasher::new();
    options.hash(&mut hasher);
    hasher.finish()
}

/// Conversions kept by [`convert_cached`]
pub const CONVERSION_CACHE_SIZE: usize = 64;

/// [`Converter::convert`] with the Rust backend, memoized by model
/// fingerprint and options
///
/// Only the [`CONVERSION_CACHE_SIZE`] most recently used conversions are
/// kept; older ones are converted again on their next request.
#[cached(
    ty = "SizedCache<(u64, u64), GeneratedCode>",
    create = "{ SizedCache::with_size(CONVERSION_CACHE_SIZE) }",
    convert = r#"{ (model.fingerprint(), options_hash(options)) }"#,
    result = "true"
)]
pub fn convert_cached(
    model: &Model,
    options: &ConversionOptions,
) -> Result<GeneratedCode, CompileError> {
    Ok(Converter::new(options.clone()).convert(model)?.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationLevel;

    const PK: &str = r#"{
        "id": "pk_oral",
        "name": "One compartment, oral",
        "species": {
            "Gut": { "initialAmount": 0 },
            "Central": { "initialAmount": 0 }
        },
        "parameters": {
            "ka": { "value": 1.2 },
            "ke": { "value": 0.2 },
            "V": { "value": 10 },
            "C": { "value": 0, "constant": false }
        },
        "rules": [{ "type": "assignment", "variable": "C", "math": "Central / V" }],
        "reactions": {
            "absorption": { "reactants": [{ "species": "Gut" }], "products": [{ "species": "Central" }], "kineticLaw": "ka * Gut" },
            "elimination": { "reactants": [{ "species": "Central" }], "kineticLaw": "ke * C * V" }
        }
    }"#;

    #[test]
    fn test_convert_json_to_source() {
        let source = convert_json(PK, "rust", &ConversionOptions::default()).unwrap();
        assert!(source.contains("pub fn simulate("));
        assert!(source.contains("pub const N_STATES: usize = 2;"));
        syn::parse_file(&source).unwrap();
    }

    #[test]
    fn test_unknown_target() {
        let model = parse_model(PK).unwrap();
        let err = convert(&model, "fortran", &ConversionOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_model_info() {
        let model = parse_model(PK).unwrap();
        let info = model_info(&model, &ConversionOptions::default()).unwrap();
        assert_eq!(info.num_states, 2);
        assert_eq!(info.num_dynamic_rules, 1);
        assert_eq!(info.num_inputs, 5);
        assert_eq!(info.jacobian_nonzeros, 3);
        assert_eq!(info.jacobian_total, 4);
        assert_eq!(info.dose_species.as_deref(), Some("Gut"));
        assert!(info.optimization.is_none());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "One compartment, oral");
    }

    #[test]
    fn test_conversion_simulates() {
        let model = parse_model(PK).unwrap();
        let conversion = Converter::new(ConversionOptions::default())
            .convert(&model)
            .unwrap();
        assert!(conversion.info.optimization.is_some());
        let input = crate::runtime::SimulationInput::defaults(&conversion.model)
            .with_dose(0.0, 100.0)
            .with_final_time(12.0);
        let output = conversion.simulator().simulate(&input).unwrap();
        assert_eq!(output.series("Gut").unwrap()[0], 100.0);
        assert!(output.last("Central").unwrap() > 0.0);
    }

    #[test]
    fn test_validation_runs_before_compilation() {
        let model = parse_model(
            r#"{
            "id": "dangling",
            "species": { "A": {} },
            "reactions": { "R": { "reactants": [{ "species": "Missing" }], "kineticLaw": "1" } }
        }"#,
        )
        .unwrap();
        assert!(validate(&model).is_err());
        let err = Converter::new(ConversionOptions::default())
            .compile(&model)
            .unwrap_err();
        assert!(matches!(err, CompileError::Validation(_)));
    }

    struct CopyBuilder;

    impl PackageBuilder for CopyBuilder {
        fn build(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, CompileError> {
            let package = out_dir.join("pkg");
            std::fs::create_dir_all(&package)?;
            std::fs::copy(source, package.join("lib.rs"))?;
            Ok(package)
        }
    }

    #[test]
    fn test_package_hands_source_to_builder() {
        let model = parse_model(PK).unwrap();
        let conversion = Converter::new(ConversionOptions::default())
            .convert(&model)
            .unwrap();
        let dir = std::env::temp_dir().join(format!("sbmlgen-package-{}", std::process::id()));
        let package = conversion.package(&CopyBuilder, &dir).unwrap();
        let copied = std::fs::read_to_string(package.join("lib.rs")).unwrap();
        assert_eq!(copied, conversion.source());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cached_conversion_is_reused() {
        let model = parse_model(PK).unwrap();
        let options = ConversionOptions::default().with_optimization(OptimizationLevel::Basic);
        let first = convert_cached(&model, &options).unwrap();
        let second = convert_cached(&model, &options).unwrap();
        assert_eq!(first.source, second.source);
        let other = convert_cached(&model, &options.clone().with_temp_prefix("tmp")).unwrap();
        assert_eq!(other.model_id, "pk_oral");
    }

    #[test]
    fn test_conversion_cache_is_bounded() {
        use cached::Cached;

        let model = parse_model(PK).unwrap();
        for i in 0..CONVERSION_CACHE_SIZE + 8 {
            let options = ConversionOptions::default()
                .with_optimization(OptimizationLevel::None)
                .with_temp_prefix(format!("w{i}_"));
            convert_cached(&model, &options).unwrap();
        }
        let cache = CONVERT_CACHED.lock().unwrap();
        assert!(cache.cache_size() <= CONVERSION_CACHE_SIZE);
        assert!(cache.cache_size() > 0);
    }
}
