//! Conversion options

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::expr::FunctionInliner;

/// How aggressively the symbolic optimizer rewrites the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OptimizationLevel {
    /// Emit expressions as built
    None,
    /// Common sub-expression elimination
    Basic,
    /// Repeated elimination plus simplification
    #[default]
    Full,
}

impl TryFrom<u8> for OptimizationLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::None),
            1 => Ok(Self::Basic),
            2 => Ok(Self::Full),
            other => Err(format!("optimization level must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<OptimizationLevel> for u8 {
    fn from(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::None => 0,
            OptimizationLevel::Basic => 1,
            OptimizationLevel::Full => 2,
        }
    }
}

/// Options for one conversion
///
/// ```ignore
/// use sbmlgen::{ConversionOptions, OptimizationLevel};
///
/// let options = ConversionOptions::default()
///     .with_model_name("euromix")
///     .with_optimization(OptimizationLevel::Basic)
///     .with_dose_species("QGut");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionOptions {
    /// Name recorded in the emitted metadata; the model id when unset
    pub model_name: Option<String>,
    pub optimization: OptimizationLevel,
    /// Prefix of CSE temporaries
    pub temp_prefix: String,
    /// Species receiving doses; the first dynamic species when unset
    pub dose_species: Option<String>,
    /// Nesting limit for user-function expansion
    pub max_inline_depth: usize,
    /// Emit the `wasm_bindgen` entry points
    pub emit_wasm_bindings: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            model_name: None,
            optimization: OptimizationLevel::default(),
            temp_prefix: "x".to_string(),
            dose_species: None,
            max_inline_depth: FunctionInliner::DEFAULT_MAX_DEPTH,
            emit_wasm_bindings: true,
        }
    }
}

impl ConversionOptions {
    /// Read options from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, CompileError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn with_optimization(mut self, level: OptimizationLevel) -> Self {
        self.optimization = level;
        self
    }

    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    pub fn with_dose_species(mut self, species: impl Into<String>) -> Self {
        self.dose_species = Some(species.into());
        self
    }

    pub fn with_max_inline_depth(mut self, depth: usize) -> Self {
        self.max_inline_depth = depth;
        self
    }

    pub fn with_wasm_bindings(mut self, emit: bool) -> Self {
        self.emit_wasm_bindings = emit;
        self
    }
}
