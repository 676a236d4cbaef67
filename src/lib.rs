//! Compiler from reaction-network models to simulation source code
//!
//! A model (species, parameters, compartments, reactions, rules, events,
//! user functions and initial assignments) is read from JSON and lowered to
//! a symbolic ODE system with a sparse symbolic Jacobian. After common
//! sub-expression elimination the system is emitted as one Rust module that
//! integrates it with `diffsol`, applies a dosing schedule and, optionally,
//! exports a `wasm_bindgen` entry point.
//!
//! ```ignore
//! use sbmlgen::{Converter, ConversionOptions, Model};
//!
//! let model = Model::from_str(&std::fs::read_to_string("euromix.json")?)?;
//! let conversion = Converter::new(ConversionOptions::default().with_dose_species("QGut"))
//!     .convert(&model)?;
//! println!("{} Jacobian entries", conversion.info.jacobian_nonzeros);
//! std::fs::write("euromix.rs", conversion.source())?;
//! ```
//!
//! The [`runtime`] module simulates a compiled model directly, with the same
//! input and output JSON as the emitted entry point.

pub mod codegen;
pub mod config;
pub mod error;
pub mod expr;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod symbolic;

pub use codegen::{backend_for, Backend, GeneratedCode, PackageBuilder, RustBackend};
pub use config::{ConversionOptions, OptimizationLevel};
pub use error::{CompileError, EvalError, ParseError, SimulationError, ValidationError};
pub use expr::Expr;
pub use model::{Model, ValidatedModel, Validator};
pub use pipeline::{
    convert, convert_cached, convert_json, model_info, parse_model, validate, validate_json,
    Conversion, Converter, ModelInfo, CONVERSION_CACHE_SIZE,
};
pub use runtime::{simulate_json, SimulationInput, SimulationOutput, Simulator};
pub use symbolic::{CompiledModel, OdeSystem, SparseJacobian};
