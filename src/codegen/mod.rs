//! Code generation from compiled models to Rust source
//!
//! A [`Backend`] turns a [`CompiledModel`] into one self-contained source
//! file. The only backend is [`RustBackend`], which emits a Rust module
//! integrating the model with `diffsol` and, optionally, exposing it to
//! JavaScript through `wasm_bindgen`. Building that file into a package is
//! left to a [`PackageBuilder`].

mod blocks;
mod events;
pub mod ident;
pub mod printer;
mod template;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ConversionOptions;
use crate::error::CompileError;
use crate::symbolic::{optimize_combined, CompiledModel, OptimizationStats};

pub use blocks::Blocks;
pub use ident::IdentMap;
pub use printer::{render, Printer};
pub use template::{ATOL, RTOL};

/// Generated source ready to be written out
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    /// Id of the model the code simulates
    pub model_id: String,

    /// The complete source unit
    pub source: String,

    /// File extension of `source`, without the dot
    pub extension: &'static str,

    /// Crates the source depends on, as `(name, version requirement)`
    pub dependencies: Vec<(&'static str, &'static str)>,

    /// What the symbolic optimizer did
    pub stats: OptimizationStats,
}

impl GeneratedCode {
    /// File name derived from the model id
    pub fn file_name(&self) -> String {
        format!("{}.{}", ident::sanitize(&self.model_id), self.extension)
    }

    /// Write the source into `dir`, returning the file path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, CompileError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, &self.source)?;
        debug!(path = %path.display(), bytes = self.source.len(), "wrote generated source");
        Ok(path)
    }

    /// `[dependencies]` table for a crate built around the source
    pub fn dependency_table(&self) -> String {
        let mut out = String::from("[dependencies]\n");
        for (name, version) in &self.dependencies {
            out.push_str(&format!("{name} = {version}\n"));
        }
        out
    }
}

/// A code emission target
pub trait Backend: Send + Sync {
    /// Target name accepted by [`backend_for`]
    fn name(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn emit(
        &self,
        model: &CompiledModel,
        options: &ConversionOptions,
    ) -> Result<GeneratedCode, CompileError>;
}

/// Emits a Rust module driven by `diffsol`
#[derive(Debug, Clone, Copy, Default)]
pub struct RustBackend;

impl Backend for RustBackend {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn file_extension(&self) -> &'static str {
        "rs"
    }

    fn emit(
        &self,
        model: &CompiledModel,
        options: &ConversionOptions,
    ) -> Result<GeneratedCode, CompileError> {
        let (optimized, stats) = optimize_combined(
            &model.ode,
            &model.jacobian,
            options.optimization,
            &options.temp_prefix,
            &model.reserved_names(),
        );
        let blocks = Blocks::new(model, &optimized);
        let source = template::assemble(&blocks, options.emit_wasm_bindings)?;
        info!(
            model = %model.id,
            bytes = source.len(),
            lines = source.lines().count(),
            temporaries = stats.temporaries,
            "emitted Rust source"
        );

        let mut dependencies = vec![
            ("diffsol", r#""0.6""#),
            ("serde", r#"{ version = "1", features = ["derive"] }"#),
            ("serde_json", r#""1""#),
        ];
        if options.emit_wasm_bindings {
            dependencies.push(("wasm-bindgen", r#""0.2""#));
        }
        Ok(GeneratedCode {
            model_id: model.id.clone(),
            source,
            extension: self.file_extension(),
            dependencies,
            stats,
        })
    }
}

/// Backend for a target name: `"rust"` or its alias `"rust-wasm"`
pub fn backend_for(target: &str) -> Option<Box<dyn Backend>> {
    match target {
        "rust" | "rust-wasm" => Some(Box::new(RustBackend)),
        _ => None,
    }
}

/// Builds an emitted source file into a deployable package
///
/// Implementations wrap an external toolchain; none ships with this crate.
pub trait PackageBuilder {
    /// Build `source` into a package under `out_dir`, returning the package
    /// directory
    fn build(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, CompileError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationLevel;
    use crate::model::Model;

    const DECAY: &str = r#"{
        "id": "decay",
        "species": {
            "A": { "initialAmount": 10 },
            "B": {}
        },
        "parameters": { "k": { "value": 0.5 }, "type": { "value": 2 } },
        "reactions": {
            "R1": { "reactants": [{ "species": "A" }], "products": [{ "species": "B" }], "kineticLaw": "k * type * A" }
        }
    }"#;

    fn emit(options: &ConversionOptions) -> GeneratedCode {
        let model = Model::from_str(DECAY).unwrap();
        let compiled = CompiledModel::compile(&model, options).unwrap();
        RustBackend.emit(&compiled, options).unwrap()
    }

    #[test]
    fn test_backend_lookup() {
        assert_eq!(backend_for("rust").unwrap().name(), "rust");
        assert_eq!(backend_for("rust-wasm").unwrap().file_extension(), "rs");
        assert!(backend_for("python").is_none());
    }

    #[test]
    fn test_emitted_source_shape() {
        let code = emit(&ConversionOptions::default());
        let src = &code.source;
        assert!(src.contains("pub const N_STATES: usize = 2;"), "{src}");
        assert!(src.contains("pub const JACOBIAN_PATTERN: [(usize, usize); 2] = [(0, 0), (1, 0)];"), "{src}");
        assert!(src.contains("pub const DOSE_SPECIES_INDEX: Option<usize> = Some(0);"), "{src}");
        assert!(src.contains("#[serde(rename = \"type\")]"), "{src}");
        assert!(src.contains("pub type_: f64"), "{src}");
        assert!(src.contains("#[wasm_bindgen]"), "{src}");
        assert!(src.contains("pub fn run_simulation(input: &str) -> Result<String, JsValue>"), "{src}");
        assert_eq!(code.file_name(), "decay.rs");
        assert!(code.dependency_table().contains("wasm-bindgen"));
        syn::parse_file(src).unwrap();
    }

    #[test]
    fn test_without_wasm_bindings() {
        let options = ConversionOptions::default()
            .with_wasm_bindings(false)
            .with_optimization(OptimizationLevel::None);
        let code = emit(&options);
        assert!(!code.source.contains("wasm_bindgen"));
        assert!(code
            .source
            .contains("pub fn run_simulation(input: &str) -> Result<String, SimulationError>"));
        assert_eq!(code.stats.temporaries, 0);
    }

    #[test]
    fn test_write_to_directory() {
        let code = emit(&ConversionOptions::default());
        let dir = std::env::temp_dir().join(format!("sbmlgen-codegen-{}", std::process::id()));
        let path = code.write_to(&dir).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), code.source);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
