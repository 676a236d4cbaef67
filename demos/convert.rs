// Run with: cargo run --example convert -- <model.json> [out_dir] [dose_species]
//
// Converts a model to a Rust simulation module, prints its statistics and
// runs the reference simulator with a single dose to check the result.
// Without arguments the bundled EuroMix model is used.

use std::path::PathBuf;

use anyhow::Context;
use sbmlgen::{ConversionOptions, Converter, Model, SimulationInput};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EUROMIX: &str = include_str!("../tests/fixtures/euromix.json");

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sbmlgen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let json = match args.next() {
        Some(path) => {
            std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?
        }
        None => EUROMIX.to_string(),
    };
    let out_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("sbmlgen"));
    let dose_species = args.next().unwrap_or_else(|| "QGut".to_string());

    let model = Model::from_str(&json)?;
    let mut options = ConversionOptions::default();
    if model.species.contains_key(&dose_species) {
        options = options.with_dose_species(dose_species);
    }

    // =========================================================================
    // 1. Convert
    // =========================================================================
    let conversion = Converter::new(options).convert(&model)?;
    println!("{}", serde_json::to_string_pretty(&conversion.info)?);
    let path = conversion.code.write_to(&out_dir)?;
    println!("wrote {} ({} bytes)", path.display(), conversion.source().len());
    print!("{}", conversion.code.dependency_table());

    // =========================================================================
    // 2. Reference simulation
    // =========================================================================
    let mut input = SimulationInput::defaults(&conversion.model);
    if conversion.model.dose_index.is_some() {
        input = input.with_dose(0.0, 100.0);
    }
    let output = conversion.simulator().simulate(&input)?;
    println!("{} samples up to t = {}", output.len(), input.final_time);
    for species in &conversion.model.ode.states {
        if let Some(value) = output.last(species) {
            println!("  {species:>12} {value:>14.6e}");
        }
    }
    Ok(())
}
