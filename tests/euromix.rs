//! End-to-end tests on the EuroMix PBK model
//!
//! The fixture has 14 species, 22 reactions, 21 assignment rules in
//! scrambled order and three user functions.

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use sbmlgen::{
    CompiledModel, ConversionOptions, Converter, Model, OptimizationLevel, SimulationInput,
    SimulationOutput, Simulator,
};

const EUROMIX: &str = include_str!("fixtures/euromix.json");

fn model() -> Model {
    Model::from_str(EUROMIX).expect("fixture parses")
}

fn options() -> ConversionOptions {
    ConversionOptions::default().with_dose_species("QGut")
}

fn compiled() -> CompiledModel {
    Converter::new(options()).compile(&model()).expect("fixture compiles")
}

fn total_mass(output: &SimulationOutput, index: usize) -> f64 {
    output.species.values().map(|series| series[index]).sum()
}

fn assert_strictly_increasing(time: &[f64]) {
    assert_eq!(time[0], 0.0);
    for pair in time.windows(2) {
        assert!(pair[0] < pair[1], "time not increasing: {pair:?}");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Symbolic structure
// ═══════════════════════════════════════════════════════════════════════════════

mod structure {
    use super::*;

    #[test]
    fn test_state_layout_follows_declaration_order() {
        let compiled = compiled();
        assert_eq!(
            compiled.ode.states,
            [
                "QFat", "QRich", "QPoor", "QLiver", "QMetab", "QGut", "QSkin_u", "QSkin_e",
                "QSkin_sc_u", "QSkin_sc_e", "QArt", "QVen", "QExcret", "QAir"
            ]
        );
        assert_eq!(compiled.dose_index, Some(5));
    }

    #[test]
    fn test_scrambled_rules_are_all_static() {
        let compiled = compiled();
        assert_eq!(compiled.rules.static_rules.len(), 21);
        assert!(compiled.rules.dynamic_rules.is_empty());

        // every rule comes after the rules it reads
        let order: Vec<&str> = compiled
            .rules
            .static_rules
            .iter()
            .map(|r| r.target.as_str())
            .collect();
        for (i, rule) in compiled.rules.static_rules.iter().enumerate() {
            for symbol in rule.expr.free_symbols() {
                if let Some(j) = order.iter().position(|t| *t == symbol) {
                    assert!(j < i, "{} reads {} before it is assigned", rule.target, symbol);
                }
            }
        }
    }

    #[test]
    fn test_jacobian_sparsity_pattern() {
        let compiled = compiled();
        let jacobian = &compiled.jacobian;
        assert_eq!(jacobian.nnz(), 34);
        assert_eq!(jacobian.n * jacobian.n, 196);

        let expected: Vec<(usize, &[usize])> = vec![
            (0, &[0, 10]),
            (1, &[1, 10]),
            (2, &[2, 10]),
            (3, &[3, 5, 10]),
            (4, &[3]),
            (5, &[5]),
            (6, &[6, 8, 10]),
            (7, &[7, 9, 10]),
            (8, &[6, 8]),
            (9, &[7, 9]),
            (10, &[10, 11, 13]),
            (11, &[0, 1, 2, 3, 6, 7, 11]),
            (12, &[10]),
            (13, &[10, 13]),
        ];
        let expected: Vec<(usize, usize)> = expected
            .into_iter()
            .flat_map(|(row, cols)| cols.iter().map(move |&col| (row, col)))
            .collect();
        assert_eq!(jacobian.pattern(), expected);
    }

    #[test]
    fn test_sparse_and_dense_agree() {
        let compiled = compiled();
        let dense = compiled.jacobian.to_dense();
        let pattern: BTreeSet<(usize, usize)> = compiled.jacobian.pattern().into_iter().collect();
        for (row, cols) in dense.iter().enumerate() {
            for (col, expr) in cols.iter().enumerate() {
                assert_eq!(!expr.is_zero(), pattern.contains(&(row, col)), "({row}, {col})");
            }
        }
    }

    #[test]
    fn test_optimized_source_has_fewer_nodes() {
        let conversion = Converter::new(options()).convert(&model()).unwrap();
        let stats = conversion.info.optimization.unwrap();
        assert_eq!(stats.level, OptimizationLevel::Full);
        assert!(stats.temporaries > 0);
        assert!(stats.nodes_after < stats.nodes_before);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Numeric Jacobian
// ═══════════════════════════════════════════════════════════════════════════════

mod finite_differences {
    use super::*;

    fn points(n: usize) -> Vec<Vec<f64>> {
        vec![
            (0..n).map(|i| 1.0 + 0.1 * i as f64).collect(),
            (0..n).map(|i| 0.5 * (i + 1) as f64).collect(),
            (0..n).map(|i| 10.0 / (i + 1) as f64).collect(),
        ]
    }

    #[test]
    fn test_symbolic_jacobian_matches_central_differences() {
        let compiled = compiled();
        let simulator = Simulator::new(&compiled);
        let input = SimulationInput::defaults(&compiled);
        let n = compiled.ode.len();

        for y in points(n) {
            let analytic = simulator.jacobian_at(&input, 0.0, &y).unwrap();
            for col in 0..n {
                let h = 1e-6 * y[col].abs().max(1.0);
                let mut plus = y.clone();
                let mut minus = y.clone();
                plus[col] += h;
                minus[col] -= h;
                let f_plus = simulator.derivatives_at(&input, 0.0, &plus).unwrap();
                let f_minus = simulator.derivatives_at(&input, 0.0, &minus).unwrap();
                for row in 0..n {
                    let numeric = (f_plus[row] - f_minus[row]) / (2.0 * h);
                    assert_relative_eq!(
                        analytic[(row, col)],
                        numeric,
                        epsilon = 1e-5,
                        max_relative = 1e-5
                    );
                }
            }
        }
    }

    #[test]
    fn test_derivatives_conserve_mass() {
        let compiled = compiled();
        let simulator = Simulator::new(&compiled);
        let input = SimulationInput::defaults(&compiled);
        for y in points(compiled.ode.len()) {
            let dy = simulator.derivatives_at(&input, 0.0, &y).unwrap();
            assert_relative_eq!(dy.sum(), 0.0, epsilon = 1e-9 * dy.amax().max(1.0));
        }
    }

    #[test]
    fn test_wrong_state_length_is_rejected() {
        let compiled = compiled();
        let input = SimulationInput::defaults(&compiled);
        assert!(Simulator::new(&compiled)
            .jacobian_at(&input, 0.0, &[1.0, 2.0])
            .is_err());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dosing
// ═══════════════════════════════════════════════════════════════════════════════

mod dosing {
    use super::*;

    #[test]
    fn test_single_dose_over_a_day() {
        let compiled = compiled();
        let input = SimulationInput::defaults(&compiled)
            .with_dose(0.0, 100.0)
            .with_final_time(24.0);
        let output = Simulator::new(&compiled).simulate(&input).unwrap();

        assert_strictly_increasing(&output.time);
        assert_relative_eq!(*output.time.last().unwrap(), 24.0, epsilon = 1e-9);
        assert_eq!(output.species.len(), 14);
        for series in output.species.values() {
            assert_eq!(series.len(), output.time.len());
        }
        assert_eq!(output.series("QGut").unwrap()[0], 101.0);

        let last = output.len() - 1;
        assert_relative_eq!(total_mass(&output, last), 101.0, max_relative = 1e-4);
        assert!(output.last("QGut").unwrap() < 1e-6);
        assert!(output.last("QExcret").unwrap() > 0.0);
    }

    #[test]
    fn test_repeated_doses_add_samples_without_duplicates() {
        let compiled = compiled();
        let simulator = Simulator::new(&compiled);
        let single = simulator
            .simulate(
                &SimulationInput::defaults(&compiled)
                    .with_dose(0.0, 100.0)
                    .with_final_time(24.0),
            )
            .unwrap();
        let repeated = simulator
            .simulate(
                &SimulationInput::defaults(&compiled)
                    .with_dose(16.0, 100.0)
                    .with_dose(0.0, 100.0)
                    .with_dose(8.0, 100.0)
                    .with_final_time(48.0),
            )
            .unwrap();

        assert!(repeated.len() > single.len());
        assert_strictly_increasing(&repeated.time);
        assert_relative_eq!(*repeated.time.last().unwrap(), 48.0, epsilon = 1e-9);

        // the sample at each dose time holds the post-dose state
        let gut = repeated.series("QGut").unwrap();
        for dose_time in [8.0, 16.0] {
            let i = repeated
                .time
                .iter()
                .position(|t| (t - dose_time).abs() < 1e-9)
                .expect("dose time is sampled");
            assert!(gut[i] > 100.0, "QGut at {dose_time} is {}", gut[i]);
            assert!(gut[i] - 100.0 < gut[i - 1]);
        }
        let last = repeated.len() - 1;
        assert_relative_eq!(total_mass(&repeated, last), 301.0, max_relative = 1e-4);
    }

    #[test]
    fn test_doses_after_final_time_are_ignored() {
        let compiled = compiled();
        let simulator = Simulator::new(&compiled);
        let base = SimulationInput::defaults(&compiled).with_final_time(12.0);
        let plain = simulator.simulate(&base.clone()).unwrap();
        let late = simulator
            .simulate(&base.with_dose(12.0, 50.0).with_dose(30.0, 50.0))
            .unwrap();
        assert_eq!(plain, late);
    }

    #[test]
    fn test_json_contract() {
        let compiled = compiled();
        let mut input = compiled.default_input();
        input["doses"] = serde_json::json!([[0, 100]]);
        let output = sbmlgen::simulate_json(&compiled, &input.to_string()).unwrap();
        let output: serde_json::Value = serde_json::from_str(&output).unwrap();
        let time = output["time"].as_array().unwrap();
        assert_eq!(time[0], 0.0);
        assert_eq!(output["species"].as_object().unwrap().len(), 14);
        assert_eq!(output["species"]["QGut"].as_array().unwrap().len(), time.len());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Emitted source
// ═══════════════════════════════════════════════════════════════════════════════

mod emitted {
    use super::*;

    #[test]
    fn test_emitted_module_shape() {
        let conversion = Converter::new(options()).convert(&model()).unwrap();
        let source = conversion.source();
        for expected in [
            "pub const N_STATES: usize = 14;",
            "pub const JACOBIAN_PATTERN: [(usize, usize); 34]",
            "pub const DOSE_SPECIES_INDEX: Option<usize> = Some(5);",
            "pub struct SimulationInput",
            "pub fn derivatives(t: f64, y: &[f64], c: &Constants, dy: &mut [f64])",
            "pub fn jacobian(t: f64, y: &[f64], c: &Constants, values: &mut [f64])",
            "pub fn simulate(input: &SimulationInput)",
            "pub fn run_simulation(input: &str) -> Result<String, JsValue>",
            "pub fn model_metadata() -> String",
            "pub fn default_parameters() -> String",
        ] {
            assert!(source.contains(expected), "missing `{expected}`");
        }
        for species in &conversion.model.ode.states {
            assert!(source.contains(&format!("\"{species}\"")), "missing {species}");
        }
        syn::parse_file(source).expect("emitted source parses");
    }

    #[test]
    fn test_every_level_emits_valid_source() {
        for level in [OptimizationLevel::None, OptimizationLevel::Basic, OptimizationLevel::Full] {
            let conversion = Converter::new(options().with_optimization(level))
                .convert(&model())
                .unwrap();
            syn::parse_file(conversion.source()).unwrap();
            assert_eq!(conversion.info.jacobian_nonzeros, 34);
        }
    }
}
