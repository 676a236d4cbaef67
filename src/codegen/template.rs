//! Assembly of the emitted source file
//!
//! Model-specific items come from [`Blocks`] and [`event_items`]; the
//! simulation driver below is the same for every model and only talks to
//! them through `N_STATES`, `Constants`, `initial_state`, `derivatives`,
//! `jacobian` and the event functions.

use proc_macro2::{Literal, TokenStream};
use quote::quote;
use serde_json::json;

use crate::codegen::blocks::Blocks;
use crate::codegen::events::event_items;
use crate::error::CompileError;

/// Tolerances of the emitted BDF solver
pub const RTOL: f64 = 1e-6;
pub const ATOL: f64 = 1e-8;

/// Render the complete source unit
pub fn assemble(blocks: &Blocks<'_>, wasm: bool) -> Result<String, CompileError> {
    let file = items(blocks, wasm)?;
    let parsed: syn::File = syn::parse2(file)
        .map_err(|e| CompileError::codegen(format!("emitted source does not parse: {e}")))?;
    Ok(prettyplease::unparse(&parsed))
}

fn items(blocks: &Blocks<'_>, wasm: bool) -> Result<TokenStream, CompileError> {
    let model = blocks.model;
    let header = Literal::string(&format!(
        " Simulation of model `{}`, generated by sbmlgen {}.",
        model.id,
        env!("CARGO_PKG_VERSION")
    ));
    let n_states = Literal::usize_unsuffixed(model.ode.len());
    let species = model.ode.states.iter().map(|s| Literal::string(s));
    let dose_index = match model.dose_index {
        Some(i) => {
            let i = Literal::usize_unsuffixed(i);
            quote!(Some(#i))
        }
        None => quote!(None),
    };
    let input_fields = blocks.input_fields()?;
    let constants = blocks.constants()?;
    let initial_state = blocks.initial_state()?;
    let derivatives = blocks.derivatives()?;
    let jacobian = blocks.jacobian()?;
    let pattern = blocks.jacobian_pattern();
    let events = event_items(blocks)?;
    let metadata = metadata(blocks)?;
    let driver = driver();
    let entry = entry_points(wasm);
    let wasm_use = if wasm {
        quote!(use wasm_bindgen::prelude::*;)
    } else {
        TokenStream::new()
    };
    let rtol = Literal::f64_unsuffixed(RTOL);
    let atol = Literal::f64_unsuffixed(ATOL);

    Ok(quote! {
        #![doc = #header]
        #![allow(
            non_snake_case,
            non_upper_case_globals,
            unused_variables,
            unused_mut,
            unused_parens,
            dead_code,
            clippy::all
        )]

        use std::collections::BTreeMap;
        use std::fmt;

        use diffsol::{OdeBuilder, OdeSolverMethod, OdeSolverStopReason};
        use serde::{Deserialize, Serialize};
        #wasm_use

        type M = diffsol::NalgebraMat<f64>;
        type V = diffsol::NalgebraVec<f64>;
        type LS = diffsol::NalgebraLU<f64>;

        const RTOL: f64 = #rtol;
        const ATOL: f64 = #atol;

        pub const N_STATES: usize = #n_states;
        /// Species ids in state-vector order
        pub const SPECIES: [&str; N_STATES] = [#(#species),*];
        #pattern
        /// State slot that receives doses
        pub const DOSE_SPECIES_INDEX: Option<usize> = #dose_index;

        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct State {
            pub t: f64,
            pub y: [f64; N_STATES],
        }

        #[derive(Debug, Clone, PartialEq, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct SimulationInput {
            #(#input_fields,)*
            /// `(time, amount)` pairs, in any order
            pub doses: Vec<(f64, f64)>,
            pub final_time: f64,
        }

        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct SimulationOutput {
            pub time: Vec<f64>,
            pub species: BTreeMap<String, Vec<f64>>,
        }

        #[derive(Debug, Clone, PartialEq)]
        pub enum SimulationError {
            InvalidInput(String),
            Solver { time: f64, message: String },
            NonFinite { species: &'static str, time: f64 },
        }

        impl fmt::Display for SimulationError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    SimulationError::InvalidInput(message) => {
                        write!(f, "invalid simulation input: {message}")
                    }
                    SimulationError::Solver { time, message } => {
                        write!(f, "ODE solver failed at t = {time}: {message}")
                    }
                    SimulationError::NonFinite { species, time } => {
                        write!(f, "state of species '{species}' became non-finite at t = {time}")
                    }
                }
            }
        }

        impl std::error::Error for SimulationError {}

        #constants
        #initial_state
        #derivatives
        #jacobian
        #events
        #metadata
        #driver
        #entry
    })
}

/// JSON descriptions of the model, embedded as string constants
fn metadata(blocks: &Blocks<'_>) -> Result<TokenStream, CompileError> {
    let model = blocks.model;
    let model_metadata = json!({
        "model_id": model.id,
        "name": model.name,
        "num_species": model.species.len(),
        "num_states": model.ode.len(),
        "num_inputs": model.inputs.len(),
        "num_events": model.events.len(),
        "jacobian_nonzeros": model.jacobian.nnz(),
        "dose_species": model.dose_species(),
    });
    let parameters: Vec<serde_json::Value> = model
        .inputs
        .iter()
        .map(|i| {
            json!({
                "id": i.name,
                "kind": i.kind,
                "default_value": i.default,
                "required": true,
            })
        })
        .collect();
    let strings = [
        serde_json::to_string(&model_metadata),
        serde_json::to_string(&parameters),
        serde_json::to_string(&model.species),
        serde_json::to_string(&model.default_input()),
    ]
    .into_iter()
    .map(|s| s.map(|s| Literal::string(&s)))
    .collect::<Result<Vec<_>, _>>()?;
    let [meta, params, species, defaults] = <[Literal; 4]>::try_from(strings)
        .map_err(|_| CompileError::codegen("metadata block is incomplete"))?;
    Ok(quote! {
        pub const MODEL_METADATA: &str = #meta;
        pub const PARAMETERS_INFO: &str = #params;
        pub const SPECIES_INFO: &str = #species;
        /// A complete `SimulationInput` holding the model's default values
        pub const DEFAULT_PARAMETERS: &str = #defaults;
    })
}

/// Dosing-segmented simulation driver
fn driver() -> TokenStream {
    quote! {
        struct Pending {
            time: f64,
            index: usize,
            values: Option<Vec<f64>>,
        }

        struct Events {
            previous: [bool; N_EVENTS],
            pending: Vec<Pending>,
        }

        impl Events {
            fn new() -> Self {
                Self {
                    previous: EVENT_INITIAL_VALUES,
                    pending: Vec::new(),
                }
            }

            /// Fire due delayed events and newly triggered events; returns
            /// whether the state changed
            fn process(&mut self, t: f64, y: &mut [f64; N_STATES], c: &Constants) -> bool {
                let mut changed = false;
                let mut i = 0;
                while i < self.pending.len() {
                    if self.pending[i].time <= t {
                        let due = self.pending.remove(i);
                        let values = match due.values {
                            Some(values) => values,
                            None => event_values(due.index, t, y, c),
                        };
                        apply_event(due.index, &values, y);
                        changed = true;
                    } else {
                        i += 1;
                    }
                }
                let now = event_triggers(t, y, c);
                for k in 0..N_EVENTS {
                    if now[k] && !self.previous[k] {
                        let delay = event_delay(k, t, y, c);
                        if delay > 0.0 {
                            let values = if EVENT_USE_TRIGGER_VALUES[k] {
                                Some(event_values(k, t, y, c))
                            } else {
                                None
                            };
                            self.pending.push(Pending { time: t + delay, index: k, values });
                        } else {
                            let values = event_values(k, t, y, c);
                            apply_event(k, &values, y);
                            changed = true;
                        }
                    }
                }
                self.previous = now;
                changed
            }
        }

        struct Recorder {
            time: Vec<f64>,
            states: Vec<Vec<f64>>,
        }

        impl Recorder {
            fn new() -> Self {
                Self {
                    time: Vec::new(),
                    states: vec![Vec::new(); N_STATES],
                }
            }

            fn push(&mut self, t: f64, y: &[f64; N_STATES]) -> Result<(), SimulationError> {
                if let Some(i) = y.iter().position(|v| !v.is_finite()) {
                    return Err(SimulationError::NonFinite { species: SPECIES[i], time: t });
                }
                if self.time.last().is_some_and(|&last| t <= last) {
                    return Ok(());
                }
                self.time.push(t);
                for (column, value) in self.states.iter_mut().zip(y) {
                    column.push(*value);
                }
                Ok(())
            }

            fn finish(self) -> SimulationOutput {
                SimulationOutput {
                    time: self.time,
                    species: SPECIES
                        .iter()
                        .map(|s| s.to_string())
                        .zip(self.states)
                        .collect(),
                }
            }
        }

        fn solver_error(time: f64, err: impl fmt::Display) -> SimulationError {
            SimulationError::Solver { time, message: err.to_string() }
        }

        fn add_doses(doses: &[(f64, f64)], time: f64, y: &mut [f64; N_STATES]) {
            if let Some(slot) = DOSE_SPECIES_INDEX {
                for &(_, amount) in doses.iter().filter(|d| d.0 == time) {
                    y[slot] += amount;
                }
            }
        }

        /// Integrate from `t = 0` to `input.final_time`, applying every dose
        /// as a jump in the dosed species
        pub fn simulate(input: &SimulationInput) -> Result<SimulationOutput, SimulationError> {
            let final_time = input.final_time;
            if !(final_time.is_finite() && final_time > 0.0) {
                return Err(SimulationError::InvalidInput(format!(
                    "final_time must be positive, got {final_time}"
                )));
            }
            let mut doses = Vec::with_capacity(input.doses.len());
            for &(time, amount) in &input.doses {
                if !(time.is_finite() && time >= 0.0 && amount.is_finite()) {
                    return Err(SimulationError::InvalidInput(format!(
                        "invalid dose of {amount} at t = {time}"
                    )));
                }
                if time < final_time {
                    doses.push((time, amount));
                }
            }
            doses.sort_by(|a, b| a.0.total_cmp(&b.0));
            if !doses.is_empty() && DOSE_SPECIES_INDEX.is_none() {
                return Err(SimulationError::InvalidInput(
                    "the model has no species that can receive doses".to_string(),
                ));
            }

            let c = Constants::new(input);
            let mut y = initial_state(input, &c).y;
            add_doses(&doses, 0.0, &mut y);
            let mut events = Events::new();
            events.process(0.0, &mut y, &c);
            let mut recorder = Recorder::new();
            recorder.push(0.0, &y)?;

            let mut boundaries: Vec<f64> = doses.iter().map(|d| d.0).filter(|&t| t > 0.0).collect();
            boundaries.push(final_time);
            boundaries.dedup();

            if N_STATES == 0 {
                recorder.push(final_time, &y)?;
                return Ok(recorder.finish());
            }

            let start = y;
            let problem = OdeBuilder::<M>::new()
                .rtol(RTOL)
                .atol(vec![ATOL; N_STATES])
                .rhs_implicit(
                    |x: &V, _p: &V, t: f64, dx: &mut V| {
                        let mut y = [0.0; N_STATES];
                        for i in 0..N_STATES {
                            y[i] = x[i];
                        }
                        let mut dy = [0.0; N_STATES];
                        derivatives(t, &y, &c, &mut dy);
                        for i in 0..N_STATES {
                            dx[i] = dy[i];
                        }
                    },
                    |x: &V, _p: &V, t: f64, v: &V, jv: &mut V| {
                        let mut y = [0.0; N_STATES];
                        for i in 0..N_STATES {
                            y[i] = x[i];
                        }
                        let mut values = [0.0; JACOBIAN_PATTERN.len()];
                        jacobian(t, &y, &c, &mut values);
                        for i in 0..N_STATES {
                            jv[i] = 0.0;
                        }
                        for (k, &(row, col)) in JACOBIAN_PATTERN.iter().enumerate() {
                            jv[row] += values[k] * v[col];
                        }
                    },
                )
                .init(
                    move |_p: &V, _t: f64, y0: &mut V| {
                        for i in 0..N_STATES {
                            y0[i] = start[i];
                        }
                    },
                    N_STATES,
                )
                .build()
                .map_err(|e| solver_error(0.0, e))?;
            let mut solver = problem.bdf::<LS>().map_err(|e| solver_error(0.0, e))?;

            for &stop in &boundaries {
                solver
                    .set_stop_time(stop)
                    .map_err(|e| solver_error(solver.state().t, e))?;
                loop {
                    let reason = match solver.step() {
                        Ok(reason) => reason,
                        Err(e) => return Err(solver_error(solver.state().t, e)),
                    };
                    let t = solver.state().t;
                    for i in 0..N_STATES {
                        y[i] = solver.state().y[i];
                    }
                    let reached = matches!(reason, OdeSolverStopReason::TstopReached);
                    if reached && stop < final_time {
                        add_doses(&doses, stop, &mut y);
                    }
                    if events.process(t, &mut y, &c) || reached {
                        for i in 0..N_STATES {
                            solver.state_mut().y[i] = y[i];
                        }
                    }
                    recorder.push(t, &y)?;
                    if reached {
                        break;
                    }
                }
            }
            Ok(recorder.finish())
        }
    }
}

fn entry_points(wasm: bool) -> TokenStream {
    if wasm {
        quote! {
            fn js_error(err: impl fmt::Display) -> JsValue {
                JsValue::from_str(&err.to_string())
            }

            /// Run a simulation from a JSON `SimulationInput`, returning a
            /// JSON `SimulationOutput`
            #[wasm_bindgen]
            pub fn run_simulation(input: &str) -> Result<String, JsValue> {
                let input: SimulationInput = serde_json::from_str(input).map_err(js_error)?;
                let output = simulate(&input).map_err(js_error)?;
                serde_json::to_string(&output).map_err(js_error)
            }

            #[wasm_bindgen]
            pub fn model_metadata() -> String {
                MODEL_METADATA.to_string()
            }

            #[wasm_bindgen]
            pub fn parameters_info() -> String {
                PARAMETERS_INFO.to_string()
            }

            #[wasm_bindgen]
            pub fn species_info() -> String {
                SPECIES_INFO.to_string()
            }

            #[wasm_bindgen]
            pub fn default_parameters() -> String {
                DEFAULT_PARAMETERS.to_string()
            }
        }
    } else {
        quote! {
            /// Run a simulation from a JSON `SimulationInput`, returning a
            /// JSON `SimulationOutput`
            pub fn run_simulation(input: &str) -> Result<String, SimulationError> {
                let input: SimulationInput = serde_json::from_str(input)
                    .map_err(|e| SimulationError::InvalidInput(e.to_string()))?;
                let output = simulate(&input)?;
                serde_json::to_string(&output)
                    .map_err(|e| SimulationError::InvalidInput(e.to_string()))
            }
        }
    }
}
