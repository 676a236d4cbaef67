use std::fmt;

use diffsol::{OdeBuilder, OdeSolverMethod, OdeSolverStopReason, VectorHost};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::codegen::{ATOL, RTOL};
use crate::error::SimulationError;
use crate::runtime::events::EventQueue;
use crate::runtime::frame::Evaluator;
use crate::runtime::input::{SimulationInput, SimulationOutput};
use crate::symbolic::CompiledModel;

type M = diffsol::NalgebraMat<f64>;
type V = diffsol::NalgebraVec<f64>;
type LS = diffsol::NalgebraLU<f64>;

/// Collects samples, dropping any that do not advance time
struct Recorder<'m> {
    species: &'m [String],
    time: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl<'m> Recorder<'m> {
    fn new(species: &'m [String]) -> Self {
        Self {
            species,
            time: Vec::new(),
            states: vec![Vec::new(); species.len()],
        }
    }

    fn push(&mut self, t: f64, y: &[f64]) -> Result<(), SimulationError> {
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(SimulationError::NonFinite {
                species: self.species[i].clone(),
                time: t,
            });
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
            species: self.species.iter().cloned().zip(self.states).collect(),
        }
    }
}

fn solver_error(time: f64, err: impl fmt::Display) -> SimulationError {
    SimulationError::Solver {
        time,
        message: err.to_string(),
    }
}

fn add_doses(doses: &[(f64, f64)], slot: Option<usize>, time: f64, y: &mut [f64]) {
    if let Some(slot) = slot {
        for &(_, amount) in doses.iter().filter(|d| d.0 == time) {
            y[slot] += amount;
        }
    }
}

/// Integrates a [`CompiledModel`] by evaluating its expression trees
#[derive(Debug, Clone, Copy)]
pub struct Simulator<'m> {
    model: &'m CompiledModel,
}

impl<'m> Simulator<'m> {
    pub fn new(model: &'m CompiledModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &'m CompiledModel {
        self.model
    }

    fn evaluator(&self, input: &SimulationInput) -> Result<Evaluator<'m>, SimulationError> {
        Evaluator::new(self.model, input.resolve(self.model)?)
    }

    fn check_state(&self, y: &[f64]) -> Result<(), SimulationError> {
        if y.len() != self.model.ode.len() {
            return Err(SimulationError::InvalidInput(format!(
                "expected {} state values, got {}",
                self.model.ode.len(),
                y.len()
            )));
        }
        Ok(())
    }

    /// State at `t = 0` for the values in `input`, before any dose
    pub fn initial_state(&self, input: &SimulationInput) -> Result<DVector<f64>, SimulationError> {
        let y = self.evaluator(input)?.initial_state()?;
        Ok(DVector::from_vec(y))
    }

    /// `f(t, y)` for the values in `input`
    pub fn derivatives_at(
        &self,
        input: &SimulationInput,
        t: f64,
        y: &[f64],
    ) -> Result<DVector<f64>, SimulationError> {
        self.check_state(y)?;
        let mut dy = DVector::zeros(y.len());
        self.evaluator(input)?
            .derivatives(t, y, dy.as_mut_slice())?;
        Ok(dy)
    }

    /// Dense Jacobian of `f` at `(t, y)`, filled from the sparse entries
    pub fn jacobian_at(
        &self,
        input: &SimulationInput,
        t: f64,
        y: &[f64],
    ) -> Result<DMatrix<f64>, SimulationError> {
        self.check_state(y)?;
        let entries = &self.model.jacobian.entries;
        let mut values = vec![0.0; entries.len()];
        self.evaluator(input)?.jacobian(t, y, &mut values)?;
        let mut jacobian = DMatrix::zeros(y.len(), y.len());
        for (entry, value) in entries.iter().zip(values) {
            jacobian[(entry.row, entry.col)] = value;
        }
        Ok(jacobian)
    }

    /// Run from a JSON input to a JSON output
    pub fn simulate_json(&self, input: &str) -> Result<String, SimulationError> {
        let input = SimulationInput::from_json(input)?;
        let output = self.simulate(&input)?;
        Ok(serde_json::to_string(&output)?)
    }

    /// Integrate from `t = 0` to `input.final_time`
    ///
    /// Doses are jumps in the dose species applied at their times; the
    /// integration restarts after each one and the post-dose state is the
    /// sample kept at that time. Events are checked after every solver step.
    pub fn simulate(&self, input: &SimulationInput) -> Result<SimulationOutput, SimulationError> {
        let model = self.model;
        let n = model.ode.len();
        let final_time = input.final_time;
        let doses = input.schedule()?;
        if !doses.is_empty() && model.dose_index.is_none() {
            return Err(SimulationError::InvalidInput(
                "the model has no species that can receive doses".to_string(),
            ));
        }
        let evaluator = self.evaluator(input)?;

        let mut y = evaluator.initial_state()?;
        add_doses(&doses, model.dose_index, 0.0, &mut y);
        let mut events = EventQueue::new(&evaluator);
        events.process(&evaluator, 0.0, &mut y)?;
        let mut recorder = Recorder::new(&model.ode.states);
        recorder.push(0.0, &y)?;

        let mut boundaries: Vec<f64> = doses.iter().map(|d| d.0).filter(|&t| t > 0.0).collect();
        boundaries.push(final_time);
        boundaries.dedup();

        if n == 0 {
            recorder.push(final_time, &y)?;
            return Ok(recorder.finish());
        }

        // evaluate once so errors surface here instead of as NaN
        let mut scratch = vec![0.0; n];
        evaluator.derivatives(0.0, &y, &mut scratch)?;

        let pattern = model.jacobian.pattern();
        let start = y.clone();
        let problem = OdeBuilder::<M>::new()
            .rtol(RTOL)
            .atol(vec![ATOL; n])
            .rhs_implicit(
                |x: &V, _p: &V, t: f64, dx: &mut V| {
                    let out = dx.as_mut_slice();
                    if evaluator.derivatives(t, x.as_slice(), out).is_err() {
                        out.fill(f64::NAN);
                    }
                },
                |x: &V, _p: &V, t: f64, v: &V, jv: &mut V| {
                    let mut values = vec![0.0; pattern.len()];
                    if evaluator.jacobian(t, x.as_slice(), &mut values).is_err() {
                        values.fill(f64::NAN);
                    }
                    let v = v.as_slice();
                    let out = jv.as_mut_slice();
                    out.fill(0.0);
                    for (value, &(row, col)) in values.iter().zip(&pattern) {
                        out[row] += value * v[col];
                    }
                },
            )
            .init(
                move |_p: &V, _t: f64, y0: &mut V| {
                    y0.as_mut_slice().copy_from_slice(&start);
                },
                n,
            )
            .build()
            .map_err(|e| solver_error(0.0, e))?;
        let mut solver = problem.bdf::<LS>().map_err(|e| solver_error(0.0, e))?;

        for &stop in &boundaries {
            solver
                .set_stop_time(stop)
                .map_err(|e| solver_error(solver.state().t, e))?;
            debug!(model = %model.id, stop, "integrating segment");
            loop {
                let reason = match solver.step() {
                    Ok(reason) => reason,
                    Err(e) => return Err(solver_error(solver.state().t, e)),
                };
                let t = solver.state().t;
                y.copy_from_slice(solver.state().y.as_slice());
                let reached = matches!(reason, OdeSolverStopReason::TstopReached);
                if reached && stop < final_time {
                    add_doses(&doses, model.dose_index, stop, &mut y);
                }
                if events.process(&evaluator, t, &mut y)? || reached {
                    solver.state_mut().y.as_mut_slice().copy_from_slice(&y);
                }
                recorder.push(t, &y)?;
                if reached {
                    break;
                }
            }
        }

        let output = recorder.finish();
        info!(model = %model.id, points = output.len(), doses = doses.len(), "simulation finished");
        Ok(output)
    }
}
