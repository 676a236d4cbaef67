//! Expression evaluation against one simulation's values

use std::collections::HashMap;

use crate::error::{EvalError, SimulationError};
use crate::expr::{evaluate, Env, Expr, TIME};
use crate::symbolic::CompiledModel;

/// Values visible at one time point: time, the state and dynamic rule
/// targets on top of the simulation constants
pub(crate) struct Frame<'a> {
    constants: &'a HashMap<String, f64>,
    locals: HashMap<&'a str, f64>,
}

impl Frame<'_> {
    pub(crate) fn eval(&self, expr: &Expr) -> Result<f64, EvalError> {
        evaluate(expr, self)
    }

    fn is_true(&self, expr: &Expr) -> Result<bool, EvalError> {
        Ok(self.eval(expr)? != 0.0)
    }
}

impl Env for Frame<'_> {
    fn value(&self, name: &str) -> Option<f64> {
        self.locals
            .get(name)
            .or_else(|| self.constants.get(name))
            .copied()
    }
}

/// Evaluates the blocks of a compiled model for fixed input values
pub(crate) struct Evaluator<'m> {
    model: &'m CompiledModel,
    /// Inputs and static rule targets
    constants: HashMap<String, f64>,
}

impl<'m> Evaluator<'m> {
    /// Bind the inputs and evaluate the static rules
    pub(crate) fn new(
        model: &'m CompiledModel,
        mut constants: HashMap<String, f64>,
    ) -> Result<Self, SimulationError> {
        for rule in &model.rules.static_rules {
            let value = evaluate(&rule.expr, &constants)?;
            constants.insert(rule.target.clone(), value);
        }
        Ok(Self { model, constants })
    }

    pub(crate) fn model(&self) -> &'m CompiledModel {
        self.model
    }

    /// Frame at `(t, y)` with the dynamic rules evaluated
    pub(crate) fn frame(&self, t: f64, y: &[f64]) -> Result<Frame<'_>, EvalError> {
        let model = self.model;
        let mut locals = HashMap::with_capacity(1 + y.len() + model.rules.dynamic_rules.len());
        locals.insert(TIME, t);
        for (species, value) in model.ode.states.iter().zip(y) {
            locals.insert(species.as_str(), *value);
        }
        let mut frame = Frame {
            constants: &self.constants,
            locals,
        };
        for rule in &model.rules.dynamic_rules {
            let value = frame.eval(&rule.expr)?;
            frame.locals.insert(rule.target.as_str(), value);
        }
        Ok(frame)
    }

    /// State at `t = 0` with the initial assignments applied
    pub(crate) fn initial_state(&self) -> Result<Vec<f64>, EvalError> {
        let model = self.model;
        let mut y: Vec<f64> = model
            .ode
            .states
            .iter()
            .map(|species| {
                self.constants.get(species).copied().unwrap_or_else(|| {
                    model
                        .species
                        .iter()
                        .find(|s| &s.id == species)
                        .map_or(0.0, |s| s.initial_amount)
                })
            })
            .collect();
        if model.initial_assignments.is_empty() {
            return Ok(y);
        }
        let mut frame = self.frame(0.0, &y)?;
        for assignment in &model.initial_assignments {
            let value = frame.eval(&assignment.expr)?;
            frame.locals.insert(assignment.target.as_str(), value);
            if let Some(index) = model.ode.index_of(&assignment.target) {
                y[index] = value;
            }
        }
        Ok(y)
    }

    pub(crate) fn derivatives(&self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), EvalError> {
        let frame = self.frame(t, y)?;
        for (out, expr) in dy.iter_mut().zip(&self.model.ode.derivatives) {
            *out = frame.eval(expr)?;
        }
        Ok(())
    }

    /// Values of the sparse Jacobian entries, in entry order
    pub(crate) fn jacobian(&self, t: f64, y: &[f64], values: &mut [f64]) -> Result<(), EvalError> {
        let frame = self.frame(t, y)?;
        for (out, entry) in values.iter_mut().zip(&self.model.jacobian.entries) {
            *out = frame.eval(&entry.expr)?;
        }
        Ok(())
    }

    pub(crate) fn triggers(&self, t: f64, y: &[f64]) -> Result<Vec<bool>, EvalError> {
        let frame = self.frame(t, y)?;
        self.model
            .events
            .iter()
            .map(|e| frame.is_true(&e.trigger))
            .collect()
    }

    pub(crate) fn delay(&self, index: usize, t: f64, y: &[f64]) -> Result<f64, EvalError> {
        match self.model.events.get(index).and_then(|e| e.delay.as_ref()) {
            Some(delay) => self.frame(t, y)?.eval(delay),
            None => Ok(0.0),
        }
    }

    /// Values of an event's assignments, in declaration order
    pub(crate) fn event_values(&self, index: usize, t: f64, y: &[f64]) -> Result<Vec<f64>, EvalError> {
        let Some(event) = self.model.events.get(index) else {
            return Ok(Vec::new());
        };
        let frame = self.frame(t, y)?;
        event
            .assignments
            .iter()
            .map(|a| frame.eval(&a.expr))
            .collect()
    }

    pub(crate) fn apply_event(&self, index: usize, values: &[f64], y: &mut [f64]) {
        if let Some(event) = self.model.events.get(index) {
            for (assignment, value) in event.assignments.iter().zip(values) {
                y[assignment.index] = *value;
            }
        }
    }
}
