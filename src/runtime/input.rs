use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SimulationError;
use crate::symbolic::{CompiledModel, DEFAULT_FINAL_TIME};

/// Values, doses and horizon of one simulation
///
/// Serialized exactly like the emitted `SimulationInput`: every model input
/// is a top-level field next to `doses` and `final_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInput {
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
    /// `(time, amount)` pairs, in any order
    pub doses: Vec<(f64, f64)>,
    pub final_time: f64,
}

impl SimulationInput {
    /// An input with no values and no doses
    pub fn new(final_time: f64) -> Self {
        Self {
            values: BTreeMap::new(),
            doses: Vec::new(),
            final_time,
        }
    }

    /// Every input at its declared value, no doses, [`DEFAULT_FINAL_TIME`]
    pub fn defaults(model: &CompiledModel) -> Self {
        Self {
            values: model
                .inputs
                .iter()
                .map(|i| (i.name.clone(), i.default))
                .collect(),
            doses: Vec::new(),
            final_time: DEFAULT_FINAL_TIME,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_dose(mut self, time: f64, amount: f64) -> Self {
        self.doses.push((time, amount));
        self
    }

    pub fn with_final_time(mut self, final_time: f64) -> Self {
        self.final_time = final_time;
        self
    }

    /// Input values keyed by name; every model input must be present and
    /// nothing else may be
    pub(crate) fn resolve(
        &self,
        model: &CompiledModel,
    ) -> Result<HashMap<String, f64>, SimulationError> {
        if let Some(unknown) = self
            .values
            .keys()
            .find(|name| !model.inputs.iter().any(|i| &i.name == *name))
        {
            return Err(SimulationError::InvalidInput(format!(
                "unknown field `{unknown}`"
            )));
        }
        model
            .inputs
            .iter()
            .map(|input| match self.values.get(&input.name) {
                Some(value) => Ok((input.name.clone(), *value)),
                None => Err(SimulationError::InvalidInput(format!(
                    "missing field `{}`",
                    input.name
                ))),
            })
            .collect()
    }

    /// Doses before `final_time`, sorted by time
    pub(crate) fn schedule(&self) -> Result<Vec<(f64, f64)>, SimulationError> {
        let final_time = self.final_time;
        if !(final_time.is_finite() && final_time > 0.0) {
            return Err(SimulationError::InvalidInput(format!(
                "final_time must be positive, got {final_time}"
            )));
        }
        let mut doses = Vec::with_capacity(self.doses.len());
        for &(time, amount) in &self.doses {
            if !(time.is_finite() && time >= 0.0 && amount.is_finite()) {
                return Err(SimulationError::InvalidInput(format!(
                    "invalid dose of {amount} at t = {time}"
                )));
            }
            if time < final_time {
                doses.push((time, amount));
            }
        }
        if doses.len() < self.doses.len() {
            debug!(
                ignored = self.doses.len() - doses.len(),
                final_time, "ignoring doses at or after final_time"
            );
        }
        doses.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(doses)
    }
}

/// Sampled trajectories of the state species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutput {
    /// Strictly increasing sample times, starting at 0
    pub time: Vec<f64>,
    /// One series per state species, aligned with `time`
    pub species: BTreeMap<String, Vec<f64>>,
}

impl SimulationOutput {
    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn series(&self, species: &str) -> Option<&[f64]> {
        self.species.get(species).map(Vec::as_slice)
    }

    /// Last recorded amount of `species`
    pub fn last(&self, species: &str) -> Option<f64> {
        self.series(species).and_then(|s| s.last().copied())
    }

    /// Amount of `species` at the last sample not after `time`
    pub fn at(&self, species: &str, time: f64) -> Option<f64> {
        let count = self.time.partition_point(|&t| t <= time);
        let index = count.checked_sub(1)?;
        self.series(species).and_then(|s| s.get(index).copied())
    }
}
