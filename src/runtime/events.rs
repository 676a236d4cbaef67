use tracing::debug;

use crate::error::EvalError;
use crate::runtime::frame::Evaluator;

/// A delayed event waiting for its execution time
#[derive(Debug, Clone)]
struct Pending {
    time: f64,
    index: usize,
    /// Assignment values captured when the trigger fired
    values: Option<Vec<f64>>,
}

/// Trigger history and delayed events of one simulation
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    previous: Vec<bool>,
    pending: Vec<Pending>,
}

impl EventQueue {
    pub(crate) fn new(evaluator: &Evaluator<'_>) -> Self {
        Self {
            previous: evaluator
                .model()
                .events
                .iter()
                .map(|e| e.initial_value)
                .collect(),
            pending: Vec::new(),
        }
    }

    /// Execute due delayed events, then fire every event whose trigger went
    /// from false to true; returns whether `y` changed
    pub(crate) fn process(
        &mut self,
        evaluator: &Evaluator<'_>,
        t: f64,
        y: &mut [f64],
    ) -> Result<bool, EvalError> {
        if self.previous.is_empty() {
            return Ok(false);
        }
        let mut changed = false;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].time <= t {
                let due = self.pending.remove(i);
                let values = match due.values {
                    Some(values) => values,
                    None => evaluator.event_values(due.index, t, y)?,
                };
                evaluator.apply_event(due.index, &values, y);
                debug!(event = due.index, t, "executed delayed event");
                changed = true;
            } else {
                i += 1;
            }
        }

        let now = evaluator.triggers(t, y)?;
        let events = &evaluator.model().events;
        for (k, (&fired, &before)) in now.iter().zip(&self.previous).enumerate() {
            if !fired || before {
                continue;
            }
            let delay = evaluator.delay(k, t, y)?;
            if delay > 0.0 {
                let values = if events[k].use_values_from_trigger_time {
                    Some(evaluator.event_values(k, t, y)?)
                } else {
                    None
                };
                debug!(event = %events[k].label, t, delay, "scheduled event");
                self.pending.push(Pending {
                    time: t + delay,
                    index: k,
                    values,
                });
            } else {
                let values = evaluator.event_values(k, t, y)?;
                evaluator.apply_event(k, &values, y);
                debug!(event = %events[k].label, t, "fired event");
                changed = true;
            }
        }
        self.previous = now;
        Ok(changed)
    }
}
