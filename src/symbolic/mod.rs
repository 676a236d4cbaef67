//! Symbolic compilation of a model
//!
//! [`CompiledModel::compile`] parses every expression of a [`Model`], expands
//! user functions, orders the assignment rules, builds the ODE system and its
//! sparse Jacobian. The result is the input of code generation and of the
//! reference runtime.

pub mod cse;
pub mod diff;
pub mod jacobian;
pub mod ode;
pub mod rules;
pub mod simplify;

use std::collections::HashSet;

use ordermap::OrderMap;
use serde::Serialize;
use tracing::info;

use crate::config::ConversionOptions;
use crate::error::CompileError;
use crate::expr::{Expr, FunctionInliner, Scope, SymbolTable, TIME};
use crate::model::{MathSource, Model, Rule};

pub use cse::{eliminate_common_subexpressions, optimize_combined, OptimizationStats, OptimizedSystem};
pub use diff::differentiate;
pub use jacobian::{compute_jacobian, compute_sparse_jacobian, JacobianEntry, SparseJacobian};
pub use ode::OdeSystem;
pub use rules::{order_rules, Assignment, RuleSet};
pub use simplify::simplify;

/// Simulation horizon offered by [`CompiledModel::default_input`]
pub const DEFAULT_FINAL_TIME: f64 = 24.0;

/// Input fields that are not model values
const RESERVED_INPUTS: [&str; 2] = ["doses", "final_time"];

/// What a run-time input value initializes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Parameter,
    Compartment,
    /// Initial amount of a species
    Species,
}

/// A value supplied by the caller at run time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputValue {
    pub name: String,
    pub kind: InputKind,
    /// Value declared in the model
    pub default: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compartment: Option<String>,
    pub initial_amount: f64,
    /// Slot in the state vector, for dynamic species
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_index: Option<usize>,
    pub boundary_condition: bool,
}

/// Assignment applied to a state slot when an event fires
#[derive(Debug, Clone, PartialEq)]
pub struct EventAssignmentTarget {
    pub index: usize,
    pub species: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEvent {
    pub label: String,
    pub trigger: Expr,
    pub delay: Option<Expr>,
    pub assignments: Vec<EventAssignmentTarget>,
    pub use_values_from_trigger_time: bool,
    pub initial_value: bool,
}

/// A model lowered to expression trees
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub id: String,
    /// Display name for emitted metadata
    pub name: String,
    pub symbols: SymbolTable,
    pub species: Vec<SpeciesInfo>,
    /// Run-time inputs: parameters, compartments, then species initial amounts
    pub inputs: Vec<InputValue>,
    pub rules: RuleSet,
    /// Initial amounts computed from other values, in declaration order
    pub initial_assignments: Vec<Assignment>,
    pub ode: OdeSystem,
    pub jacobian: SparseJacobian,
    pub events: Vec<CompiledEvent>,
    /// State slot receiving doses
    pub dose_index: Option<usize>,
}

impl CompiledModel {
    /// Lower `model` to the symbolic form
    pub fn compile(model: &Model, options: &ConversionOptions) -> Result<Self, CompileError> {
        let symbols = model.symbol_table()?;
        let scope = model.scope(&symbols)?;
        let inliner = FunctionInliner::new(model.function_defs(&symbols)?)
            .with_max_depth(options.max_inline_depth);
        let lower = Lowering {
            model,
            scope: &scope,
            inliner: &inliner,
        };

        let rates = lower.kinetic_laws()?;
        let (assignments, rate_rules) = lower.rules()?;
        let initial = lower.initial_assignments()?;

        // initial assignments to anything without a state act as constant rules
        let mut species_initial = Vec::new();
        let mut rule_inputs = assignments;
        let mut fixed_once = HashSet::new();
        for assignment in initial {
            if model.is_dynamic_species(&assignment.target) {
                species_initial.push(assignment);
            } else {
                fixed_once.insert(assignment.target.clone());
                rule_inputs.push(assignment);
            }
        }
        let rules = RuleSet::build(rule_inputs, |s| {
            s == TIME || symbols.state_index(s).is_some()
        })?;
        if let Some(target) = rules.dynamic_targets().find(|t| fixed_once.contains(*t)) {
            return Err(CompileError::unsupported(
                format!("initial assignment for '{target}'"),
                "a parameter set once at t = 0 cannot depend on the state or on time",
            ));
        }

        let ode = OdeSystem::build(model, &rates, &rate_rules)?;
        let jacobian = compute_sparse_jacobian(&ode, &rules.dynamic_rules)?;
        let events = lower.events(&ode)?;
        let dose_index = dose_index(model, &ode, options)?;

        let computed: HashSet<&str> = rules
            .static_rules
            .iter()
            .chain(&rules.dynamic_rules)
            .chain(&species_initial)
            .map(|a| a.target.as_str())
            .collect();
        let inputs = inputs(model, &computed);
        if let Some(clash) = inputs.iter().find(|i| RESERVED_INPUTS.contains(&i.name.as_str())) {
            return Err(CompileError::unsupported(
                format!("input '{}'", clash.name),
                "the name is taken by a field of the simulation input",
            ));
        }
        let species = model
            .species
            .iter()
            .map(|(id, s)| SpeciesInfo {
                id: id.clone(),
                name: s.name.clone(),
                compartment: s.compartment.clone(),
                initial_amount: s.initial_amount,
                state_index: ode.index_of(id),
                boundary_condition: s.boundary_condition,
            })
            .collect();

        info!(
            model = %model.id,
            states = ode.len(),
            reactions = model.reactions.len(),
            static_rules = rules.static_rules.len(),
            dynamic_rules = rules.dynamic_rules.len(),
            events = events.len(),
            "compiled model"
        );

        let name = options
            .model_name
            .clone()
            .or_else(|| model.name.clone())
            .unwrap_or_else(|| model.id.clone());
        Ok(Self {
            id: model.id.clone(),
            name,
            symbols,
            species,
            inputs,
            rules,
            initial_assignments: species_initial,
            ode,
            jacobian,
            events,
            dose_index,
        })
    }

    /// Identifiers a temporary must never take
    pub fn reserved_names(&self) -> HashSet<String> {
        self.symbols.iter().map(|(name, _)| name.to_string()).collect()
    }

    /// Simulation input holding every default value, no doses and
    /// [`DEFAULT_FINAL_TIME`]
    pub fn default_input(&self) -> serde_json::Value {
        let mut values = serde_json::Map::new();
        for input in &self.inputs {
            values.insert(input.name.clone(), serde_json::json!(input.default));
        }
        values.insert("doses".to_string(), serde_json::json!([]));
        values.insert("final_time".to_string(), serde_json::json!(DEFAULT_FINAL_TIME));
        serde_json::Value::Object(values)
    }

    /// Id of the dosed species
    pub fn dose_species(&self) -> Option<&str> {
        self.dose_index
            .and_then(|i| self.ode.states.get(i))
            .map(String::as_str)
    }
}

/// Parses and inlines the expressions of one model
struct Lowering<'m, 's> {
    model: &'m Model,
    scope: &'s Scope<'s>,
    inliner: &'s FunctionInliner,
}

impl Lowering<'_, '_> {
    fn lower(&self, source: &MathSource, scope: &Scope<'_>, context: &str) -> Result<Expr, CompileError> {
        let parsed = self.model.parse_math(source, scope, context)?;
        self.inliner.inline(&parsed)
    }

    /// Kinetic laws with local parameters replaced by their values
    fn kinetic_laws(&self) -> Result<OrderMap<String, Expr>, CompileError> {
        let mut rates = OrderMap::new();
        for (id, reaction) in &self.model.reactions {
            let scope = self
                .scope
                .clone()
                .with_locals(reaction.local_parameters.keys().cloned());
            let law = self.lower(&reaction.kinetic_law, &scope, &format!("reaction '{id}'"))?;
            let locals = reaction
                .local_parameters
                .iter()
                .map(|(name, value)| (name.clone(), Expr::num(*value)))
                .collect();
            rates.insert(id.clone(), law.substitute(&locals));
        }
        Ok(rates)
    }

    /// Assignment rules and rate rules, in declaration order
    fn rules(&self) -> Result<(Vec<Assignment>, Vec<Assignment>), CompileError> {
        let mut assignments = Vec::new();
        let mut rates = Vec::new();
        for rule in &self.model.rules {
            match rule {
                Rule::Assignment { variable, math } => {
                    let context = format!("assignment rule for '{variable}'");
                    assignments.push(Assignment::new(
                        variable,
                        self.lower(math, self.scope, &context)?,
                    ));
                }
                Rule::Rate { variable, math } => {
                    let context = format!("rate rule for '{variable}'");
                    rates.push(Assignment::new(variable, self.lower(math, self.scope, &context)?));
                }
                Rule::Algebraic { math } => {
                    return Err(CompileError::unsupported(
                        "algebraic rule",
                        format!("cannot solve 0 = {math}"),
                    ));
                }
            }
        }
        Ok((assignments, rates))
    }

    fn initial_assignments(&self) -> Result<Vec<Assignment>, CompileError> {
        self.model
            .initial_assignments
            .iter()
            .map(|(target, math)| {
                let context = format!("initial assignment for '{target}'");
                Ok(Assignment::new(target, self.lower(math, self.scope, &context)?))
            })
            .collect()
    }

    fn events(&self, ode: &OdeSystem) -> Result<Vec<CompiledEvent>, CompileError> {
        let mut events = Vec::with_capacity(self.model.events.len());
        for (i, event) in self.model.events.iter().enumerate() {
            let label = crate::model::event_context(event.id.as_deref(), i);
            let trigger = self.lower(&event.trigger, self.scope, &format!("trigger of {label}"))?;
            let delay = event
                .delay
                .as_ref()
                .map(|d| self.lower(d, self.scope, &format!("delay of {label}")))
                .transpose()?;
            let mut assignments = Vec::with_capacity(event.assignments.len());
            for assignment in &event.assignments {
                let context = format!("assignment to '{}' in {label}", assignment.variable);
                let Some(index) = ode.index_of(&assignment.variable) else {
                    return Err(CompileError::unsupported(
                        context,
                        "event assignments may only target species with a state",
                    ));
                };
                assignments.push(EventAssignmentTarget {
                    index,
                    species: assignment.variable.clone(),
                    expr: self.lower(&assignment.math, self.scope, &context)?,
                });
            }
            events.push(CompiledEvent {
                label,
                trigger,
                delay,
                assignments,
                use_values_from_trigger_time: event.use_values_from_trigger_time,
                initial_value: event.initial_value,
            });
        }
        Ok(events)
    }
}

fn dose_index(
    model: &Model,
    ode: &OdeSystem,
    options: &ConversionOptions,
) -> Result<Option<usize>, CompileError> {
    match &options.dose_species {
        Some(species) => match ode.index_of(species) {
            Some(index) => Ok(Some(index)),
            None if model.species.contains_key(species) => Err(CompileError::unsupported(
                "dose species",
                format!("'{species}' has no state and cannot receive doses"),
            )),
            None => Err(CompileError::unsupported(
                "dose species",
                format!("'{species}' is not a species of the model"),
            )),
        },
        None => Ok(if ode.is_empty() { None } else { Some(0) }),
    }
}

/// Values the caller supplies: everything not computed by a rule or initial assignment
fn inputs(model: &Model, computed: &HashSet<&str>) -> Vec<InputValue> {
    let parameters = model
        .parameters
        .iter()
        .map(|(id, p)| (id, InputKind::Parameter, p.value));
    let compartments = model
        .compartments
        .iter()
        .map(|(id, c)| (id, InputKind::Compartment, c.size));
    let species = model
        .species
        .iter()
        .map(|(id, s)| (id, InputKind::Species, s.initial_amount));
    parameters
        .chain(compartments)
        .chain(species)
        .filter(|(id, _, _)| !computed.contains(id.as_str()))
        .map(|(id, kind, default)| InputValue {
            name: id.clone(),
            kind,
            default,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "id": "two_pool",
        "species": {
            "A": { "compartment": "c", "initialAmount": 10 },
            "B": { "compartment": "c" },
            "Total": { "compartment": "c" }
        },
        "compartments": { "c": { "size": 2 } },
        "parameters": {
            "k": { "value": 0.5 },
            "kb": { "value": 0, "constant": false },
            "Vd": { "value": 0, "constant": false }
        },
        "functions": { "conc": { "arguments": ["q", "v"], "math": "q / v" } },
        "reactions": {
            "R1": {
                "reactants": [{ "species": "A" }],
                "products": [{ "species": "B" }],
                "kineticLaw": "k * conc(A, Vd) * scale",
                "localParameters": { "scale": 2 }
            },
            "R2": { "reactants": [{ "species": "B" }], "kineticLaw": "kb * B" }
        },
        "rules": [
            { "type": "assignment", "variable": "Total", "math": "A + B" },
            { "type": "assignment", "variable": "Vd", "math": "c * 3" }
        ],
        "initialAssignments": { "kb": "k / 10", "B": "A / 2" },
        "events": [
            { "id": "refill", "trigger": "A < 1", "assignments": [{ "variable": "A", "math": "10" }] }
        ]
    }"#;

    #[test]
    fn test_compile_lowers_everything() {
        let model = Model::from_str(MODEL).unwrap();
        let compiled = CompiledModel::compile(&model, &ConversionOptions::default()).unwrap();
        assert_eq!(compiled.ode.states, vec!["A", "B"]);

        let statics: Vec<&str> = compiled.rules.static_rules.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(statics, vec!["Vd", "kb"]);
        let dynamic: Vec<&str> = compiled.rules.dynamic_targets().collect();
        assert_eq!(dynamic, vec!["Total"]);

        // locals are literals, functions are expanded
        let rate = compiled.ode.derivative("B").unwrap();
        assert!(rate.called_functions().is_empty());
        assert!(!rate.contains_symbol("scale"));

        let inputs: Vec<&str> = compiled.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(inputs, vec!["k", "c", "A"]);
        assert_eq!(compiled.initial_assignments.len(), 1);
        assert_eq!(compiled.events[0].assignments[0].index, 0);
        assert_eq!(compiled.dose_species(), Some("A"));
    }

    #[test]
    fn test_dose_species_must_have_state() {
        let model = Model::from_str(MODEL).unwrap();
        let options = ConversionOptions::default().with_dose_species("Total");
        assert!(matches!(
            CompiledModel::compile(&model, &options),
            Err(CompileError::UnsupportedConstruct { .. })
        ));
    }

    #[test]
    fn test_algebraic_rules_are_rejected() {
        let mut model = Model::from_str(MODEL).unwrap();
        model.rules.push(Rule::Algebraic {
            math: MathSource::from("A - B"),
        });
        let err = CompiledModel::compile(&model, &ConversionOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
    }
}
