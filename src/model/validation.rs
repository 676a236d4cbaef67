//! Structural validation of models

use std::collections::HashSet;

use tracing::warn;

use crate::error::ValidationError;
use crate::expr::{Scope, SymbolRole, SymbolTable};
use crate::model::{MathSource, Model, Rule};

/// A validated model
///
/// This wrapper guarantees that the contained model has passed every
/// structural check and that all of its expressions parse.
#[derive(Debug, Clone)]
pub struct ValidatedModel {
    model: Model,
    warnings: Vec<String>,
}

impl ValidatedModel {
    /// Get the inner model
    pub fn inner(&self) -> &Model {
        &self.model
    }

    /// Consume the wrapper and return the inner model
    pub fn into_inner(self) -> Model {
        self.model
    }

    /// Non-fatal findings, in discovery order
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Validator for models
pub struct Validator {
    /// Whether to treat warnings as errors
    strict: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Create a new validator
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Create a strict validator that treats warnings as errors
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Validate a model
    pub fn validate(&self, model: &Model) -> Result<ValidatedModel, ValidationError> {
        let mut warnings = Vec::new();

        // 1. Identifiers are unique
        let table = model.symbol_table()?;
        self.validate_functions(model, &table)?;

        // 2. Entity references
        self.validate_species(model)?;
        self.validate_reactions(model, &table, &mut warnings)?;

        // 3. Rule, event and initial-assignment targets
        self.validate_rules(model, &table, &mut warnings)?;
        self.validate_events(model, &table)?;
        self.validate_initial_assignments(model, &table)?;

        // 4. Every expression parses
        self.validate_expressions(model, &table)?;

        Ok(ValidatedModel {
            model: model.clone(),
            warnings,
        })
    }

    fn warn(&self, warnings: &mut Vec<String>, message: String) -> Result<(), ValidationError> {
        if self.strict {
            return Err(ValidationError::Strict(message));
        }
        warn!("{message}");
        warnings.push(message);
        Ok(())
    }

    fn validate_functions(&self, model: &Model, table: &SymbolTable) -> Result<(), ValidationError> {
        for name in model.functions.keys() {
            if let Some(role) = table.get(name) {
                return Err(ValidationError::DuplicateIdentifier {
                    name: name.clone(),
                    first: role.kind().to_string(),
                    second: "function".to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_species(&self, model: &Model) -> Result<(), ValidationError> {
        for (id, species) in &model.species {
            if let Some(compartment) = &species.compartment {
                if !model.compartments.contains_key(compartment) {
                    return Err(ValidationError::dangling(
                        compartment,
                        "compartment",
                        format!("species '{id}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_reactions(
        &self,
        model: &Model,
        table: &SymbolTable,
        warnings: &mut Vec<String>,
    ) -> Result<(), ValidationError> {
        for (id, reaction) in &model.reactions {
            let context = format!("reaction '{id}'");
            for participant in reaction.reactants.iter().chain(&reaction.products) {
                if !model.species.contains_key(&participant.species) {
                    return Err(ValidationError::dangling(
                        &participant.species,
                        "species",
                        &context,
                    ));
                }
                if participant.stoichiometry == 0.0 || !participant.stoichiometry.is_finite() {
                    return Err(ValidationError::ZeroStoichiometry {
                        reaction: id.clone(),
                        species: participant.species.clone(),
                    });
                }
            }
            for modifier in &reaction.modifiers {
                if !model.species.contains_key(modifier) {
                    return Err(ValidationError::dangling(modifier, "species", &context));
                }
            }
            for local in reaction.local_parameters.keys() {
                if table.contains(local) {
                    self.warn(
                        warnings,
                        format!("local parameter '{local}' of {context} shadows a model symbol"),
                    )?;
                }
            }
            if reaction.reactants.is_empty() && reaction.products.is_empty() {
                self.warn(warnings, format!("{context} has no reactants or products"))?;
            }
        }
        Ok(())
    }

    fn validate_rules(
        &self,
        model: &Model,
        table: &SymbolTable,
        warnings: &mut Vec<String>,
    ) -> Result<(), ValidationError> {
        let mut assigned = HashSet::new();
        for rule in &model.rules {
            let Some(variable) = rule.variable() else {
                continue;
            };
            let context = rule.kind();
            match table.get(variable) {
                None | Some(SymbolRole::Time) => {
                    return Err(ValidationError::dangling(variable, "symbol", context));
                }
                Some(SymbolRole::Parameter) => {
                    if model.parameters.get(variable).is_some_and(|p| p.constant) {
                        self.warn(
                            warnings,
                            format!("{context} targets parameter '{variable}' declared constant"),
                        )?;
                    }
                }
                Some(SymbolRole::Species { .. }) => {
                    if matches!(rule, Rule::Rate { .. })
                        && model
                            .species
                            .get(variable)
                            .is_some_and(|s| s.boundary_condition || s.constant)
                    {
                        self.warn(
                            warnings,
                            format!("{context} on boundary or constant species '{variable}' has no effect"),
                        )?;
                    }
                }
                Some(_) => {}
            }
            if !assigned.insert(variable) {
                return Err(ValidationError::invalid_target(
                    variable,
                    context,
                    "already determined by another rule",
                ));
            }
        }
        Ok(())
    }

    fn validate_events(&self, model: &Model, table: &SymbolTable) -> Result<(), ValidationError> {
        for (i, event) in model.events.iter().enumerate() {
            let context = event_context(event.id.as_deref(), i);
            for assignment in &event.assignments {
                if !table.contains(&assignment.variable) {
                    return Err(ValidationError::dangling(
                        &assignment.variable,
                        "symbol",
                        &context,
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_initial_assignments(
        &self,
        model: &Model,
        table: &SymbolTable,
    ) -> Result<(), ValidationError> {
        let rule_targets: HashSet<&str> = model.assignment_targets().into_iter().collect();
        for target in model.initial_assignments.keys() {
            if !table.contains(target) || target == crate::expr::TIME {
                return Err(ValidationError::dangling(target, "symbol", "initial assignment"));
            }
            if rule_targets.contains(target.as_str()) {
                return Err(ValidationError::invalid_target(
                    target,
                    "initial assignment",
                    "the value is fixed by an assignment rule",
                ));
            }
        }
        Ok(())
    }

    fn validate_expressions(&self, model: &Model, table: &SymbolTable) -> Result<(), ValidationError> {
        let scope = model.scope(table).map_err(|e| match e {
            crate::error::CompileError::Parse { context, source } => {
                ValidationError::InvalidExpression { context, source }
            }
            other => ValidationError::Strict(other.to_string()),
        })?;

        for (name, def) in &model.functions {
            let context = format!("function '{name}'");
            let (params, body) = def
                .signature()
                .map_err(|source| invalid(&context, source))?;
            check(&body, &scope.clone().with_locals(params), &context)?;
        }
        for (id, reaction) in &model.reactions {
            let local = scope
                .clone()
                .with_locals(reaction.local_parameters.keys().cloned());
            check(&reaction.kinetic_law, &local, &format!("reaction '{id}'"))?;
        }
        for (i, rule) in model.rules.iter().enumerate() {
            let context = match rule.variable() {
                Some(v) => format!("{} for '{v}'", rule.kind()),
                None => format!("{} #{i}", rule.kind()),
            };
            check(rule.math(), &scope, &context)?;
        }
        for (i, event) in model.events.iter().enumerate() {
            let context = event_context(event.id.as_deref(), i);
            check(&event.trigger, &scope, &format!("trigger of {context}"))?;
            if let Some(delay) = &event.delay {
                check(delay, &scope, &format!("delay of {context}"))?;
            }
            for assignment in &event.assignments {
                check(
                    &assignment.math,
                    &scope,
                    &format!("assignment to '{}' in {context}", assignment.variable),
                )?;
            }
        }
        for (target, math) in &model.initial_assignments {
            check(math, &scope, &format!("initial assignment for '{target}'"))?;
        }
        Ok(())
    }
}

pub(crate) fn event_context(id: Option<&str>, index: usize) -> String {
    match id {
        Some(id) => format!("event '{id}'"),
        None => format!("event #{index}"),
    }
}

fn invalid(context: &str, source: crate::error::ParseError) -> ValidationError {
    ValidationError::InvalidExpression {
        context: context.to_string(),
        source,
    }
}

fn check(math: &MathSource, scope: &Scope<'_>, context: &str) -> Result<(), ValidationError> {
    math.to_expr(scope)
        .map(|_| ())
        .map_err(|source| invalid(context, source))
}
