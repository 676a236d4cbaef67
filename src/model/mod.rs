//! Reaction-network model description
//!
//! A [`Model`] is the immutable input of the compiler: species, parameters,
//! compartments, reactions, rules, events, user functions and initial
//! assignments, all kept in declaration order. It is read from JSON:
//!
//! ```ignore
//! use sbmlgen::model::Model;
//!
//! let model = Model::from_str(r#"{
//!     "id": "decay",
//!     "species": { "A": { "initialAmount": 10 } },
//!     "parameters": { "k": { "value": 0.5 } },
//!     "reactions": {
//!         "R1": { "reactants": [{ "species": "A" }], "kineticLaw": "k * A" }
//!     }
//! }"#)?;
//! assert_eq!(model.dynamic_species(), vec!["A"]);
//! ```
//!
//! Expressions may be infix text (`"k * A"`), MathML content markup given as
//! text, or the same markup as a JSON tree (see [`MathNode`](crate::expr::MathNode)).

mod document;
mod types;
mod validation;

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use ordermap::OrderMap;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, ValidationError};
use document::ModelDocument;
use crate::expr::inline::FunctionDef;
use crate::expr::{Expr, Scope, SymbolRole, SymbolTable};

pub use types::*;
pub use validation::{ValidatedModel, Validator};
pub(crate) use validation::event_context;

/// A reaction-network model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ModelDocument")]
pub struct Model {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub species: OrderMap<String, Species>,

    #[serde(default)]
    pub parameters: OrderMap<String, Parameter>,

    #[serde(default)]
    pub compartments: OrderMap<String, Compartment>,

    #[serde(default)]
    pub reactions: OrderMap<String, Reaction>,

    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub events: Vec<Event>,

    #[serde(default)]
    pub functions: OrderMap<String, FunctionDefinition>,

    /// Values computed once at `t = 0`, keyed by target
    #[serde(default)]
    pub initial_assignments: OrderMap<String, MathSource>,
}

impl Model {
    /// Parse a model from JSON text
    ///
    /// An identifier repeated within one section is a
    /// [`ValidationError::DuplicateIdentifier`].
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(json: &str) -> Result<Self, CompileError> {
        let document: ModelDocument = serde_json::from_str(json)?;
        Ok(Model::try_from(document)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, CompileError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, CompileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Stable hash of the model content, used as a memoization key
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        // serialization of these types cannot fail; an empty key still hashes the id
        serde_json::to_string(self)
            .unwrap_or_else(|_| self.id.clone())
            .hash(&mut hasher);
        hasher.finish()
    }

    /// Targets of assignment rules, in rule order
    pub fn assignment_targets(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter_map(|r| match r {
                Rule::Assignment { variable, .. } => Some(variable.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the species gets a state slot
    pub fn is_dynamic_species(&self, id: &str) -> bool {
        match self.species.get(id) {
            Some(s) => {
                !s.boundary_condition
                    && !s.constant
                    && !self.assignment_targets().contains(&id)
            }
            None => false,
        }
    }

    /// Species with a state slot, in declaration order
    pub fn dynamic_species(&self) -> Vec<&str> {
        let assigned: HashSet<&str> = self.assignment_targets().into_iter().collect();
        self.species
            .iter()
            .filter(|(id, s)| {
                !s.boundary_condition && !s.constant && !assigned.contains(id.as_str())
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Bind every model identifier to its role
    pub fn symbol_table(&self) -> Result<SymbolTable, ValidationError> {
        let mut table = SymbolTable::new();
        let dynamic = self.dynamic_species();
        let mut declare = |name: &str, role: SymbolRole| {
            table
                .insert(name, role)
                .map_err(|existing| ValidationError::DuplicateIdentifier {
                    name: name.to_string(),
                    first: existing.kind().to_string(),
                    second: role.kind().to_string(),
                })
        };
        for id in self.species.keys() {
            let index = dynamic.iter().position(|d| d == id);
            declare(id, SymbolRole::Species { index })?;
        }
        for id in self.compartments.keys() {
            declare(id, SymbolRole::Compartment)?;
        }
        for id in self.parameters.keys() {
            declare(id, SymbolRole::Parameter)?;
        }
        Ok(table)
    }

    /// Parsing scope over `table` with every user function declared
    pub fn scope<'a>(&self, table: &'a SymbolTable) -> Result<Scope<'a>, CompileError> {
        let mut scope = Scope::new(table);
        for (name, def) in &self.functions {
            let arity = def
                .arity()
                .map_err(|e| CompileError::parse(format!("function '{name}'"), e))?;
            scope = scope.with_function(name.clone(), arity);
        }
        Ok(scope)
    }

    /// Parse `source`, naming `context` in any error
    pub fn parse_math(
        &self,
        source: &MathSource,
        scope: &Scope<'_>,
        context: &str,
    ) -> Result<Expr, CompileError> {
        source
            .to_expr(scope)
            .map_err(|e| CompileError::parse(context, e))
    }

    /// Parsed user functions, ready for inlining
    pub fn function_defs(&self, table: &SymbolTable) -> Result<Vec<FunctionDef>, CompileError> {
        let scope = self.scope(table)?;
        self.functions
            .iter()
            .map(|(name, def)| {
                let context = format!("function '{name}'");
                let (params, body) = def
                    .signature()
                    .map_err(|e| CompileError::parse(&context, e))?;
                let local = scope.clone().with_locals(params.iter().cloned());
                let body = self.parse_math(&body, &local, &context)?;
                Ok(FunctionDef {
                    name: name.clone(),
                    params,
                    body,
                })
            })
            .collect()
    }

    /// Default value of a parameter, compartment or species
    pub fn default_value(&self, name: &str) -> Option<f64> {
        if let Some(p) = self.parameters.get(name) {
            return Some(p.value);
        }
        if let Some(c) = self.compartments.get(name) {
            return Some(c.size);
        }
        self.species.get(name).map(|s| s.initial_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECAY: &str = r#"{
        "id": "decay",
        "species": {
            "A": { "compartment": "c", "initialAmount": 10 },
            "B": { "compartment": "c", "initialAmount": 0 },
            "Src": { "compartment": "c", "initialAmount": 1, "boundaryCondition": true },
            "Tot": { "compartment": "c" }
        },
        "compartments": { "c": { "size": 2 } },
        "parameters": { "k": { "value": 0.5 } },
        "reactions": {
            "R1": {
                "reactants": [{ "species": "A" }],
                "products": [{ "species": "B" }],
                "kineticLaw": "k * A"
            }
        },
        "rules": [{ "type": "assignment", "variable": "Tot", "math": "A + B" }]
    }"#;

    #[test]
    fn test_dynamic_species_exclude_boundary_and_rule_targets() {
        let model = Model::from_str(DECAY).unwrap();
        assert_eq!(model.dynamic_species(), vec!["A", "B"]);
        assert!(model.is_dynamic_species("A"));
        assert!(!model.is_dynamic_species("Src"));
        assert!(!model.is_dynamic_species("Tot"));
    }

    #[test]
    fn test_symbol_table_indices() {
        let model = Model::from_str(DECAY).unwrap();
        let table = model.symbol_table().unwrap();
        assert_eq!(table.state_index("B"), Some(1));
        assert_eq!(table.state_index("Tot"), None);
        assert_eq!(table.get("k"), Some(SymbolRole::Parameter));
        assert_eq!(table.get("c"), Some(SymbolRole::Compartment));
    }

    #[test]
    fn test_duplicate_identifier() {
        let json = r#"{
            "id": "dup",
            "species": { "k": {} },
            "parameters": { "k": { "value": 1 } }
        }"#;
        let err = Model::from_str(json).unwrap().symbol_table().unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateIdentifier { ref name, .. } if name == "k"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = Model::from_str(DECAY).unwrap();
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        if let Some(p) = b.parameters.get_mut("k") {
            p.value = 0.6;
        }
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_json_roundtrip_keeps_order() {
        let model = Model::from_str(DECAY).unwrap();
        let again = Model::from_str(&model.to_json().unwrap()).unwrap();
        assert_eq!(model, again);
        let ids: Vec<&str> = again.species.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["A", "B", "Src", "Tot"]);
    }
}
