//! Serde types for the JSON model description

use ordermap::OrderMap;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::expr::{parse, Expr, MathNode, Scope};

// ═══════════════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════════════

/// Expression as written in the model: infix text, MathML text, or a markup tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MathSource {
    Number(f64),
    Text(String),
    Tree(MathNode),
}

impl MathSource {
    pub fn is_markup(&self) -> bool {
        match self {
            MathSource::Number(_) => false,
            MathSource::Text(s) => s.trim_start().starts_with('<'),
            MathSource::Tree(_) => true,
        }
    }

    /// Markup tree of this source, reading MathML text if needed
    fn as_node(&self) -> Result<Option<MathNode>, ParseError> {
        match self {
            MathSource::Text(s) if self.is_markup() => MathNode::from_xml(s).map(Some),
            MathSource::Number(_) | MathSource::Text(_) => Ok(None),
            MathSource::Tree(node) => Ok(Some(node.clone())),
        }
    }

    /// Parse against `scope`
    pub fn to_expr(&self, scope: &Scope<'_>) -> Result<Expr, ParseError> {
        match (self, self.as_node()?) {
            (_, Some(node)) => node.to_expr(scope),
            (MathSource::Number(v), None) => Ok(Expr::num(*v)),
            (MathSource::Text(text), None) => parse(text, scope),
            (MathSource::Tree(node), None) => node.to_expr(scope),
        }
    }
}

impl From<&str> for MathSource {
    fn from(s: &str) -> Self {
        MathSource::Text(s.to_string())
    }
}

impl std::fmt::Display for MathSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MathSource::Number(v) => write!(f, "{v}"),
            MathSource::Text(s) => write!(f, "{s}"),
            MathSource::Tree(node) => write!(f, "{node:?}"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entities
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Species {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment: Option<String>,

    /// Initial amount; `initialConcentration` is read as the same quantity
    #[serde(default, alias = "initialConcentration")]
    pub initial_amount: f64,

    /// Held fixed by the environment; reactions do not change it
    #[serde(default)]
    pub boundary_condition: bool,

    #[serde(default)]
    pub constant: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Parameter {
    #[serde(default)]
    pub value: f64,

    #[serde(default = "default_true")]
    pub constant: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Compartment {
    #[serde(default = "default_size")]
    pub size: f64,

    #[serde(default = "default_true")]
    pub constant: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Participant of a reaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SpeciesReference {
    pub species: String,
    #[serde(default = "default_stoichiometry")]
    pub stoichiometry: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Reaction {
    #[serde(default)]
    pub reactants: Vec<SpeciesReference>,

    #[serde(default)]
    pub products: Vec<SpeciesReference>,

    /// Species that appear in the rate without being consumed or produced
    #[serde(default)]
    pub modifiers: Vec<String>,

    /// Net rate of the reaction
    pub kinetic_law: MathSource,

    #[serde(default)]
    pub reversible: bool,

    /// Constants visible only inside the kinetic law
    #[serde(default)]
    pub local_parameters: OrderMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Rule {
    /// `variable = math`, holding at every instant
    Assignment { variable: String, math: MathSource },
    /// `d(variable)/dt = math`
    Rate { variable: String, math: MathSource },
    /// `0 = math`
    Algebraic { math: MathSource },
}

impl Rule {
    pub fn variable(&self) -> Option<&str> {
        match self {
            Rule::Assignment { variable, .. } | Rule::Rate { variable, .. } => Some(variable),
            Rule::Algebraic { .. } => None,
        }
    }

    pub fn math(&self) -> &MathSource {
        match self {
            Rule::Assignment { math, .. } | Rule::Rate { math, .. } | Rule::Algebraic { math } => {
                math
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Rule::Assignment { .. } => "assignment rule",
            Rule::Rate { .. } => "rate rule",
            Rule::Algebraic { .. } => "algebraic rule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventAssignment {
    pub variable: String,
    pub math: MathSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Fires when this condition goes from false to true
    pub trigger: MathSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<MathSource>,

    #[serde(default)]
    pub assignments: Vec<EventAssignment>,

    /// Evaluate assignments with the values at trigger time rather than at execution time
    #[serde(default = "default_true")]
    pub use_values_from_trigger_time: bool,

    /// Value of the trigger just before `t = 0`
    #[serde(default = "default_true")]
    pub initial_value: bool,
}

/// User function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FunctionDefinition {
    /// Formal arguments; may be left empty when `math` is a MathML `<lambda>`
    #[serde(default)]
    pub arguments: Vec<String>,
    pub math: MathSource,
}

impl FunctionDefinition {
    /// Formal arguments and body, unwrapping a `<lambda>` if present
    pub fn signature(&self) -> Result<(Vec<String>, MathSource), ParseError> {
        match self.math.as_node()? {
            Some(MathNode::Lambda { params, body }) => Ok((params, MathSource::Tree(*body))),
            _ => Ok((self.arguments.clone(), self.math.clone())),
        }
    }

    pub fn arity(&self) -> Result<usize, ParseError> {
        Ok(self.signature()?.0.len())
    }
}

fn default_true() -> bool {
    true
}

fn default_size() -> f64 {
    1.0
}

fn default_stoichiometry() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymbolTable;

    #[test]
    fn test_rule_tagging() {
        let rule: Rule =
            serde_json::from_str(r#"{"type": "assignment", "variable": "V", "math": "BM * 0.2"}"#)
                .unwrap();
        assert_eq!(rule.variable(), Some("V"));
        assert_eq!(rule.kind(), "assignment rule");

        let rule: Rule =
            serde_json::from_str(r#"{"type": "algebraic", "math": "x - 1"}"#).unwrap();
        assert_eq!(rule.variable(), None);
    }

    #[test]
    fn test_reaction_defaults() {
        let r: Reaction = serde_json::from_str(
            r#"{"reactants": [{"species": "A"}], "kineticLaw": "k * A"}"#,
        )
        .unwrap();
        assert_eq!(r.reactants[0].stoichiometry, 1.0);
        assert!(r.products.is_empty());
        assert!(!r.reversible);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = serde_json::from_str::<Species>(r#"{"initialAmount": 1, "colour": "red"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_lambda_signature() {
        let f = FunctionDefinition {
            arguments: vec![],
            math: MathSource::Text(
                "<math><lambda><bvar><ci>a</ci></bvar><bvar><ci>b</ci></bvar>\
                 <apply><plus/><ci>a</ci><ci>b</ci></apply></lambda></math>"
                    .into(),
            ),
        };
        let (params, body) = f.signature().unwrap();
        assert_eq!(params, vec!["a", "b"]);
        let table = SymbolTable::new();
        let scope = Scope::new(&table).with_locals(params);
        assert_eq!(
            body.to_expr(&scope).unwrap(),
            Expr::sym("a") + Expr::sym("b")
        );
    }
}
