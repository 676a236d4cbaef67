//! Right-hand side of the ODE system

use ordermap::OrderMap;
use tracing::{debug, warn};

use crate::error::CompileError;
use crate::expr::Expr;
use crate::model::Model;
use crate::symbolic::rules::Assignment;
use crate::symbolic::simplify::simplify;

/// `d(states[i])/dt = derivatives[i]`
#[derive(Debug, Clone, PartialEq)]
pub struct OdeSystem {
    /// Dynamic species in declaration order; the state layout
    pub states: Vec<String>,
    pub derivatives: Vec<Expr>,
}

impl OdeSystem {
    /// Assemble the derivatives from reaction rates and rate rules
    ///
    /// `rates` holds each reaction's kinetic law, already parsed and inlined.
    /// Species without a state slot (boundary, constant or rule-assigned) are
    /// left untouched by reactions.
    pub fn build(
        model: &Model,
        rates: &OrderMap<String, Expr>,
        rate_rules: &[Assignment],
    ) -> Result<Self, CompileError> {
        let states: Vec<String> = model
            .dynamic_species()
            .into_iter()
            .map(String::from)
            .collect();
        let mut terms: Vec<Vec<Expr>> = vec![Vec::new(); states.len()];

        for (id, reaction) in &model.reactions {
            let Some(rate) = rates.get(id) else {
                return Err(CompileError::unsupported(
                    format!("reaction '{id}'"),
                    "kinetic law was not compiled",
                ));
            };
            let mut net: OrderMap<&str, f64> = OrderMap::new();
            for r in &reaction.reactants {
                *net.entry(r.species.as_str()).or_insert(0.0) -= r.stoichiometry;
            }
            for p in &reaction.products {
                *net.entry(p.species.as_str()).or_insert(0.0) += p.stoichiometry;
            }
            for (species, coefficient) in net {
                let Some(slot) = states.iter().position(|s| s == species) else {
                    continue;
                };
                if coefficient != 0.0 {
                    terms[slot].push(scaled(coefficient, rate));
                }
            }
        }

        for rule in rate_rules {
            if !model.species.contains_key(&rule.target) {
                return Err(CompileError::unsupported(
                    format!("rate rule for '{}'", rule.target),
                    "rate rules are only supported on species",
                ));
            }
            match states.iter().position(|s| *s == rule.target) {
                Some(slot) => terms[slot].push(rule.expr.clone()),
                None => warn!(
                    species = %rule.target,
                    "rate rule on a species without state has no effect"
                ),
            }
        }

        let derivatives: Vec<Expr> = terms.into_iter().map(|t| simplify(&sum(t))).collect();
        debug!(states = states.len(), "built ODE system");
        Ok(Self {
            states,
            derivatives,
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn index_of(&self, species: &str) -> Option<usize> {
        self.states.iter().position(|s| s == species)
    }

    pub fn derivative(&self, species: &str) -> Option<&Expr> {
        self.index_of(species).and_then(|i| self.derivatives.get(i))
    }
}

fn scaled(coefficient: f64, rate: &Expr) -> Expr {
    if coefficient == 1.0 {
        rate.clone()
    } else if coefficient == -1.0 {
        -rate.clone()
    } else {
        Expr::num(coefficient) * rate.clone()
    }
}

/// Sum of terms, turning `a + (-b)` into `a - b`
fn sum(terms: Vec<Expr>) -> Expr {
    terms
        .into_iter()
        .reduce(|acc, term| match term {
            Expr::Unary {
                op: crate::expr::UnaryOp::Neg,
                arg,
            } => acc - *arg,
            term => acc + term,
        })
        .unwrap_or_else(Expr::zero)
}
