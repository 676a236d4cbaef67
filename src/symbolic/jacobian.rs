//! Symbolic Jacobian of the ODE system
//!
//! `J[i][j] = d(derivative_i)/d(state_j)`. Derivatives may read targets of
//! dynamic assignment rules, which in turn read the state; those are
//! differentiated through with the chain rule, using the total derivative of
//! each rule target (computed in rule order, so a rule only ever needs the
//! totals of rules before it). Entries refer to rule targets by name, so the
//! generated code evaluates the dynamic rule block before the Jacobian block.

use rayon::prelude::*;
use tracing::info;

use crate::error::CompileError;
use crate::expr::Expr;
use crate::symbolic::diff::differentiate;
use crate::symbolic::ode::OdeSystem;
use crate::symbolic::rules::Assignment;
use crate::symbolic::simplify::simplify;

/// One structurally non-zero Jacobian entry
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianEntry {
    pub row: usize,
    pub col: usize,
    pub expr: Expr,
}

/// Non-zero entries in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct SparseJacobian {
    pub n: usize,
    pub entries: Vec<JacobianEntry>,
}

impl SparseJacobian {
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Fraction of non-zero entries
    pub fn density(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.entries.len() as f64 / (self.n * self.n) as f64
    }

    /// `(row, col)` of every entry
    pub fn pattern(&self) -> Vec<(usize, usize)> {
        self.entries.iter().map(|e| (e.row, e.col)).collect()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Expr> {
        self.entries
            .binary_search_by(|e| (e.row, e.col).cmp(&(row, col)))
            .ok()
            .map(|i| &self.entries[i].expr)
    }

    /// Dense form, zeros filled in
    pub fn to_dense(&self) -> Vec<Vec<Expr>> {
        let mut dense = vec![vec![Expr::zero(); self.n]; self.n];
        for e in &self.entries {
            dense[e.row][e.col] = e.expr.clone();
        }
        dense
    }
}

/// Total derivatives `d(rule target)/d(state)` for every dynamic rule
fn rule_totals(
    ode: &OdeSystem,
    dynamic_rules: &[Assignment],
) -> Result<Vec<Vec<Expr>>, CompileError> {
    let mut totals: Vec<Vec<Expr>> = Vec::with_capacity(dynamic_rules.len());
    for rule in dynamic_rules {
        let row = (0..ode.len())
            .into_par_iter()
            .map(|col| total_derivative(&rule.expr, col, ode, dynamic_rules, &totals))
            .collect::<Result<Vec<_>, _>>()?;
        totals.push(row);
    }
    Ok(totals)
}

/// `d(expr)/d(state[col])`, following rule targets through `totals`
fn total_derivative(
    expr: &Expr,
    col: usize,
    ode: &OdeSystem,
    dynamic_rules: &[Assignment],
    totals: &[Vec<Expr>],
) -> Result<Expr, CompileError> {
    let mut result = differentiate(expr, &ode.states[col])?;
    let symbols = expr.free_symbols();
    for (r, rule) in dynamic_rules.iter().enumerate().take(totals.len()) {
        if !symbols.contains(rule.target.as_str()) {
            continue;
        }
        let inner = &totals[r][col];
        if inner.is_zero() {
            continue;
        }
        let outer = differentiate(expr, &rule.target)?;
        if !outer.is_zero() {
            result = result + outer * inner.clone();
        }
    }
    Ok(simplify(&result))
}

fn rows(
    ode: &OdeSystem,
    dynamic_rules: &[Assignment],
) -> Result<Vec<Vec<Expr>>, CompileError> {
    let totals = rule_totals(ode, dynamic_rules)?;
    (0..ode.len())
        .into_par_iter()
        .map(|row| {
            (0..ode.len())
                .map(|col| {
                    total_derivative(&ode.derivatives[row], col, ode, dynamic_rules, &totals)
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect()
}

/// Dense Jacobian, one row per state
pub fn compute_jacobian(
    ode: &OdeSystem,
    dynamic_rules: &[Assignment],
) -> Result<Vec<Vec<Expr>>, CompileError> {
    rows(ode, dynamic_rules)
}

/// Sparse Jacobian holding only entries that do not simplify to zero
pub fn compute_sparse_jacobian(
    ode: &OdeSystem,
    dynamic_rules: &[Assignment],
) -> Result<SparseJacobian, CompileError> {
    let dense = rows(ode, dynamic_rules)?;
    let entries: Vec<JacobianEntry> = dense
        .into_iter()
        .enumerate()
        .flat_map(|(row, cols)| {
            cols.into_iter()
                .enumerate()
                .filter(|(_, e)| !e.is_zero())
                .map(move |(col, expr)| JacobianEntry { row, col, expr })
        })
        .collect();
    let n = ode.len();
    info!(
        nonzero = entries.len(),
        total = n * n,
        "computed sparse Jacobian"
    );
    Ok(SparseJacobian { n, entries })
}
