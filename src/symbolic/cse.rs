//! Common sub-expression elimination
//!
//! Repeated non-trivial sub-trees across all outputs are hoisted into
//! temporaries. Temporaries are created in post-order, so each one only
//! refers to temporaries defined before it. Truth-valued sub-trees stay
//! inline; temporaries are always numbers.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::info;

use crate::config::OptimizationLevel;
use crate::expr::{Expr, UnaryOp};
use crate::symbolic::jacobian::{JacobianEntry, SparseJacobian};
use crate::symbolic::ode::OdeSystem;
use crate::symbolic::rules::Assignment;
use crate::symbolic::simplify::simplify;

/// Derivatives and Jacobian entries sharing one temporary block
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedSystem {
    pub temporaries: Vec<Assignment>,
    pub derivatives: Vec<Expr>,
    pub jacobian: Vec<JacobianEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptimizationStats {
    pub level: OptimizationLevel,
    pub temporaries: usize,
    /// Tree nodes over all outputs before optimization
    pub nodes_before: usize,
    /// Tree nodes over all outputs and temporaries after optimization
    pub nodes_after: usize,
}

/// Generates temporary names that avoid reserved identifiers
struct NameSource<'a> {
    prefix: &'a str,
    next: usize,
    reserved: &'a HashSet<String>,
}

impl NameSource<'_> {
    fn fresh(&mut self) -> String {
        loop {
            let name = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if !self.reserved.contains(&name) {
                return name;
            }
        }
    }
}

fn worth_extracting(expr: &Expr) -> bool {
    if expr.is_leaf() || expr.is_boolean() {
        return false;
    }
    !matches!(expr, Expr::Unary { op: UnaryOp::Neg, arg } if arg.is_leaf())
}

/// Count sub-tree occurrences without descending into trees seen before
fn count<'e>(expr: &'e Expr, counts: &mut HashMap<&'e Expr, usize>) {
    if expr.is_leaf() {
        return;
    }
    let seen = counts.entry(expr).or_insert(0);
    *seen += 1;
    if *seen > 1 {
        return;
    }
    for child in expr.children() {
        count(child, counts);
    }
}

struct Extractor<'c, 'n> {
    counts: &'c HashMap<&'c Expr, usize>,
    assigned: HashMap<Expr, String>,
    names: &'c mut NameSource<'n>,
    temporaries: Vec<Assignment>,
}

impl Extractor<'_, '_> {
    fn extract(&mut self, expr: &Expr) -> Expr {
        if expr.is_leaf() {
            return expr.clone();
        }
        if let Some(name) = self.assigned.get(expr) {
            return Expr::sym(name.clone());
        }
        let rebuilt = expr.map_children(|c| self.extract(c));
        let repeated = self.counts.get(expr).is_some_and(|&n| n > 1);
        if repeated && worth_extracting(expr) {
            let name = self.names.fresh();
            self.temporaries.push(Assignment::new(name.clone(), rebuilt));
            self.assigned.insert(expr.clone(), name.clone());
            return Expr::sym(name);
        }
        rebuilt
    }
}

/// One elimination pass over `temporaries` followed by `outputs`
///
/// Temporaries found inside an existing temporary are placed right before it.
fn eliminate_pass(
    temporaries: Vec<Assignment>,
    outputs: &[Expr],
    names: &mut NameSource<'_>,
) -> (Vec<Assignment>, Vec<Expr>) {
    let mut counts = HashMap::new();
    for t in &temporaries {
        count(&t.expr, &mut counts);
    }
    for e in outputs {
        count(e, &mut counts);
    }
    let mut extractor = Extractor {
        counts: &counts,
        assigned: HashMap::new(),
        names,
        temporaries: Vec::new(),
    };
    for t in &temporaries {
        let reduced = extractor.extract(&t.expr);
        extractor
            .temporaries
            .push(Assignment::new(t.target.clone(), reduced));
    }
    let reduced: Vec<Expr> = outputs.iter().map(|e| extractor.extract(e)).collect();
    (extractor.temporaries, reduced)
}

/// Hoist repeated sub-trees of `exprs` into temporaries
///
/// Returns the temporaries in definition order and the rewritten
/// expressions. `reserved` names are never used for temporaries.
pub fn eliminate_common_subexpressions(
    exprs: &[Expr],
    level: OptimizationLevel,
    prefix: &str,
    reserved: &HashSet<String>,
) -> (Vec<Assignment>, Vec<Expr>) {
    if level == OptimizationLevel::None {
        return (Vec::new(), exprs.to_vec());
    }
    let canonical: Vec<Expr> = exprs.iter().map(Expr::canonical).collect();
    let mut names = NameSource {
        prefix,
        next: 0,
        reserved,
    };
    let (temporaries, reduced) = eliminate_pass(Vec::new(), &canonical, &mut names);
    if level == OptimizationLevel::Basic {
        return (temporaries, reduced);
    }

    let simplified: Vec<Expr> = reduced.iter().map(simplify).collect();
    let temporaries = temporaries
        .into_iter()
        .map(|t| Assignment::new(t.target, simplify(&t.expr)))
        .collect();
    let (temporaries, reduced) = eliminate_pass(temporaries, &simplified, &mut names);
    let temporaries = temporaries
        .into_iter()
        .map(|t| Assignment::new(t.target, simplify(&t.expr)))
        .collect();
    (temporaries, reduced.iter().map(simplify).collect())
}

/// Optimize derivatives and Jacobian entries together
pub fn optimize_combined(
    ode: &OdeSystem,
    jacobian: &SparseJacobian,
    level: OptimizationLevel,
    prefix: &str,
    reserved: &HashSet<String>,
) -> (OptimizedSystem, OptimizationStats) {
    let n = ode.derivatives.len();
    let mut exprs = ode.derivatives.clone();
    exprs.extend(jacobian.entries.iter().map(|e| e.expr.clone()));
    let nodes_before: usize = exprs.iter().map(Expr::node_count).sum();

    let (temporaries, mut reduced) =
        eliminate_common_subexpressions(&exprs, level, prefix, reserved);
    let entries = reduced.split_off(n);
    let jacobian = jacobian
        .entries
        .iter()
        .zip(entries)
        .map(|(entry, expr)| JacobianEntry {
            row: entry.row,
            col: entry.col,
            expr,
        })
        .collect();

    let nodes_after = reduced.iter().map(Expr::node_count).sum::<usize>()
        + temporaries.iter().map(|t| t.expr.node_count()).sum::<usize>();
    let stats = OptimizationStats {
        level,
        temporaries: temporaries.len(),
        nodes_before,
        nodes_after,
    };
    info!(
        level = ?level,
        temporaries = stats.temporaries,
        nodes_before,
        nodes_after,
        "eliminated common sub-expressions"
    );
    (
        OptimizedSystem {
            temporaries,
            derivatives: reduced,
            jacobian,
        },
        stats,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{evaluate, BinaryOp};

    fn reserved() -> HashSet<String> {
        HashSet::from(["x0".to_string()])
    }

    fn a_over_v() -> Expr {
        Expr::sym("A") / Expr::sym("V")
    }

    #[test]
    fn test_level_none_passes_through() {
        let exprs = vec![a_over_v() * Expr::sym("k"), a_over_v()];
        let (temps, out) =
            eliminate_common_subexpressions(&exprs, OptimizationLevel::None, "x", &reserved());
        assert!(temps.is_empty());
        assert_eq!(out, exprs);
    }

    #[test]
    fn test_repeated_subtree_is_hoisted_and_reserved_names_skipped() {
        let exprs = vec![a_over_v() * Expr::sym("k"), Expr::sym("k2") + a_over_v()];
        let (temps, out) =
            eliminate_common_subexpressions(&exprs, OptimizationLevel::Basic, "x", &reserved());
        assert_eq!(temps, vec![Assignment::new("x1", a_over_v())]);
        assert_eq!(out[0], (Expr::sym("k") * Expr::sym("x1")).canonical());
        assert!(out[1].contains_symbol("x1"));
    }

    #[test]
    fn test_nested_repeats_are_ordered() {
        // (A/V)^2 appears twice and contains A/V, which also appears alone
        let sq = a_over_v().powf(Expr::num(2.0));
        let exprs = vec![sq.clone() + Expr::one(), sq * Expr::sym("k"), a_over_v()];
        let (temps, _) =
            eliminate_common_subexpressions(&exprs, OptimizationLevel::Full, "t", &HashSet::new());
        assert_eq!(temps.len(), 2);
        assert_eq!(temps[0].expr, a_over_v());
        assert!(temps[1].expr.contains_symbol(&temps[0].target));
    }

    #[test]
    fn test_conditions_stay_inline() {
        let cond = Expr::binary(BinaryOp::Gt, Expr::sym("V"), Expr::zero());
        let pw = |v: Expr| Expr::piecewise(vec![(cond.clone(), v)], Expr::zero());
        let exprs = vec![pw(Expr::sym("A")), pw(Expr::sym("B"))];
        let (temps, _) =
            eliminate_common_subexpressions(&exprs, OptimizationLevel::Full, "x", &HashSet::new());
        assert!(temps.iter().all(|t| !t.expr.is_boolean()));
    }

    #[test]
    fn test_values_are_preserved() {
        let exprs = vec![
            a_over_v() * Expr::sym("k") - Expr::call("exp", vec![a_over_v()]),
            Expr::call("exp", vec![a_over_v()]) + Expr::num(0.0) * Expr::sym("k"),
        ];
        let env: HashMap<String, f64> = [("A", 2.0), ("V", 3.0), ("k", 0.7)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for level in [OptimizationLevel::Basic, OptimizationLevel::Full] {
            let (temps, out) = eliminate_common_subexpressions(&exprs, level, "x", &HashSet::new());
            let mut env = env.clone();
            for t in &temps {
                let v = evaluate(&t.expr, &env).unwrap();
                env.insert(t.target.clone(), v);
            }
            for (before, after) in exprs.iter().zip(&out) {
                approx::assert_relative_eq!(
                    evaluate(before, &env).unwrap(),
                    evaluate(after, &env).unwrap(),
                    max_relative = 1e-12
                );
            }
        }
    }
}
