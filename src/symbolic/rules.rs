//! Ordering and classification of assignment rules

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::CompileError;
use crate::expr::Expr;

/// `target = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: String,
    pub expr: Expr,
}

impl Assignment {
    pub fn new(target: impl Into<String>, expr: Expr) -> Self {
        Self {
            target: target.into(),
            expr,
        }
    }
}

/// Assignment rules in evaluation order, split by when they must be evaluated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    /// Depend only on constants; evaluated once before integration
    pub static_rules: Vec<Assignment>,
    /// Depend on the state or on time; evaluated before every rate computation
    pub dynamic_rules: Vec<Assignment>,
}

impl RuleSet {
    /// Order `rules` and classify them; `is_dynamic` tells whether a model
    /// symbol varies during integration
    pub fn build(
        rules: Vec<Assignment>,
        is_dynamic: impl Fn(&str) -> bool,
    ) -> Result<Self, CompileError> {
        let order = order_rules(&rules)?;
        let mut slots: Vec<Option<Assignment>> = rules.into_iter().map(Some).collect();
        let mut set = RuleSet::default();
        let mut dynamic_targets: HashSet<String> = HashSet::new();
        for index in order {
            let Some(rule) = slots.get_mut(index).and_then(Option::take) else {
                continue;
            };
            let dynamic = rule
                .expr
                .free_symbols()
                .into_iter()
                .any(|s| is_dynamic(s) || dynamic_targets.contains(s));
            if dynamic {
                dynamic_targets.insert(rule.target.clone());
                set.dynamic_rules.push(rule);
            } else {
                set.static_rules.push(rule);
            }
        }
        debug!(
            static_rules = set.static_rules.len(),
            dynamic_rules = set.dynamic_rules.len(),
            "classified assignment rules"
        );
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.static_rules.is_empty() && self.dynamic_rules.is_empty()
    }

    /// Targets of the dynamic rules
    pub fn dynamic_targets(&self) -> impl Iterator<Item = &str> {
        self.dynamic_rules.iter().map(|r| r.target.as_str())
    }

    pub fn is_dynamic_target(&self, name: &str) -> bool {
        self.dynamic_rules.iter().any(|r| r.target == name)
    }
}

/// Evaluation order of `rules`: every rule after the rules whose targets it reads
///
/// Kahn's algorithm with the lowest declaration index taken first among the
/// ready rules, so the order is deterministic and keeps declaration order
/// wherever dependencies allow.
pub fn order_rules(rules: &[Assignment]) -> Result<Vec<usize>, CompileError> {
    let targets: HashMap<&str, usize> = rules
        .iter()
        .enumerate()
        .map(|(i, r)| (r.target.as_str(), i))
        .collect();

    // depends_on[i] = rules whose targets rule i reads
    let depends_on: Vec<BTreeSet<usize>> = rules
        .iter()
        .map(|r| {
            r.expr
                .free_symbols()
                .into_iter()
                .filter_map(|s| targets.get(s).copied())
                .collect()
        })
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];
    for (i, deps) in depends_on.iter().enumerate() {
        for &j in deps {
            dependents[j].push(i);
        }
    }
    let mut remaining: Vec<usize> = depends_on.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..rules.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(rules.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < rules.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let members = find_cycle(&depends_on, &placed)
            .into_iter()
            .map(|i| rules[i].target.clone())
            .collect();
        return Err(CompileError::CyclicDependency { members });
    }
    Ok(order)
}

/// Walk dependencies among the unplaced rules until one repeats
fn find_cycle(depends_on: &[BTreeSet<usize>], placed: &HashSet<usize>) -> Vec<usize> {
    let Some(start) = (0..depends_on.len()).find(|i| !placed.contains(i)) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    // every unplaced rule depends on at least one other unplaced rule
    while let Some(&next) = depends_on[current].iter().find(|d| !placed.contains(d)) {
        if let Some(&pos) = seen.get(&next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::TIME;

    fn rule(target: &str, symbols: &[&str]) -> Assignment {
        let expr = symbols
            .iter()
            .map(|s| Expr::sym(*s))
            .reduce(|a, b| a + b)
            .unwrap_or_else(Expr::one);
        Assignment::new(target, expr)
    }

    fn targets(rules: &[Assignment], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| rules[i].target.clone()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        // c = b + 1, b = a, a = p
        let rules = vec![rule("c", &["b"]), rule("b", &["a"]), rule("a", &["p"])];
        let order = order_rules(&rules).unwrap();
        assert_eq!(targets(&rules, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let rules = vec![rule("z", &["p"]), rule("y", &["p"]), rule("x", &["z", "y"])];
        let order = order_rules(&rules).unwrap();
        assert_eq!(targets(&rules, &order), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_cycle_lists_members() {
        let rules = vec![rule("ok", &["p"]), rule("a", &["b"]), rule("b", &["a"])];
        match order_rules(&rules).unwrap_err() {
            CompileError::CyclicDependency { members } => {
                assert_eq!(members, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let rules = vec![rule("a", &["a", "p"])];
        match order_rules(&rules).unwrap_err() {
            CompileError::CyclicDependency { members } => assert_eq!(members, vec!["a", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_classification_propagates_through_rules() {
        // v depends on the state S, w on v, u only on parameters
        let rules = vec![rule("w", &["v"]), rule("v", &["S"]), rule("u", &["p"]), rule("tt", &[TIME])];
        let set = RuleSet::build(rules, |s| s == "S" || s == TIME).unwrap();
        let stat: Vec<&str> = set.static_rules.iter().map(|r| r.target.as_str()).collect();
        let dynamic: Vec<&str> = set.dynamic_targets().collect();
        assert_eq!(stat, vec!["u"]);
        assert_eq!(dynamic, vec!["v", "w", "tt"]);
    }
}
