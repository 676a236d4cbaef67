use std::collections::HashMap;

use crate::error::CompileError;
use crate::expr::Expr;

/// A user function: formal parameters and a body over them
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
}

/// Replaces calls to user functions by their bodies
///
/// Arguments are expanded first and then bound to the formal parameters
/// simultaneously, so a body never sees a half-substituted argument. A call
/// chain that re-enters a function on the stack, or grows past `max_depth`,
/// is reported as [`CompileError::Recursion`].
#[derive(Debug, Clone)]
pub struct FunctionInliner {
    functions: HashMap<String, FunctionDef>,
    max_depth: usize,
}

impl FunctionInliner {
    pub const DEFAULT_MAX_DEPTH: usize = 32;

    pub fn new(functions: impl IntoIterator<Item = FunctionDef>) -> Self {
        Self {
            functions: functions
                .into_iter()
                .map(|f| (f.name.clone(), f))
                .collect(),
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    /// Expand every user call in `expr`
    pub fn inline(&self, expr: &Expr) -> Result<Expr, CompileError> {
        if self.functions.is_empty() {
            return Ok(expr.clone());
        }
        let mut stack = Vec::new();
        self.expand(expr, &mut stack)
    }

    fn expand(&self, expr: &Expr, stack: &mut Vec<String>) -> Result<Expr, CompileError> {
        match expr {
            Expr::Number(_) | Expr::Symbol(_) => Ok(expr.clone()),
            Expr::Call { name, args } if self.functions.contains_key(name) => {
                let args = args
                    .iter()
                    .map(|a| self.expand(a, stack))
                    .collect::<Result<Vec<_>, _>>()?;
                self.expand_call(name, args, stack)
            }
            _ => expr.try_map_children(&mut |c| self.expand(c, stack)),
        }
    }

    fn expand_call(
        &self,
        name: &str,
        args: Vec<Expr>,
        stack: &mut Vec<String>,
    ) -> Result<Expr, CompileError> {
        let Some(def) = self.functions.get(name) else {
            return Ok(Expr::call(name, args));
        };
        if stack.iter().any(|s| s == name) || stack.len() >= self.max_depth {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(CompileError::Recursion { stack: chain });
        }
        if def.params.len() != args.len() {
            return Err(CompileError::unsupported(
                format!("call to '{name}'"),
                format!(
                    "expects {} argument(s), got {}",
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        stack.push(name.to_string());
        let body = self.expand(&def.body, stack);
        stack.pop();
        let bindings: HashMap<String, Expr> = def.params.iter().cloned().zip(args).collect();
        Ok(body?.substitute(&bindings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;

    fn conc() -> FunctionDef {
        FunctionDef {
            name: "conc".into(),
            params: vec!["q".into(), "v".into()],
            body: Expr::sym("q") / Expr::sym("v"),
        }
    }

    fn twice() -> FunctionDef {
        FunctionDef {
            name: "twice".into(),
            params: vec!["x".into()],
            body: Expr::num(2.0) * Expr::call("conc", vec![Expr::sym("x"), Expr::sym("V")]),
        }
    }

    #[test]
    fn test_transitive_and_nested_calls() {
        let inliner = FunctionInliner::new([conc(), twice()]);
        let e = Expr::call(
            "twice",
            vec![Expr::call("conc", vec![Expr::sym("A"), Expr::sym("B")])],
        );
        let expected = Expr::num(2.0) * ((Expr::sym("A") / Expr::sym("B")) / Expr::sym("V"));
        assert_eq!(inliner.inline(&e).unwrap(), expected);
    }

    #[test]
    fn test_arguments_bind_simultaneously() {
        // swapping arguments must not leak one substitution into the other
        let inliner = FunctionInliner::new([conc()]);
        let e = Expr::call("conc", vec![Expr::sym("v"), Expr::sym("q")]);
        assert_eq!(inliner.inline(&e).unwrap(), Expr::sym("v") / Expr::sym("q"));
    }

    #[test]
    fn test_inlining_is_idempotent() {
        let inliner = FunctionInliner::new([conc(), twice()]);
        let e = Expr::binary(
            BinaryOp::Gt,
            Expr::call("twice", vec![Expr::sym("S")]),
            Expr::one(),
        );
        let once = inliner.inline(&e).unwrap();
        assert_eq!(inliner.inline(&once).unwrap(), once);
        assert!(once.called_functions().is_empty());
    }

    #[test]
    fn test_mutual_recursion_is_reported() {
        let f = FunctionDef {
            name: "f".into(),
            params: vec!["x".into()],
            body: Expr::call("g", vec![Expr::sym("x")]),
        };
        let g = FunctionDef {
            name: "g".into(),
            params: vec!["x".into()],
            body: Expr::call("f", vec![Expr::sym("x")]),
        };
        let err = FunctionInliner::new([f, g])
            .inline(&Expr::call("f", vec![Expr::one()]))
            .unwrap_err();
        match err {
            CompileError::Recursion { stack } => assert_eq!(stack, vec!["f", "g", "f"]),
            other => panic!("expected recursion error, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_limit() {
        let chain: Vec<FunctionDef> = (0..5)
            .map(|i| FunctionDef {
                name: format!("f{i}"),
                params: vec!["x".into()],
                body: Expr::call(format!("f{}", i + 1), vec![Expr::sym("x")]),
            })
            .collect();
        let inliner = FunctionInliner::new(chain).with_max_depth(3);
        let err = inliner.inline(&Expr::call("f0", vec![Expr::one()])).unwrap_err();
        assert!(matches!(err, CompileError::Recursion { .. }));
    }
}
