//! Light algebraic simplification
//!
//! Bottom-up rewriting with constant folding and the usual identities. It is
//! deliberately shallow: no expansion, no collection of like terms. Results
//! are in canonical operand order.

use crate::expr::eval::integer_exponent;
use crate::expr::functions::Builtin;
use crate::expr::{BinaryOp, Expr, UnaryOp};

/// Simplify `expr` bottom-up
pub fn simplify(expr: &Expr) -> Expr {
    simplify_node(expr).canonical()
}

fn simplify_node(expr: &Expr) -> Expr {
    if expr.is_leaf() {
        return expr.clone();
    }
    rewrite(expr.map_children(simplify_node))
}

fn rewrite(node: Expr) -> Expr {
    match node {
        Expr::Unary { op, arg } => unary(op, *arg),
        Expr::Binary { op, lhs, rhs } => binary(op, *lhs, *rhs),
        Expr::Call { name, args } => call(name, args),
        Expr::Piecewise {
            branches,
            otherwise,
        } => piecewise(branches, *otherwise),
        leaf => leaf,
    }
}

fn unary(op: UnaryOp, arg: Expr) -> Expr {
    match (op, arg) {
        (UnaryOp::Neg, Expr::Number(v)) => Expr::num(-v.0),
        (
            UnaryOp::Neg,
            Expr::Unary {
                op: UnaryOp::Neg,
                arg,
            },
        ) => *arg,
        (op, arg) => Expr::unary(op, arg),
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        let folded = match op {
            BinaryOp::Add => Some(a + b),
            BinaryOp::Sub => Some(a - b),
            BinaryOp::Mul => Some(a * b),
            BinaryOp::Div if b != 0.0 => Some(a / b),
            BinaryOp::Pow => Some(match integer_exponent(&rhs) {
                Some(n) => a.powi(n),
                None => a.powf(b),
            }),
            _ => None,
        };
        if let Some(v) = folded.filter(|v| v.is_finite()) {
            return Expr::num(v);
        }
    }
    match op {
        BinaryOp::Add if lhs.is_zero() => rhs,
        BinaryOp::Add | BinaryOp::Sub if rhs.is_zero() => lhs,
        BinaryOp::Sub if lhs.is_zero() => unary(UnaryOp::Neg, rhs),
        BinaryOp::Sub if lhs == rhs => Expr::zero(),
        BinaryOp::Mul if lhs.is_zero() || rhs.is_zero() => Expr::zero(),
        BinaryOp::Mul if lhs.is_one() => rhs,
        BinaryOp::Mul | BinaryOp::Div if rhs.is_one() => lhs,
        BinaryOp::Mul if lhs.as_number() == Some(-1.0) => unary(UnaryOp::Neg, rhs),
        BinaryOp::Mul if rhs.as_number() == Some(-1.0) => unary(UnaryOp::Neg, lhs),
        BinaryOp::Div if lhs.is_zero() => Expr::zero(),
        BinaryOp::Pow if rhs.is_one() => lhs,
        BinaryOp::Pow if rhs.is_zero() => Expr::one(),
        BinaryOp::Add => match rhs {
            // a + (-b) => a - b
            Expr::Unary {
                op: UnaryOp::Neg,
                arg,
            } => Expr::binary(BinaryOp::Sub, lhs, *arg),
            rhs => Expr::binary(op, lhs, rhs),
        },
        BinaryOp::Sub => match rhs {
            Expr::Unary {
                op: UnaryOp::Neg,
                arg,
            } => Expr::binary(BinaryOp::Add, lhs, *arg),
            rhs => Expr::binary(op, lhs, rhs),
        },
        _ => Expr::binary(op, lhs, rhs),
    }
}

fn call(name: String, args: Vec<Expr>) -> Expr {
    let values: Option<Vec<f64>> = args.iter().map(Expr::as_number).collect();
    if let (Some(values), Some(builtin)) = (values, Builtin::from_name(&name)) {
        let v = builtin.apply(&values);
        if v.is_finite() {
            return Expr::num(v);
        }
    }
    Expr::call(name, args)
}

fn piecewise(branches: Vec<(Expr, Expr)>, otherwise: Expr) -> Expr {
    if branches.iter().all(|(_, value)| *value == otherwise) {
        return otherwise;
    }
    Expr::piecewise(branches, otherwise)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::sym("x")
    }

    #[test]
    fn test_identities() {
        assert_eq!(simplify(&(x() + Expr::zero())), x());
        assert_eq!(simplify(&(Expr::zero() + x())), x());
        assert_eq!(simplify(&(x() * Expr::one())), x());
        assert_eq!(simplify(&(x() * Expr::zero())), Expr::zero());
        assert_eq!(simplify(&(x() / Expr::one())), x());
        assert_eq!(simplify(&(Expr::zero() / x())), Expr::zero());
        assert_eq!(simplify(&x().powf(Expr::one())), x());
        assert_eq!(simplify(&x().powf(Expr::zero())), Expr::one());
        assert_eq!(simplify(&-(-x())), x());
        assert_eq!(simplify(&(Expr::zero() - x())), -x());
    }

    #[test]
    fn test_constant_folding() {
        let e = Expr::num(2.0) * Expr::num(3.0) + Expr::call("exp", vec![Expr::zero()]);
        assert_eq!(simplify(&e), Expr::num(7.0));
        // division by zero is left for the runtime
        let e = Expr::one() / Expr::zero();
        assert_eq!(simplify(&e), e);
    }

    #[test]
    fn test_piecewise_with_equal_branches_collapses() {
        let cond = Expr::binary(BinaryOp::Gt, x(), Expr::zero());
        let e = Expr::piecewise(vec![(cond, Expr::zero())], Expr::zero());
        assert_eq!(simplify(&e), Expr::zero());
    }

    #[test]
    fn test_nested_zero_products_vanish() {
        let e = (Expr::sym("a") * Expr::zero() + Expr::zero() * Expr::sym("b")) / Expr::sym("c");
        assert_eq!(simplify(&e), Expr::zero());
    }
}
