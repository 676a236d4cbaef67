//! Numeric evaluation of expression trees
//!
//! Truth values are represented as `1.0`/`0.0` and any non-zero number is
//! treated as true, matching how the emitted code lowers conditions. Integer
//! literal exponents go through `powi`, as in the printed code, so the
//! evaluator and the emitted simulator agree to the last bit.

use std::collections::{BTreeMap, HashMap};

use crate::error::EvalError;
use crate::expr::functions::Builtin;
use crate::expr::{BinaryOp, Expr, UnaryOp};

/// Source of symbol values
pub trait Env {
    fn value(&self, name: &str) -> Option<f64>;
}

impl Env for HashMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Env for HashMap<&str, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Env for BTreeMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<E: Env + ?Sized> Env for &E {
    fn value(&self, name: &str) -> Option<f64> {
        (**self).value(name)
    }
}

/// Exponent that can be emitted as `powi`
pub fn integer_exponent(expr: &Expr) -> Option<i32> {
    let v = expr.as_number()?;
    if v.fract() == 0.0 && v.abs() <= i32::MAX as f64 {
        Some(v as i32)
    } else {
        None
    }
}

fn truth(v: f64) -> bool {
    v != 0.0
}

fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Evaluate `expr` with symbol values taken from `env`
pub fn evaluate(expr: &Expr, env: &dyn Env) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(v) => Ok(v.0),
        Expr::Symbol(name) => env
            .value(name)
            .ok_or_else(|| EvalError::Unbound(name.clone())),
        Expr::Unary { op, arg } => {
            let v = evaluate(arg, env)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Not => bool_value(!truth(v)),
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            if *op == BinaryOp::Pow {
                let base = evaluate(lhs, env)?;
                return Ok(match integer_exponent(rhs) {
                    Some(n) => base.powi(n),
                    None => base.powf(evaluate(rhs, env)?),
                });
            }
            let a = evaluate(lhs, env)?;
            let b = evaluate(rhs, env)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Pow => a.powf(b),
                BinaryOp::Lt => bool_value(a < b),
                BinaryOp::Le => bool_value(a <= b),
                BinaryOp::Gt => bool_value(a > b),
                BinaryOp::Ge => bool_value(a >= b),
                BinaryOp::Eq => bool_value(a == b),
                BinaryOp::Ne => bool_value(a != b),
                BinaryOp::And => bool_value(truth(a) && truth(b)),
                BinaryOp::Or => bool_value(truth(a) || truth(b)),
            })
        }
        Expr::Call { name, args } => {
            let builtin =
                Builtin::from_name(name).ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;
            let values = args
                .iter()
                .map(|a| evaluate(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(builtin.apply(&values))
        }
        Expr::Piecewise {
            branches,
            otherwise,
        } => {
            for (cond, value) in branches {
                if truth(evaluate(cond, env)?) {
                    return evaluate(value, env);
                }
            }
            evaluate(otherwise, env)
        }
    }
}
