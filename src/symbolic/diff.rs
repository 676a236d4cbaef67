//! Symbolic differentiation

use crate::error::CompileError;
use crate::expr::functions::Builtin;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::symbolic::simplify::simplify;

/// Partial derivative of `expr` with respect to the symbol `var`, simplified
///
/// Piecewise expressions keep their conditions and differentiate each value,
/// so derivatives are exact away from the switching points. Conditions and
/// step functions (`floor`, `ceil`) have zero derivative.
pub fn differentiate(expr: &Expr, var: &str) -> Result<Expr, CompileError> {
    Ok(simplify(&derive(expr, var)?))
}

fn derive(expr: &Expr, var: &str) -> Result<Expr, CompileError> {
    if !expr.contains_symbol(var) || expr.is_boolean() {
        return Ok(Expr::zero());
    }
    match expr {
        Expr::Number(_) => Ok(Expr::zero()),
        Expr::Symbol(name) => Ok(if name == var { Expr::one() } else { Expr::zero() }),
        Expr::Unary { op, arg } => match op {
            UnaryOp::Neg => Ok(-derive(arg, var)?),
            UnaryOp::Not => Ok(Expr::zero()),
        },
        Expr::Binary { op, lhs, rhs } => binary(*op, lhs, rhs, var),
        Expr::Call { name, args } => call(name, args, var),
        Expr::Piecewise {
            branches,
            otherwise,
        } => {
            let branches = branches
                .iter()
                .map(|(cond, value)| Ok((cond.clone(), derive(value, var)?)))
                .collect::<Result<Vec<_>, CompileError>>()?;
            Ok(Expr::piecewise(branches, derive(otherwise, var)?))
        }
    }
}

fn binary(op: BinaryOp, a: &Expr, b: &Expr, var: &str) -> Result<Expr, CompileError> {
    let da = derive(a, var)?;
    let db = derive(b, var)?;
    Ok(match op {
        BinaryOp::Add => da + db,
        BinaryOp::Sub => da - db,
        BinaryOp::Mul => da * b.clone() + a.clone() * db,
        BinaryOp::Div if !b.contains_symbol(var) => da / b.clone(),
        BinaryOp::Div => {
            (da * b.clone() - a.clone() * db) / b.clone().powf(Expr::num(2.0))
        }
        BinaryOp::Pow if !b.contains_symbol(var) => {
            // n * a^(n-1) * a'
            let reduced = match b.as_number() {
                Some(n) => Expr::num(n - 1.0),
                None => b.clone() - Expr::one(),
            };
            b.clone() * a.clone().powf(reduced) * da
        }
        BinaryOp::Pow if !a.contains_symbol(var) => {
            // a^b * ln(a) * b'
            expr_pow(a, b) * ln(a.clone()) * db
        }
        BinaryOp::Pow => {
            // a^b * (b' ln(a) + b a' / a)
            expr_pow(a, b) * (db * ln(a.clone()) + b.clone() * da / a.clone())
        }
        _ => Expr::zero(),
    })
}

fn expr_pow(a: &Expr, b: &Expr) -> Expr {
    a.clone().powf(b.clone())
}

fn ln(e: Expr) -> Expr {
    Expr::call("ln", vec![e])
}

fn unary_call(name: &str, u: &Expr) -> Expr {
    Expr::call(name, vec![u.clone()])
}

fn call(name: &str, args: &[Expr], var: &str) -> Result<Expr, CompileError> {
    let builtin = Builtin::from_name(name).ok_or_else(|| {
        CompileError::unsupported(
            "differentiation",
            format!("no derivative known for function '{name}'"),
        )
    })?;
    if matches!(builtin, Builtin::Min | Builtin::Max) {
        return extremum(builtin, args, var);
    }
    if builtin == Builtin::Log {
        return match args {
            [base, x] if !base.contains_symbol(var) => {
                Ok(derive(x, var)? / (x.clone() * ln(base.clone())))
            }
            [base, x] => derive(&(ln(x.clone()) / ln(base.clone())), var),
            _ => Err(CompileError::unsupported("differentiation", "log expects 2 arguments")),
        };
    }
    let Some(u) = args.first() else {
        return Err(CompileError::unsupported(
            "differentiation",
            format!("'{name}' called without arguments"),
        ));
    };
    let du = derive(u, var)?;
    let two = || Expr::num(2.0);
    let one_minus_square = || Expr::one() - u.clone().powf(two());
    let outer = match builtin {
        Builtin::Exp => unary_call("exp", u),
        Builtin::Ln => Expr::one() / u.clone(),
        Builtin::Log10 => Expr::one() / (u.clone() * ln(Expr::num(10.0))),
        Builtin::Log2 => Expr::one() / (u.clone() * ln(two())),
        Builtin::Sqrt => Expr::one() / (two() * unary_call("sqrt", u)),
        Builtin::Abs => {
            return Ok(Expr::piecewise(
                vec![(Expr::binary(BinaryOp::Ge, u.clone(), Expr::zero()), du.clone())],
                -du,
            ))
        }
        Builtin::Floor | Builtin::Ceil => return Ok(Expr::zero()),
        Builtin::Sin => unary_call("cos", u),
        Builtin::Cos => -unary_call("sin", u),
        Builtin::Tan => Expr::one() / unary_call("cos", u).powf(two()),
        Builtin::Asin => Expr::one() / Expr::call("sqrt", vec![one_minus_square()]),
        Builtin::Acos => -(Expr::one() / Expr::call("sqrt", vec![one_minus_square()])),
        Builtin::Atan => Expr::one() / (Expr::one() + u.clone().powf(two())),
        Builtin::Sinh => unary_call("cosh", u),
        Builtin::Cosh => unary_call("sinh", u),
        Builtin::Tanh => Expr::one() / unary_call("cosh", u).powf(two()),
        Builtin::Log | Builtin::Min | Builtin::Max => Expr::zero(),
    };
    Ok(outer * du)
}

/// `min(a, rest...)` differentiates as `piecewise(a', a <= min(rest), min(rest)')`
fn extremum(builtin: Builtin, args: &[Expr], var: &str) -> Result<Expr, CompileError> {
    let (first, rest) = match args {
        [] => return Ok(Expr::zero()),
        [only] => return derive(only, var),
        [first, rest @ ..] => (first, rest),
    };
    let rest_expr = match rest {
        [single] => single.clone(),
        _ => Expr::call(builtin.name(), rest.to_vec()),
    };
    let cmp = if builtin == Builtin::Min {
        BinaryOp::Le
    } else {
        BinaryOp::Ge
    };
    Ok(Expr::piecewise(
        vec![(
            Expr::binary(cmp, first.clone(), rest_expr),
            derive(first, var)?,
        )],
        extremum(builtin, rest, var)?,
    ))
}
