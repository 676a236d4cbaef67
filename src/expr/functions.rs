//! The fixed set of builtin functions
//!
//! Parsers funnel every call through [`build_builtin`], which rewrites
//! operator-like functions (`pow`, `gt`, `and`, `piecewise`, ...) into the
//! corresponding tree nodes and normalises the remaining names, so later
//! stages only ever see the canonical names listed in [`Builtin`].

use crate::error::ParseError;
use crate::expr::{BinaryOp, Expr, UnaryOp};

/// Functions that survive parsing as [`Expr::Call`] nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Exp,
    /// Natural logarithm
    Ln,
    /// `log(base, x)`
    Log,
    Log10,
    Log2,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Min,
    Max,
}

impl Builtin {
    pub const ALL: [Builtin; 20] = [
        Builtin::Exp,
        Builtin::Ln,
        Builtin::Log,
        Builtin::Log10,
        Builtin::Log2,
        Builtin::Sqrt,
        Builtin::Abs,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Asin,
        Builtin::Acos,
        Builtin::Atan,
        Builtin::Sinh,
        Builtin::Cosh,
        Builtin::Tanh,
        Builtin::Min,
        Builtin::Max,
    ];

    /// Canonical name, as stored in [`Expr::Call`]
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Exp => "exp",
            Builtin::Ln => "ln",
            Builtin::Log => "log",
            Builtin::Log10 => "log10",
            Builtin::Log2 => "log2",
            Builtin::Sqrt => "sqrt",
            Builtin::Abs => "abs",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Asin => "asin",
            Builtin::Acos => "acos",
            Builtin::Atan => "atan",
            Builtin::Sinh => "sinh",
            Builtin::Cosh => "cosh",
            Builtin::Tanh => "tanh",
            Builtin::Min => "min",
            Builtin::Max => "max",
        }
    }

    /// Look up a canonical name
    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Builtin::Log => argc == 2,
            Builtin::Min | Builtin::Max => argc >= 2,
            _ => argc == 1,
        }
    }

    fn arity_label(self) -> &'static str {
        match self {
            Builtin::Log => "2",
            Builtin::Min | Builtin::Max => "at least 2",
            _ => "1",
        }
    }

    /// Apply the function to already evaluated arguments
    pub fn apply(self, args: &[f64]) -> f64 {
        let a = args.first().copied().unwrap_or(f64::NAN);
        match self {
            Builtin::Exp => a.exp(),
            Builtin::Ln => a.ln(),
            Builtin::Log => args.get(1).copied().unwrap_or(f64::NAN).log(a),
            Builtin::Log10 => a.log10(),
            Builtin::Log2 => a.log2(),
            Builtin::Sqrt => a.sqrt(),
            Builtin::Abs => a.abs(),
            Builtin::Floor => a.floor(),
            Builtin::Ceil => a.ceil(),
            Builtin::Sin => a.sin(),
            Builtin::Cos => a.cos(),
            Builtin::Tan => a.tan(),
            Builtin::Asin => a.asin(),
            Builtin::Acos => a.acos(),
            Builtin::Atan => a.atan(),
            Builtin::Sinh => a.sinh(),
            Builtin::Cosh => a.cosh(),
            Builtin::Tanh => a.tanh(),
            Builtin::Min => args.iter().skip(1).fold(a, |acc, v| acc.min(*v)),
            Builtin::Max => args.iter().skip(1).fold(a, |acc, v| acc.max(*v)),
        }
    }
}

/// Words that may trail a numeric literal as a unit annotation
pub const UNIT_WORDS: &[&str] = &[
    "dimensionless",
    "item",
    "mole",
    "mmol",
    "umol",
    "nmol",
    "litre",
    "liter",
    "L",
    "mL",
    "uL",
    "gram",
    "g",
    "mg",
    "kg",
    "second",
    "s",
    "minute",
    "min",
    "hour",
    "h",
    "hr",
    "day",
    "metre",
    "meter",
    "m",
    "kilogram",
    "per_second",
    "per_hour",
];

/// Named constants accepted wherever an identifier is
pub fn constant(name: &str) -> Option<Expr> {
    match name {
        "pi" => Some(Expr::num(std::f64::consts::PI)),
        "exponentiale" => Some(Expr::num(std::f64::consts::E)),
        "infinity" | "INF" => Some(Expr::num(f64::INFINITY)),
        "notanumber" | "NaN" => Some(Expr::num(f64::NAN)),
        "true" => Some(Expr::binary(BinaryOp::Eq, Expr::one(), Expr::one())),
        "false" => Some(Expr::binary(BinaryOp::Ne, Expr::one(), Expr::one())),
        _ => None,
    }
}

fn expect(name: &str, args: &[Expr], n: usize) -> Result<(), ParseError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(ParseError::arity(name, n, args.len()))
    }
}

fn fold(op: BinaryOp, name: &str, args: Vec<Expr>) -> Result<Expr, ParseError> {
    let found = args.len();
    let mut it = args.into_iter();
    let (Some(first), Some(second)) = (it.next(), it.next()) else {
        return Err(ParseError::arity(name, "at least 2", found));
    };
    Ok(it.fold(Expr::binary(op, first, second), |acc, next| {
        Expr::binary(op, acc, next)
    }))
}

fn binary_call(op: BinaryOp, name: &str, args: Vec<Expr>) -> Result<Expr, ParseError> {
    expect(name, &args, 2)?;
    let mut it = args.into_iter();
    match (it.next(), it.next()) {
        (Some(lhs), Some(rhs)) => Ok(Expr::binary(op, lhs, rhs)),
        _ => Err(ParseError::arity(name, 2, 0)),
    }
}

/// `piecewise(v1, c1, v2, c2, ..., [otherwise])`
pub fn piecewise_from_args(args: Vec<Expr>) -> Result<Expr, ParseError> {
    if args.is_empty() {
        return Err(ParseError::arity("piecewise", "at least 1", 0));
    }
    let mut branches = Vec::with_capacity(args.len() / 2);
    let mut it = args.into_iter();
    let mut otherwise = Expr::num(f64::NAN);
    while let Some(value) = it.next() {
        match it.next() {
            Some(cond) => branches.push((cond, value)),
            None => otherwise = value,
        }
    }
    if branches.is_empty() {
        return Ok(otherwise);
    }
    Ok(Expr::piecewise(branches, otherwise))
}

/// Build the tree for a builtin call, or `None` if `name` is not a builtin
pub fn build_builtin(name: &str, args: Vec<Expr>) -> Option<Result<Expr, ParseError>> {
    let built = match name {
        "pow" | "power" => binary_call(BinaryOp::Pow, name, args),
        "root" => match args.len() {
            1 => Ok(Expr::call("sqrt", args)),
            2 => {
                let mut it = args.into_iter();
                match (it.next(), it.next()) {
                    (Some(degree), Some(x)) => Ok(x.powf(Expr::one() / degree)),
                    _ => Err(ParseError::arity(name, "1 or 2", 0)),
                }
            }
            n => Err(ParseError::arity(name, "1 or 2", n)),
        },
        "gt" => binary_call(BinaryOp::Gt, name, args),
        "lt" => binary_call(BinaryOp::Lt, name, args),
        "ge" | "geq" => binary_call(BinaryOp::Ge, name, args),
        "le" | "leq" => binary_call(BinaryOp::Le, name, args),
        "eq" => binary_call(BinaryOp::Eq, name, args),
        "neq" => binary_call(BinaryOp::Ne, name, args),
        "and" => fold(BinaryOp::And, name, args),
        "or" => fold(BinaryOp::Or, name, args),
        "not" => expect(name, &args, 1)
            .map(|_| Expr::unary(UnaryOp::Not, args.into_iter().next().unwrap_or_else(Expr::zero))),
        "piecewise" => piecewise_from_args(args),
        "log" if args.len() == 1 => Ok(Expr::call("ln", args)),
        _ => {
            let canonical = match name {
                "arcsin" => "asin",
                "arccos" => "acos",
                "arctan" => "atan",
                "ceiling" => "ceil",
                other => other,
            };
            let builtin = Builtin::from_name(canonical)?;
            if builtin.accepts(args.len()) {
                Ok(Expr::call(builtin.name(), args))
            } else {
                Err(ParseError::arity(name, builtin.arity_label(), args.len()))
            }
        }
    };
    Some(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_argument_log_is_natural() {
        let e = build_builtin("log", vec![Expr::sym("x")]).unwrap().unwrap();
        assert_eq!(e, Expr::call("ln", vec![Expr::sym("x")]));
    }

    #[test]
    fn test_piecewise_without_default_falls_back_to_nan() {
        let e = piecewise_from_args(vec![Expr::one(), Expr::sym("c")]).unwrap();
        match e {
            Expr::Piecewise { otherwise, .. } => assert!(otherwise.as_number().unwrap().is_nan()),
            other => panic!("expected piecewise, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_is_checked() {
        let err = build_builtin("exp", vec![]).unwrap().unwrap_err();
        assert!(matches!(err, ParseError::Arity { .. }));
        assert!(build_builtin("frobnicate", vec![]).is_none());
    }

    #[test]
    fn test_aliases_normalise_to_canonical_names() {
        let e = build_builtin("arctan", vec![Expr::sym("x")]).unwrap().unwrap();
        assert_eq!(e, Expr::call("atan", vec![Expr::sym("x")]));
    }
}
