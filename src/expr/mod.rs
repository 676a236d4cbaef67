//! Symbolic expression trees
//!
//! Every rate law, rule, event trigger and function body in a model is
//! turned into an [`Expr`]. Trees are plain immutable values: transformations
//! build new trees and never mutate their input. Structural equality,
//! hashing and ordering are derived, so two trees are interchangeable
//! exactly when they print the same, which is what common-subexpression
//! matching relies on.

pub mod eval;
pub mod functions;
pub mod inline;
pub mod mathml;
pub mod parser;
pub mod symbols;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops;

use ordered_float::OrderedFloat;

pub use eval::{evaluate, Env};
pub use inline::FunctionInliner;
pub use mathml::MathNode;
pub use parser::{parse, tokenize, Parser, Scope, Token};
pub use symbols::{SymbolRole, SymbolTable};

/// Name the simulation time is bound to
pub const TIME: &str = "time";

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Operand order does not change the value
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Binding strength, higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div => 6,
            BinaryOp::Pow => 8,
        }
    }
}

/// Precedence of a prefix operator
pub const UNARY_PRECEDENCE: u8 = 7;
/// Precedence of literals, symbols, calls and parenthesised forms
pub const ATOM_PRECEDENCE: u8 = 9;

/// A symbolic expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    Number(OrderedFloat<f64>),
    Symbol(String),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `(condition, value)` branches tried in order, then `otherwise`
    Piecewise {
        branches: Vec<(Expr, Expr)>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Number(OrderedFloat(value))
    }

    pub fn zero() -> Self {
        Expr::num(0.0)
    }

    pub fn one() -> Self {
        Expr::num(1.0)
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn unary(op: UnaryOp, arg: Expr) -> Self {
        Expr::Unary {
            op,
            arg: Box::new(arg),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn piecewise(branches: Vec<(Expr, Expr)>, otherwise: Expr) -> Self {
        Expr::Piecewise {
            branches,
            otherwise: Box::new(otherwise),
        }
    }

    pub fn powf(self, exponent: Expr) -> Self {
        Expr::binary(BinaryOp::Pow, self, exponent)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(v) => Some(v.0),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_number() == Some(0.0)
    }

    pub fn is_one(&self) -> bool {
        self.as_number() == Some(1.0)
    }

    /// Literals and symbols
    pub fn is_leaf(&self) -> bool {
        matches!(self, Expr::Number(_) | Expr::Symbol(_))
    }

    /// Whether the expression yields a truth value rather than a number
    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Unary {
                op: UnaryOp::Not, ..
            } => true,
            Expr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            _ => false,
        }
    }

    /// Direct sub-trees, in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Number(_) | Expr::Symbol(_) => Vec::new(),
            Expr::Unary { arg, .. } => vec![arg],
            Expr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::Piecewise {
                branches,
                otherwise,
            } => {
                let mut out = Vec::with_capacity(branches.len() * 2 + 1);
                for (cond, value) in branches {
                    out.push(cond);
                    out.push(value);
                }
                out.push(otherwise);
                out
            }
        }
    }

    /// Rebuild the node with every direct child passed through `f`
    pub fn try_map_children<E>(
        &self,
        f: &mut impl FnMut(&Expr) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        Ok(match self {
            Expr::Number(_) | Expr::Symbol(_) => self.clone(),
            Expr::Unary { op, arg } => Expr::unary(*op, f(arg)?),
            Expr::Binary { op, lhs, rhs } => Expr::binary(*op, f(lhs)?, f(rhs)?),
            Expr::Call { name, args } => Expr::Call {
                name: name.clone(),
                args: args.iter().map(&mut *f).collect::<Result<_, E>>()?,
            },
            Expr::Piecewise {
                branches,
                otherwise,
            } => {
                let mut mapped = Vec::with_capacity(branches.len());
                for (cond, value) in branches {
                    mapped.push((f(cond)?, f(value)?));
                }
                Expr::piecewise(mapped, f(otherwise)?)
            }
        })
    }

    /// Infallible form of [`Expr::try_map_children`]
    pub fn map_children(&self, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
        let result: Result<Expr, std::convert::Infallible> =
            self.try_map_children(&mut |e| Ok(f(e)));
        match result {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }

    /// Every symbol referenced by the tree, sorted
    pub fn free_symbols(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Symbol(name) => {
                out.insert(name.as_str());
            }
            _ => {
                for child in self.children() {
                    child.collect_symbols(out);
                }
            }
        }
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        match self {
            Expr::Symbol(s) => s == name,
            Expr::Number(_) => false,
            _ => self.children().into_iter().any(|c| c.contains_symbol(name)),
        }
    }

    /// Names of every function call in the tree, sorted
    pub fn called_functions(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        if let Expr::Call { name, .. } = self {
            out.insert(name.as_str());
        }
        for child in self.children() {
            child.collect_calls(out);
        }
    }

    /// Replace symbols simultaneously; substituted trees are not revisited
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        match self {
            Expr::Symbol(name) => map.get(name).cloned().unwrap_or_else(|| self.clone()),
            Expr::Number(_) => self.clone(),
            _ => self.map_children(|c| c.substitute(map)),
        }
    }

    /// Order the operands of commutative operators by the derived ordering
    pub fn canonical(&self) -> Expr {
        match self {
            Expr::Binary { op, lhs, rhs } if op.is_commutative() => {
                let lhs = lhs.canonical();
                let rhs = rhs.canonical();
                if rhs < lhs {
                    Expr::binary(*op, rhs, lhs)
                } else {
                    Expr::binary(*op, lhs, rhs)
                }
            }
            _ if self.is_leaf() => self.clone(),
            _ => self.map_children(Expr::canonical),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Expr::node_count)
            .sum::<usize>()
    }

    /// Binding strength of the root node
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Number(v) if v.0 < 0.0 => UNARY_PRECEDENCE,
            Expr::Unary { .. } => UNARY_PRECEDENCE,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Piecewise { .. } | Expr::Number(_) | Expr::Symbol(_) | Expr::Call { .. } => {
                ATOM_PRECEDENCE
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::num(value)
    }
}

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, self, rhs)
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Div, self, rhs)
    }
}

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl fmt::Display for Expr {
    /// Infix form accepted back by [`parse`]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{}", v.0),
            Expr::Symbol(name) => f.write_str(name),
            Expr::Unary { op, arg } => {
                f.write_str(match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                })?;
                write_operand(f, arg, UNARY_PRECEDENCE + 1)
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                // `^` groups to the right, everything else to the left
                let (left_min, right_min) = if *op == BinaryOp::Pow {
                    (prec + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                write_operand(f, lhs, left_min)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs, right_min)
            }
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Piecewise {
                branches,
                otherwise,
            } => {
                f.write_str("piecewise(")?;
                for (cond, value) in branches {
                    write!(f, "{value}, {cond}, ")?;
                }
                write!(f, "{otherwise})")
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min_precedence: u8) -> fmt::Result {
    if expr.precedence() < min_precedence {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::sym("x")
    }
    fn y() -> Expr {
        Expr::sym("y")
    }

    #[test]
    fn test_free_symbols_sorted_and_deduplicated() {
        let e = (y() * x()) + Expr::call("exp", vec![x()]);
        let syms: Vec<&str> = e.free_symbols().into_iter().collect();
        assert_eq!(syms, vec!["x", "y"]);
    }

    #[test]
    fn test_substitute_is_simultaneous() {
        let e = x() + y();
        let mut map = HashMap::new();
        map.insert("x".to_string(), y());
        map.insert("y".to_string(), x());
        assert_eq!(e.substitute(&map), y() + x());
    }

    #[test]
    fn test_canonical_orders_commutative_operands() {
        let a = (y() * x()).canonical();
        let b = (x() * y()).canonical();
        assert_eq!(a, b);
        // subtraction keeps its operand order
        assert_ne!((y() - x()).canonical(), (x() - y()).canonical());
    }

    #[test]
    fn test_display_parenthesises_by_precedence() {
        let e = (x() + y()) * x();
        assert_eq!(e.to_string(), "(x + y) * x");
        let e = x() - (y() - x());
        assert_eq!(e.to_string(), "x - (y - x)");
        let e = x().powf(y().powf(Expr::num(2.0)));
        assert_eq!(e.to_string(), "x ^ y ^ 2");
    }

    #[test]
    fn test_boolean_detection() {
        assert!(Expr::binary(BinaryOp::Gt, x(), y()).is_boolean());
        assert!(Expr::unary(UnaryOp::Not, x()).is_boolean());
        assert!(!(x() + y()).is_boolean());
    }

    #[test]
    fn test_negative_zero_is_structurally_zero() {
        assert_eq!(Expr::num(-0.0), Expr::num(0.0));
    }
}
