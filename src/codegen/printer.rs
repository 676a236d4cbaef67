//! Rendering of expression trees as Rust tokens
//!
//! Numbers stay `f64` throughout. Truth values are only ever produced by
//! comparisons, logical operators and `!`; in numeric position they become
//! `if c { 1.0 } else { 0.0 }`, and a number used as a condition becomes
//! `(x != 0.0)`. Powers with an integer literal exponent use `powi` so the
//! emitted code agrees with [`evaluate`](crate::expr::evaluate).

use proc_macro2::{Literal, TokenStream};
use quote::quote;
use syn::Ident;

use crate::codegen::ident::IdentMap;
use crate::error::CompileError;
use crate::expr::eval::integer_exponent;
use crate::expr::functions::Builtin;
use crate::expr::{BinaryOp, Expr, UnaryOp, ATOM_PRECEDENCE, UNARY_PRECEDENCE};

/// Binding strength of an `if` expression or anything else that always needs
/// parentheses as an operand
const ENCLOSED: u8 = 0;

pub struct Printer<'a> {
    idents: &'a IdentMap,
}

impl<'a> Printer<'a> {
    pub fn new(idents: &'a IdentMap) -> Self {
        Self { idents }
    }

    /// Identifier bound to a model symbol
    pub fn symbol(&self, name: &str) -> Result<Ident, CompileError> {
        self.idents
            .ident(name)
            .ok_or_else(|| CompileError::codegen(format!("symbol '{name}' has no identifier")))
    }

    /// `expr` as an `f64` expression
    pub fn numeric(&self, expr: &Expr) -> Result<TokenStream, CompileError> {
        if expr.is_boolean() {
            let cond = self.condition(expr)?;
            return Ok(quote!(if #cond { 1.0 } else { 0.0 }));
        }
        Ok(match expr {
            Expr::Number(v) => literal(v.0),
            Expr::Symbol(name) => {
                let ident = self.symbol(name)?;
                quote!(#ident)
            }
            Expr::Unary { op: UnaryOp::Neg, arg } => {
                let arg = self.operand(arg, UNARY_PRECEDENCE + 1)?;
                quote!(-#arg)
            }
            Expr::Binary { op: BinaryOp::Pow, lhs, rhs } => {
                let base = self.numeric(lhs)?;
                match integer_exponent(rhs) {
                    Some(n) => {
                        let n = integer(n);
                        quote!(f64::powi(#base, #n))
                    }
                    None => {
                        let exponent = self.numeric(rhs)?;
                        quote!(f64::powf(#base, #exponent))
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let lhs = self.operand(lhs, prec)?;
                let rhs = self.operand(rhs, prec + 1)?;
                match op {
                    BinaryOp::Add => quote!(#lhs + #rhs),
                    BinaryOp::Sub => quote!(#lhs - #rhs),
                    BinaryOp::Mul => quote!(#lhs * #rhs),
                    BinaryOp::Div => quote!(#lhs / #rhs),
                    other => {
                        return Err(CompileError::codegen(format!(
                            "operator '{}' in numeric position",
                            other.symbol()
                        )))
                    }
                }
            }
            Expr::Call { name, args } => self.call(name, args)?,
            Expr::Piecewise {
                branches,
                otherwise,
            } => {
                let mut arms = Vec::with_capacity(branches.len());
                for (cond, value) in branches {
                    let cond = self.condition(cond)?;
                    let value = self.numeric(value)?;
                    arms.push(quote!(if #cond { #value }));
                }
                let otherwise = self.numeric(otherwise)?;
                let mut tokens = TokenStream::new();
                for (i, arm) in arms.into_iter().enumerate() {
                    if i > 0 {
                        tokens.extend(quote!(else));
                    }
                    tokens.extend(arm);
                }
                tokens.extend(quote!(else { #otherwise }));
                tokens
            }
            Expr::Unary { op: UnaryOp::Not, .. } => {
                return Err(CompileError::codegen("negation treated as a number"))
            }
        })
    }

    /// `expr` as a `bool` expression
    pub fn condition(&self, expr: &Expr) -> Result<TokenStream, CompileError> {
        Ok(match expr {
            Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
                // arithmetic binds tighter than comparison, booleans get an `if`
                let lhs = self.operand(lhs, BinaryOp::Add.precedence())?;
                let rhs = self.operand(rhs, BinaryOp::Add.precedence())?;
                match op {
                    BinaryOp::Lt => quote!(#lhs < #rhs),
                    BinaryOp::Le => quote!(#lhs <= #rhs),
                    BinaryOp::Gt => quote!(#lhs > #rhs),
                    BinaryOp::Ge => quote!(#lhs >= #rhs),
                    BinaryOp::Eq => quote!(#lhs == #rhs),
                    _ => quote!(#lhs != #rhs),
                }
            }
            Expr::Binary { op, lhs, rhs } if op.is_logical() => {
                let prec = op.precedence();
                let lhs = self.condition_operand(lhs, prec)?;
                let rhs = self.condition_operand(rhs, prec + 1)?;
                if *op == BinaryOp::And {
                    quote!(#lhs && #rhs)
                } else {
                    quote!(#lhs || #rhs)
                }
            }
            Expr::Unary { op: UnaryOp::Not, arg } => {
                let arg = self.condition_operand(arg, ATOM_PRECEDENCE)?;
                quote!(!#arg)
            }
            _ => {
                let value = self.operand(expr, BinaryOp::Add.precedence())?;
                quote!((#value != 0.0))
            }
        })
    }

    fn operand(&self, expr: &Expr, min_precedence: u8) -> Result<TokenStream, CompileError> {
        let tokens = self.numeric(expr)?;
        Ok(if numeric_precedence(expr) < min_precedence {
            quote!((#tokens))
        } else {
            tokens
        })
    }

    fn condition_operand(&self, expr: &Expr, min_precedence: u8) -> Result<TokenStream, CompileError> {
        let tokens = self.condition(expr)?;
        let precedence = match expr {
            Expr::Binary { op, .. } if op.is_comparison() || op.is_logical() => op.precedence(),
            Expr::Unary { op: UnaryOp::Not, .. } => UNARY_PRECEDENCE,
            // rendered as `(x != 0.0)`
            _ => ATOM_PRECEDENCE,
        };
        Ok(if precedence < min_precedence {
            quote!((#tokens))
        } else {
            tokens
        })
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<TokenStream, CompileError> {
        let builtin = Builtin::from_name(name)
            .ok_or_else(|| CompileError::codegen(format!("no Rust form for function '{name}'")))?;
        if !builtin.accepts(args.len()) {
            return Err(CompileError::codegen(format!(
                "function '{name}' called with {} arguments",
                args.len()
            )));
        }
        let args = args
            .iter()
            .map(|a| self.numeric(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match builtin {
            Builtin::Log => {
                let (base, x) = (&args[0], &args[1]);
                quote!(f64::log(#x, #base))
            }
            Builtin::Min | Builtin::Max => {
                let method = Ident::new(builtin.name(), proc_macro2::Span::call_site());
                let mut it = args.into_iter();
                let first = it.next().unwrap_or_default();
                it.fold(first, |acc, next| quote!(f64::#method(#acc, #next)))
            }
            _ => {
                let method = Ident::new(builtin.name(), proc_macro2::Span::call_site());
                let arg = &args[0];
                quote!(f64::#method(#arg))
            }
        })
    }
}

/// Binding strength of the rendered form of `expr`
fn numeric_precedence(expr: &Expr) -> u8 {
    if expr.is_boolean() {
        return ENCLOSED;
    }
    match expr {
        Expr::Number(v) if v.0.is_finite() && v.0.is_sign_negative() => UNARY_PRECEDENCE,
        Expr::Unary { .. } => UNARY_PRECEDENCE,
        Expr::Binary { op: BinaryOp::Pow, .. } => ATOM_PRECEDENCE,
        Expr::Binary { op, .. } => op.precedence(),
        Expr::Piecewise { .. } => ENCLOSED,
        Expr::Number(_) | Expr::Symbol(_) | Expr::Call { .. } => ATOM_PRECEDENCE,
    }
}

/// `f64` literal at full precision
pub fn literal(v: f64) -> TokenStream {
    if v.is_nan() {
        quote!(f64::NAN)
    } else if v == f64::INFINITY {
        quote!(f64::INFINITY)
    } else if v == f64::NEG_INFINITY {
        quote!(f64::NEG_INFINITY)
    } else {
        let lit = Literal::f64_unsuffixed(v.abs());
        if v.is_sign_negative() {
            quote!(-#lit)
        } else {
            quote!(#lit)
        }
    }
}

fn integer(n: i32) -> TokenStream {
    let lit = Literal::u32_unsuffixed(n.unsigned_abs());
    if n < 0 {
        quote!(-#lit)
    } else {
        quote!(#lit)
    }
}

/// Render `expr` as source text, for diagnostics and tests
pub fn render(expr: &Expr, idents: &IdentMap) -> Result<String, CompileError> {
    let tokens = Printer::new(idents).numeric(expr)?;
    let parsed: syn::Expr = syn::parse2(tokens)
        .map_err(|e| CompileError::codegen(format!("printed expression does not parse: {e}")))?;
    Ok(prettyplease::unparse(&syn::parse_quote!(const _: f64 = #parsed;))
        .trim()
        .trim_start_matches("const _: f64 = ")
        .trim_end_matches(';')
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{parse, Scope, SymbolRole, SymbolTable};

    fn idents() -> IdentMap {
        let mut map = IdentMap::new();
        for name in ["a", "b", "c", "type", "time"] {
            map.insert(name);
        }
        map
    }

    fn show(text: &str) -> String {
        let table = SymbolTable::with_names(SymbolRole::Parameter, ["a", "b", "c", "type"]);
        let expr = parse(text, &Scope::new(&table)).unwrap();
        render(&expr, &idents()).unwrap()
    }

    #[test]
    fn test_precedence_and_parentheses() {
        // `c` is taken by the emitted constants binding
        assert_eq!(show("a - (b - c)"), "a - (b - c_1)");
        assert_eq!(show("(a + b) * c"), "(a + b) * c_1");
        assert_eq!(show("-(a * b)"), "-(a * b)");
    }

    #[test]
    fn test_powers() {
        assert_eq!(show("a ^ 2"), "f64::powi(a, 2)");
        let inverse = Expr::sym("a").powf(Expr::num(-1.0));
        assert_eq!(render(&inverse, &idents()).unwrap(), "f64::powi(a, -1)");
        assert_eq!(show("a ^ b"), "f64::powf(a, b)");
        assert_eq!(show("a ^ 0.5"), "f64::powf(a, 0.5)");
    }

    #[test]
    fn test_keywords_are_renamed() {
        assert_eq!(show("type * 2"), "type_ * 2.0");
    }

    #[test]
    fn test_piecewise_and_conditions() {
        let text = show("piecewise(a, b > 0 && c < 1, 0)");
        assert!(text.starts_with("if b > 0.0 && c_1 < 1.0"), "{text}");
        let text = show("piecewise(a, b, 0)");
        assert!(text.starts_with("if (b != 0.0)"), "{text}");
        let text = show("a + (b > c)");
        assert!(text.contains("(if b > c_1 { 1.0 } else { 0.0 })"), "{text}");
    }

    #[test]
    fn test_non_finite_and_precise_literals() {
        assert_eq!(render(&Expr::num(f64::NAN), &idents()).unwrap(), "f64::NAN");
        assert_eq!(render(&Expr::num(f64::NEG_INFINITY), &idents()).unwrap(), "f64::NEG_INFINITY");
        let third = render(&Expr::num(1.0 / 3.0), &idents()).unwrap();
        assert_eq!(third.parse::<f64>().unwrap(), 1.0 / 3.0);
    }

    #[test]
    fn test_builtins() {
        assert_eq!(show("log(2, a)"), "f64::log(a, 2.0)");
        assert_eq!(show("max(a, b, c)"), "f64::max(f64::max(a, b), c_1)");
        assert_eq!(show("exp(a)"), "f64::exp(a)");
    }

    #[test]
    fn test_unknown_function_is_a_codegen_error() {
        let expr = Expr::call("gamma", vec![Expr::sym("a")]);
        assert!(matches!(
            render(&expr, &idents()),
            Err(CompileError::CodeGen(_))
        ));
    }
}
