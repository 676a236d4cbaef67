//! Content-markup (MathML) input
//!
//! Expressions can arrive as MathML text or as an already structured
//! [`MathNode`] tree (the JSON shape of the same markup). Both end up in
//! [`MathNode::to_expr`], which binds identifiers through the same
//! [`Scope`] the infix parser uses.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::expr::functions::{build_builtin, constant, piecewise_from_args};
use crate::expr::{BinaryOp, Expr, Scope, UnaryOp, TIME};

/// Structured content markup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathNode {
    /// Numeric literal
    Cn(f64),
    /// Identifier
    Ci(String),
    /// Symbol defined by URL; only `time` and `avogadro` are understood
    Csymbol(String),
    /// Named constant (`pi`, `exponentiale`, `true`, ...)
    Constant(String),
    /// Operator application, e.g. `{"apply": {"op": "plus", "args": [...]}}`
    Apply { op: String, args: Vec<MathNode> },
    /// Call of a user function
    Call {
        function: String,
        args: Vec<MathNode>,
    },
    Piecewise {
        pieces: Vec<Piece>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<MathNode>>,
    },
    /// Function definition body with its bound variables
    Lambda {
        params: Vec<String>,
        body: Box<MathNode>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub value: MathNode,
    pub condition: MathNode,
}

impl MathNode {
    /// Read MathML content markup
    pub fn from_xml(xml: &str) -> Result<MathNode, ParseError> {
        let root = read_elements(xml)?;
        let expr_root = if root.name == "math" {
            let mut children = root.children.into_iter().filter(|c| c.name != "annotation");
            match (children.next(), children.next()) {
                (Some(only), None) => only,
                (None, _) => return Err(ParseError::Empty),
                _ => return Err(ParseError::markup("<math> must hold a single expression")),
            }
        } else {
            root
        };
        convert(expr_root)
    }

    /// Bind the markup against `scope`
    pub fn to_expr(&self, scope: &Scope<'_>) -> Result<Expr, ParseError> {
        match self {
            MathNode::Cn(v) => Ok(Expr::num(*v)),
            MathNode::Ci(name) => scope.resolve_identifier(name),
            MathNode::Csymbol(name) => match name.as_str() {
                "time" => Ok(Expr::sym(TIME)),
                "avogadro" => Ok(Expr::num(6.022_140_76e23)),
                other => Err(ParseError::UnknownFunction(format!("csymbol {other}"))),
            },
            MathNode::Constant(name) => {
                constant(name).ok_or_else(|| ParseError::UnknownIdentifier(name.clone()))
            }
            MathNode::Call { function, args } => {
                let args = to_exprs(args, scope)?;
                scope.resolve_call(function, args)
            }
            MathNode::Apply { op, args } => {
                let args = to_exprs(args, scope)?;
                apply(op, args)
            }
            MathNode::Piecewise { pieces, otherwise } => {
                let mut flat = Vec::with_capacity(pieces.len() * 2 + 1);
                for piece in pieces {
                    flat.push(piece.value.to_expr(scope)?);
                    flat.push(piece.condition.to_expr(scope)?);
                }
                if let Some(otherwise) = otherwise {
                    flat.push(otherwise.to_expr(scope)?);
                }
                piecewise_from_args(flat)
            }
            MathNode::Lambda { .. } => Err(ParseError::markup(
                "<lambda> is only valid as a function definition",
            )),
        }
    }
}

fn to_exprs(nodes: &[MathNode], scope: &Scope<'_>) -> Result<Vec<Expr>, ParseError> {
    nodes.iter().map(|n| n.to_expr(scope)).collect()
}

fn two(op: &str, args: Vec<Expr>) -> Result<(Expr, Expr), ParseError> {
    let found = args.len();
    let mut it = args.into_iter();
    match (it.next(), it.next(), it.next()) {
        (Some(a), Some(b), None) => Ok((a, b)),
        _ => Err(ParseError::arity(op, 2, found)),
    }
}

/// Map a MathML operator element onto tree nodes
fn apply(op: &str, args: Vec<Expr>) -> Result<Expr, ParseError> {
    let found = args.len();
    match op {
        "plus" => Ok(args
            .into_iter()
            .reduce(|acc, e| acc + e)
            .unwrap_or_else(Expr::zero)),
        "times" => Ok(args
            .into_iter()
            .reduce(|acc, e| acc * e)
            .unwrap_or_else(Expr::one)),
        "minus" if found == 1 => Ok(-args.into_iter().next().unwrap_or_else(Expr::zero)),
        "minus" => two(op, args).map(|(a, b)| a - b),
        "divide" => two(op, args).map(|(a, b)| a / b),
        "power" => two(op, args).map(|(a, b)| a.powf(b)),
        // without <logbase> MathML means base 10
        "log" if found == 1 => Ok(Expr::call("log10", args)),
        "eq" | "neq" | "gt" | "lt" | "geq" | "leq" => {
            let cmp = match op {
                "eq" => BinaryOp::Eq,
                "neq" => BinaryOp::Ne,
                "gt" => BinaryOp::Gt,
                "lt" => BinaryOp::Lt,
                "geq" => BinaryOp::Ge,
                _ => BinaryOp::Le,
            };
            if found < 2 {
                return Err(ParseError::arity(op, "at least 2", found));
            }
            // a < b < c  ==  a < b && b < c
            let pairs: Vec<Expr> = args
                .windows(2)
                .map(|w| Expr::binary(cmp, w[0].clone(), w[1].clone()))
                .collect();
            Ok(pairs
                .into_iter()
                .reduce(|acc, e| Expr::binary(BinaryOp::And, acc, e))
                .unwrap_or_else(Expr::zero))
        }
        "xor" => two(op, args).map(|(a, b)| {
            let either = Expr::binary(BinaryOp::Or, a.clone(), b.clone());
            let both = Expr::binary(BinaryOp::And, a, b);
            Expr::binary(BinaryOp::And, either, Expr::unary(UnaryOp::Not, both))
        }),
        _ => build_builtin(op, args).unwrap_or_else(|| Err(ParseError::UnknownFunction(op.into()))),
    }
}

/// Raw element tree read from the XML text
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    /// Text segments, split at `<sep/>`
    text: Vec<String>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ParseError::markup(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            children: Vec::new(),
            text: vec![String::new()],
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn text(&self) -> String {
        self.text.concat().trim().to_string()
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) if el.name == "sep" => {
            parent.text.push(String::new());
            Ok(())
        }
        Some(parent) => {
            parent.children.push(el);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(ParseError::markup("more than one root element")),
    }
}

fn read_elements(xml: &str) -> Result<Element, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(Element::open(&start)?),
            Ok(Event::Empty(start)) => {
                let el = Element::open(&start)?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| ParseError::markup("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(&text).into_owned();
                    if let Some(last) = top.text.last_mut() {
                        last.push_str(&raw);
                    }
                }
            }
            Ok(Event::Eof) => break,
            // declarations, comments, processing instructions
            Ok(_) => {}
            Err(e) => return Err(ParseError::markup(e.to_string())),
        }
    }
    if let Some(open) = stack.last() {
        return Err(ParseError::markup(format!("unclosed <{}>", open.name)));
    }
    root.ok_or(ParseError::Empty)
}

fn parse_number(text: &str) -> Result<f64, ParseError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| ParseError::markup(format!("invalid number '{text}'")))
}

fn single_child(mut el: Element) -> Result<MathNode, ParseError> {
    if el.children.len() != 1 {
        return Err(ParseError::markup(format!(
            "<{}> must hold exactly one expression",
            el.name
        )));
    }
    convert(el.children.remove(0))
}

fn convert(el: Element) -> Result<MathNode, ParseError> {
    match el.name.as_str() {
        "cn" => {
            let parts: Vec<&str> = el.text.iter().map(|s| s.trim()).collect();
            let value = match (el.attr("type"), parts.as_slice()) {
                (Some("e-notation"), [mantissa, exponent]) => {
                    parse_number(mantissa)? * 10f64.powf(parse_number(exponent)?)
                }
                (Some("rational"), [num, den]) => parse_number(num)? / parse_number(den)?,
                _ => parse_number(&el.text())?,
            };
            Ok(MathNode::Cn(value))
        }
        "ci" => Ok(MathNode::Ci(el.text())),
        "csymbol" => {
            let url = el.attr("definitionURL").unwrap_or_default();
            let name = url.rsplit('/').next().unwrap_or(url);
            Ok(MathNode::Csymbol(name.to_string()))
        }
        "true" | "false" | "pi" | "exponentiale" | "infinity" | "notanumber" => {
            Ok(MathNode::Constant(el.name))
        }
        "semantics" => {
            let first = el
                .children
                .into_iter()
                .next()
                .ok_or_else(|| ParseError::markup("empty <semantics>"))?;
            convert(first)
        }
        "apply" => {
            let mut children = el.children.into_iter();
            let head = children
                .next()
                .ok_or_else(|| ParseError::markup("empty <apply>"))?;
            let mut qualifiers = Vec::new();
            let mut args = Vec::new();
            for child in children {
                if child.name == "logbase" || child.name == "degree" {
                    qualifiers.push(single_child(child)?);
                } else {
                    args.push(convert(child)?);
                }
            }
            qualifiers.extend(args);
            let args = qualifiers;
            match head.name.as_str() {
                "ci" => Ok(MathNode::Call {
                    function: head.text(),
                    args,
                }),
                "csymbol" => match convert(head)? {
                    MathNode::Csymbol(name) => Err(ParseError::UnknownFunction(format!(
                        "csymbol {name}"
                    ))),
                    _ => Err(ParseError::markup("invalid <csymbol> head")),
                },
                op => Ok(MathNode::Apply {
                    op: op.to_string(),
                    args,
                }),
            }
        }
        "piecewise" => {
            let mut pieces = Vec::new();
            let mut otherwise = None;
            for child in el.children {
                match child.name.as_str() {
                    "piece" => {
                        let mut parts = child.children.into_iter();
                        match (parts.next(), parts.next(), parts.next()) {
                            (Some(value), Some(condition), None) => pieces.push(Piece {
                                value: convert(value)?,
                                condition: convert(condition)?,
                            }),
                            _ => return Err(ParseError::markup("<piece> needs value and condition")),
                        }
                    }
                    "otherwise" => otherwise = Some(Box::new(single_child(child)?)),
                    other => {
                        return Err(ParseError::markup(format!(
                            "unexpected <{other}> in <piecewise>"
                        )))
                    }
                }
            }
            Ok(MathNode::Piecewise { pieces, otherwise })
        }
        "lambda" => {
            let mut params = Vec::new();
            let mut body = None;
            for child in el.children {
                if child.name == "bvar" {
                    match single_child(child)? {
                        MathNode::Ci(name) => params.push(name),
                        _ => return Err(ParseError::markup("<bvar> must hold a <ci>")),
                    }
                } else if body.is_none() {
                    body = Some(convert(child)?);
                } else {
                    return Err(ParseError::markup("<lambda> has more than one body"));
                }
            }
            let body = body.ok_or_else(|| ParseError::markup("<lambda> without body"))?;
            Ok(MathNode::Lambda {
                params,
                body: Box::new(body),
            })
        }
        other => Err(ParseError::markup(format!("unsupported element <{other}>"))),
    }
}
