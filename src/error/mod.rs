//! Error types for model compilation, validation and simulation

use thiserror::Error;

/// Errors raised while turning expression text or markup into an [`Expr`](crate::expr::Expr)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Character that cannot start any token
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    /// Token that does not fit the grammar at this point
    #[error("unexpected token '{found}' at position {pos}, expected one of {expected:?}")]
    UnexpectedToken {
        pos: usize,
        found: String,
        expected: Vec<String>,
    },

    /// Input ended while more was expected
    #[error("unexpected end of expression, expected one of {expected:?}")]
    UnexpectedEnd { expected: Vec<String> },

    /// Identifier not declared anywhere in the model
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// Function name that is neither a builtin nor a declared function
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Wrong number of arguments in a call
    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    /// Malformed expression markup
    #[error("malformed markup: {0}")]
    Markup(String),

    /// Nothing to parse
    #[error("empty expression")]
    Empty,
}

impl ParseError {
    pub(crate) fn arity(name: impl Into<String>, expected: impl ToString, found: usize) -> Self {
        Self::Arity {
            name: name.into(),
            expected: expected.to_string(),
            found,
        }
    }

    pub(crate) fn markup(message: impl Into<String>) -> Self {
        Self::Markup(message.into())
    }
}

/// Errors that abort a conversion
#[derive(Debug, Error)]
pub enum CompileError {
    // ─────────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Expression could not be parsed
    #[error("failed to parse {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: ParseError,
    },

    /// Model JSON could not be read
    #[error("failed to read model JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Structural problem found by the validation pass
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // ─────────────────────────────────────────────────────────────────────────
    // Semantic Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Assignment rules that depend on each other
    #[error("cyclic dependency between assignment rules: {}", members.join(" -> "))]
    CyclicDependency { members: Vec<String> },

    /// Construct the compiler deliberately refuses
    #[error("unsupported construct in {context}: {message}")]
    UnsupportedConstruct { context: String, message: String },

    /// Function definitions that call themselves, directly or not
    #[error("recursive function expansion: {}", stack.join(" -> "))]
    Recursion { stack: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Code Generation Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The printer met a node it cannot render
    #[error("code generation failed: {0}")]
    CodeGen(String),

    /// Writing generated output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A package builder rejected the generated source
    #[error("package build failed: {0}")]
    Package(String),
}

impl CompileError {
    /// Wrap a parse error with the place it came from
    pub fn parse(context: impl Into<String>, source: ParseError) -> Self {
        Self::Parse {
            context: context.into(),
            source,
        }
    }

    /// Create an unsupported construct error
    pub fn unsupported(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a code generation error
    pub fn codegen(message: impl Into<String>) -> Self {
        Self::CodeGen(message.into())
    }
}

/// Problems found by [`Validator`](crate::model::Validator)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Same identifier declared twice
    #[error("identifier '{name}' is declared as both {first} and {second}")]
    DuplicateIdentifier {
        name: String,
        first: String,
        second: String,
    },

    /// Reference to something that was never declared
    #[error("{context} references undeclared {kind} '{name}'")]
    DanglingReference {
        name: String,
        kind: String,
        context: String,
    },

    /// Reaction participant with a zero coefficient
    #[error("species '{species}' has zero stoichiometry in reaction '{reaction}'")]
    ZeroStoichiometry { reaction: String, species: String },

    /// Rule or assignment target that cannot be assigned
    #[error("{context} cannot target '{name}': {reason}")]
    InvalidTarget {
        name: String,
        context: String,
        reason: String,
    },

    /// Expression that fails to parse against the model's symbols
    #[error("invalid expression in {context}: {source}")]
    InvalidExpression {
        context: String,
        #[source]
        source: ParseError,
    },

    /// A warning promoted to an error by a strict validator
    #[error("strict validation: {0}")]
    Strict(String),
}

impl ValidationError {
    pub(crate) fn dangling(
        name: impl Into<String>,
        kind: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::DanglingReference {
            name: name.into(),
            kind: kind.into(),
            context: context.into(),
        }
    }

    pub(crate) fn invalid_target(
        name: impl Into<String>,
        context: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTarget {
            name: name.into(),
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while evaluating a tree numerically
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("symbol '{0}' has no value")]
    Unbound(String),

    #[error("cannot evaluate unknown function '{0}'")]
    UnknownFunction(String),
}

/// Errors returned by the simulation driver
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Input JSON is malformed or incomplete
    #[error("invalid simulation input: {0}")]
    InvalidInput(String),

    /// The integrator gave up
    #[error("ODE solver failed at t = {time}: {message}")]
    Solver { time: f64, message: String },

    /// State stopped being finite
    #[error("state of species '{species}' became non-finite at t = {time}")]
    NonFinite { species: String, time: f64 },
}

impl From<EvalError> for SimulationError {
    fn from(err: EvalError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
