//! Mapping from model identifiers to valid Rust identifiers

use std::collections::{HashMap, HashSet};

use proc_macro2::Span;
use syn::Ident;

/// Strict and reserved keywords of Rust 2021
const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
    "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe",
    "use", "where", "while", "abstract", "become", "box", "do", "final", "macro", "override",
    "priv", "try", "typeof", "unsized", "virtual", "yield", "union",
];

/// Names the emitted source uses for its own items and locals. A model
/// binding with one of these names would shadow the item or, for constants
/// and variants, turn a `let` into a pattern.
pub const INTERNAL_NAMES: &[&str] = &[
    "t", "y", "c", "dy", "v", "jv", "p", "values", "index", "input", "state", "solver", "problem",
    "output", "doses", "final_time", "f64", "usize", "bool", "Some", "None", "Ok", "Err", "Vec",
    "String", "N_STATES", "N_EVENTS", "SPECIES", "JACOBIAN_PATTERN", "DOSE_SPECIES_INDEX",
    "RTOL", "ATOL", "M", "V", "LS", "State", "Constants", "SimulationInput", "SimulationOutput",
    "SimulationError", "EVENT_INITIAL_VALUES", "EVENT_USE_TRIGGER_VALUES", "MODEL_METADATA",
    "PARAMETERS_INFO", "SPECIES_INFO", "DEFAULT_PARAMETERS", "Pending", "Events", "Recorder",
];

/// Turn `raw` into a string that lexes as an identifier
pub fn sanitize(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) || out == "_" {
        out.insert(0, '_');
    }
    if KEYWORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// Assigns every model name a unique Rust identifier
#[derive(Debug, Clone, Default)]
pub struct IdentMap {
    names: HashMap<String, String>,
    taken: HashSet<String>,
}

impl IdentMap {
    /// A map in which the internal names are already taken
    pub fn new() -> Self {
        Self {
            names: HashMap::new(),
            taken: INTERNAL_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Register `raw` and return its identifier; registering twice is a no-op
    pub fn insert(&mut self, raw: &str) -> &str {
        if !self.names.contains_key(raw) {
            let base = sanitize(raw);
            let mut candidate = base.clone();
            let mut n = 1;
            while self.taken.contains(&candidate) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            self.taken.insert(candidate.clone());
            self.names.insert(raw.to_string(), candidate);
        }
        self.names.get(raw).map(String::as_str).unwrap_or_default()
    }

    pub fn get(&self, raw: &str) -> Option<&str> {
        self.names.get(raw).map(String::as_str)
    }

    /// Identifier token for a registered name
    pub fn ident(&self, raw: &str) -> Option<Ident> {
        self.get(raw).map(|name| Ident::new(name, Span::call_site()))
    }

    /// Whether the identifier differs from the model name
    pub fn is_renamed(&self, raw: &str) -> bool {
        self.get(raw).is_some_and(|name| name != raw)
    }
}
