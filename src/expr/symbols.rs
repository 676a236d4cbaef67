//! Symbol table binding every identifier of a model to its role

use ordermap::OrderMap;
use serde::Serialize;

use crate::expr::TIME;

/// What an identifier stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum SymbolRole {
    /// A species; dynamic species carry their state-vector slot
    Species { index: Option<usize> },
    Parameter,
    Compartment,
    /// Reaction-local parameter
    Local,
    Time,
}

impl SymbolRole {
    /// Human readable kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            SymbolRole::Species { .. } => "species",
            SymbolRole::Parameter => "parameter",
            SymbolRole::Compartment => "compartment",
            SymbolRole::Local => "local parameter",
            SymbolRole::Time => "time",
        }
    }
}

/// Insertion-ordered identifier table
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: OrderMap<String, SymbolRole>,
}

impl SymbolTable {
    /// A table holding only the time symbol
    pub fn new() -> Self {
        let mut symbols = OrderMap::new();
        symbols.insert(TIME.to_string(), SymbolRole::Time);
        Self { symbols }
    }

    /// Convenience constructor binding every name to the same role
    pub fn with_names<'a>(role: SymbolRole, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut table = Self::new();
        for name in names {
            table.symbols.insert(name.to_string(), role);
        }
        table
    }

    /// Bind `name`, returning the existing role if it is already taken
    pub fn insert(&mut self, name: impl Into<String>, role: SymbolRole) -> Result<(), SymbolRole> {
        let name = name.into();
        if let Some(existing) = self.symbols.get(&name) {
            return Err(*existing);
        }
        self.symbols.insert(name, role);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SymbolRole> {
        self.symbols.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// State-vector slot of a dynamic species
    pub fn state_index(&self, name: &str) -> Option<usize> {
        match self.get(name) {
            Some(SymbolRole::Species { index }) => index,
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SymbolRole)> {
        self.symbols.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
