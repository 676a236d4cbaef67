//! Labeled code blocks of the emitted simulator
//!
//! Each emitted function starts with a prelude that binds exactly the
//! symbols its outputs read: time, state slots, fields of `Constants`, then
//! the dynamic assignment rules and temporaries they need, in evaluation
//! order. Nothing unused is bound.

use std::collections::HashSet;

use proc_macro2::{Literal, TokenStream};
use quote::quote;

use crate::codegen::ident::IdentMap;
use crate::codegen::printer::{literal, Printer};
use crate::error::CompileError;
use crate::expr::{Expr, TIME};
use crate::symbolic::{Assignment, CompiledModel, InputKind, OptimizedSystem};

pub struct Blocks<'a> {
    pub model: &'a CompiledModel,
    pub optimized: &'a OptimizedSystem,
    pub idents: IdentMap,
}

impl<'a> Blocks<'a> {
    pub fn new(model: &'a CompiledModel, optimized: &'a OptimizedSystem) -> Self {
        let mut idents = IdentMap::new();
        for (name, _) in model.symbols.iter() {
            idents.insert(name);
        }
        for temp in &optimized.temporaries {
            idents.insert(&temp.target);
        }
        Self {
            model,
            optimized,
            idents,
        }
    }

    pub fn printer(&self) -> Printer<'_> {
        Printer::new(&self.idents)
    }

    fn ident(&self, name: &str) -> Result<syn::Ident, CompileError> {
        self.printer().symbol(name)
    }

    /// Inputs that are not initial amounts of a state
    fn constant_inputs(&self) -> impl Iterator<Item = &str> {
        self.model
            .inputs
            .iter()
            .filter(|i| i.kind != InputKind::Species || self.model.ode.index_of(&i.name).is_none())
            .map(|i| i.name.as_str())
    }

    /// Fields of `Constants`: constant inputs, then static rule targets
    pub fn constant_fields(&self) -> Vec<&str> {
        self.constant_inputs()
            .chain(self.model.rules.static_rules.iter().map(|r| r.target.as_str()))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Preludes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Bindings, rules and temporaries read by `outputs`
    pub fn prelude<'e>(
        &self,
        outputs: impl IntoIterator<Item = &'e Expr>,
        temporaries: &[Assignment],
    ) -> Result<TokenStream, CompileError> {
        let mut needed: HashSet<&str> = HashSet::new();
        for expr in outputs {
            needed.extend(expr.free_symbols());
        }
        let temps = take_needed(temporaries, &mut needed);
        let rules = take_needed(&self.model.rules.dynamic_rules, &mut needed);

        let produced: HashSet<&str> = temps
            .iter()
            .chain(&rules)
            .map(|a| a.target.as_str())
            .collect();
        let fields: HashSet<&str> = self.constant_fields().into_iter().collect();

        let mut bindings = Vec::new();
        for (name, _) in self.model.symbols.iter() {
            if !needed.contains(name) || produced.contains(name) {
                continue;
            }
            let ident = self.ident(name)?;
            if name == TIME {
                bindings.push(quote!(let #ident = t;));
            } else if let Some(index) = self.model.ode.index_of(name) {
                let index = Literal::usize_unsuffixed(index);
                bindings.push(quote!(let #ident = y[#index];));
            } else if fields.contains(name) {
                bindings.push(quote!(let #ident = c.#ident;));
            } else {
                return Err(CompileError::codegen(format!(
                    "symbol '{name}' is read but has no value"
                )));
            }
        }
        if let Some(unknown) = needed
            .iter()
            .find(|n| !produced.contains(**n) && !self.model.symbols.contains(**n))
        {
            return Err(CompileError::codegen(format!("unknown symbol '{unknown}'")));
        }

        let rules = self.assignments(&rules)?;
        let temps = self.assignments(&temps)?;
        Ok(quote! {
            #(#bindings)*
            #rules
            #temps
        })
    }

    /// `let target = expr;` for each assignment, in order
    pub fn assignments(&self, assignments: &[&Assignment]) -> Result<TokenStream, CompileError> {
        let printer = self.printer();
        let mut out = TokenStream::new();
        for assignment in assignments {
            let target = self.ident(&assignment.target)?;
            let value = printer.numeric(&assignment.expr)?;
            out.extend(quote!(let #target = #value;));
        }
        Ok(out)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Model functions
    // ═══════════════════════════════════════════════════════════════════════════

    /// `Constants` and its constructor running the static rules
    pub fn constants(&self) -> Result<TokenStream, CompileError> {
        let fields = self
            .constant_fields()
            .into_iter()
            .map(|name| self.ident(name))
            .collect::<Result<Vec<_>, _>>()?;
        let inputs = self
            .constant_inputs()
            .map(|name| {
                let ident = self.ident(name)?;
                Ok(quote!(let #ident = input.#ident;))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        let rules: Vec<&Assignment> = self.model.rules.static_rules.iter().collect();
        let rules = self.assignments(&rules)?;
        Ok(quote! {
            /// Values fixed for a whole simulation
            #[derive(Debug, Clone, Copy, PartialEq)]
            pub struct Constants {
                #(pub #fields: f64,)*
            }

            impl Constants {
                pub fn new(input: &SimulationInput) -> Self {
                    #(#inputs)*
                    #rules
                    Self { #(#fields),* }
                }
            }
        })
    }

    /// State at `t = 0` before any dose
    pub fn initial_state(&self) -> Result<TokenStream, CompileError> {
        let mut slots = Vec::with_capacity(self.model.ode.len());
        let assigned: HashSet<&str> = self
            .model
            .initial_assignments
            .iter()
            .map(|a| a.target.as_str())
            .collect();
        for (index, species) in self.model.ode.states.iter().enumerate() {
            let index = Literal::usize_unsuffixed(index);
            if assigned.contains(species.as_str()) {
                let default = self
                    .model
                    .species
                    .iter()
                    .find(|s| &s.id == species)
                    .map(|s| s.initial_amount)
                    .unwrap_or(0.0);
                let default = literal(default);
                slots.push(quote!(y[#index] = #default;));
            } else {
                let ident = self.ident(species)?;
                slots.push(quote!(y[#index] = input.#ident;));
            }
        }

        let printer = self.printer();
        let assignments = &self.model.initial_assignments;
        let prelude = if assignments.is_empty() {
            TokenStream::new()
        } else {
            self.prelude(assignments.iter().map(|a| &a.expr), &[])?
        };
        let mut updates = TokenStream::new();
        for assignment in assignments {
            let target = self.ident(&assignment.target)?;
            let value = printer.numeric(&assignment.expr)?;
            let index = self.model.ode.index_of(&assignment.target).ok_or_else(|| {
                CompileError::codegen(format!(
                    "initial assignment target '{}' has no state",
                    assignment.target
                ))
            })?;
            let index = Literal::usize_unsuffixed(index);
            updates.extend(quote! {
                let #target = #value;
                y[#index] = #target;
            });
        }

        Ok(quote! {
            /// State at `t = 0`, with initial assignments applied
            pub fn initial_state(input: &SimulationInput, c: &Constants) -> State {
                let t = 0.0;
                let mut y = [0.0; N_STATES];
                #(#slots)*
                #prelude
                #updates
                State { t, y }
            }
        })
    }

    /// Right-hand side of the ODE system
    pub fn derivatives(&self) -> Result<TokenStream, CompileError> {
        let derivatives = &self.optimized.derivatives;
        let prelude = self.prelude(derivatives, &self.optimized.temporaries)?;
        let printer = self.printer();
        let mut writes = Vec::with_capacity(derivatives.len());
        for (index, expr) in derivatives.iter().enumerate() {
            let index = Literal::usize_unsuffixed(index);
            let value = printer.numeric(expr)?;
            writes.push(quote!(dy[#index] = #value;));
        }
        Ok(quote! {
            /// `dy = f(t, y)`
            pub fn derivatives(t: f64, y: &[f64], c: &Constants, dy: &mut [f64]) {
                #prelude
                #(#writes)*
            }
        })
    }

    /// Values of the non-zero Jacobian entries, in `JACOBIAN_PATTERN` order
    pub fn jacobian(&self) -> Result<TokenStream, CompileError> {
        let entries = &self.optimized.jacobian;
        let prelude = self.prelude(entries.iter().map(|e| &e.expr), &self.optimized.temporaries)?;
        let printer = self.printer();
        let mut writes = Vec::with_capacity(entries.len());
        for (k, entry) in entries.iter().enumerate() {
            let k = Literal::usize_unsuffixed(k);
            let value = printer.numeric(&entry.expr)?;
            writes.push(quote!(values[#k] = #value;));
        }
        Ok(quote! {
            /// `values[k] = J[JACOBIAN_PATTERN[k]]`
            pub fn jacobian(t: f64, y: &[f64], c: &Constants, values: &mut [f64]) {
                #prelude
                #(#writes)*
            }
        })
    }

    /// `(row, col)` of every Jacobian entry
    pub fn jacobian_pattern(&self) -> TokenStream {
        let entries: Vec<TokenStream> = self
            .optimized
            .jacobian
            .iter()
            .map(|e| {
                let row = Literal::usize_unsuffixed(e.row);
                let col = Literal::usize_unsuffixed(e.col);
                quote!((#row, #col))
            })
            .collect();
        let nnz = Literal::usize_unsuffixed(entries.len());
        quote! {
            pub const JACOBIAN_PATTERN: [(usize, usize); #nnz] = [#(#entries),*];
        }
    }

    /// Fields of `SimulationInput`, renamed back to the model names where needed
    pub fn input_fields(&self) -> Result<Vec<TokenStream>, CompileError> {
        self.model
            .inputs
            .iter()
            .map(|input| {
                let ident = self.ident(&input.name)?;
                Ok(if self.idents.is_renamed(&input.name) {
                    let raw = Literal::string(&input.name);
                    quote!(#[serde(rename = #raw)] pub #ident: f64)
                } else {
                    quote!(pub #ident: f64)
                })
            })
            .collect()
    }
}

/// Walk `assignments` backwards keeping those whose target is needed, and
/// mark what they read as needed
fn take_needed<'a>(assignments: &'a [Assignment], needed: &mut HashSet<&'a str>) -> Vec<&'a Assignment> {
    let mut kept = Vec::new();
    for assignment in assignments.iter().rev() {
        if needed.contains(assignment.target.as_str()) {
            needed.extend(assignment.expr.free_symbols());
            kept.push(assignment);
        }
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionOptions, OptimizationLevel};
    use crate::model::Model;
    use crate::symbolic::optimize_combined;

    const MODEL: &str = r#"{
        "id": "pk",
        "species": {
            "Gut": { "initialAmount": 1 },
            "Cen": {},
            "Conc": {}
        },
        "parameters": {
            "ka": { "value": 1 },
            "ke": { "value": 0.2 },
            "V": { "value": 0, "constant": false },
            "BW": { "value": 70 },
            "unused": { "value": 3 }
        },
        "reactions": {
            "abs": { "reactants": [{ "species": "Gut" }], "products": [{ "species": "Cen" }], "kineticLaw": "ka * Gut" },
            "elim": { "reactants": [{ "species": "Cen" }], "kineticLaw": "ke * Conc * V" }
        },
        "rules": [
            { "type": "assignment", "variable": "Conc", "math": "Cen / V" },
            { "type": "assignment", "variable": "V", "math": "0.7 * BW" }
        ]
    }"#;

    fn compiled() -> CompiledModel {
        let model = Model::from_str(MODEL).unwrap();
        CompiledModel::compile(&model, &ConversionOptions::default()).unwrap()
    }

    fn optimized(model: &CompiledModel) -> OptimizedSystem {
        optimize_combined(
            &model.ode,
            &model.jacobian,
            OptimizationLevel::None,
            "x",
            &model.reserved_names(),
        )
        .0
    }

    #[test]
    fn test_constants_hold_inputs_and_static_rules() {
        let model = compiled();
        let opt = optimized(&model);
        let blocks = Blocks::new(&model, &opt);
        assert_eq!(blocks.constant_fields(), vec!["ka", "ke", "BW", "unused", "V"]);
    }

    #[test]
    fn test_prelude_binds_only_what_is_read() {
        let model = compiled();
        let opt = optimized(&model);
        let blocks = Blocks::new(&model, &opt);
        let text = blocks.derivatives().unwrap().to_string();
        assert!(text.contains("let Conc = Cen / V_1"), "{text}");
        assert!(text.contains("let V_1 = c . V_1"), "{text}");
        assert!(!text.contains("unused"), "{text}");
        assert!(!text.contains("let t"), "{text}");
    }

    #[test]
    fn test_reading_an_unbound_symbol_fails() {
        let model = compiled();
        let opt = optimized(&model);
        let blocks = Blocks::new(&model, &opt);
        let stray = Expr::sym("nowhere");
        assert!(matches!(
            blocks.prelude([&stray], &[]),
            Err(CompileError::CodeGen(_))
        ));
    }
}
