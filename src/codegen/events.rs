//! Event trigger and assignment blocks

use proc_macro2::{Literal, TokenStream};
use quote::quote;

use crate::codegen::blocks::Blocks;
use crate::error::CompileError;
use crate::expr::Expr;

/// `N_EVENTS`, the per-event flags and the four event functions
pub fn event_items(blocks: &Blocks<'_>) -> Result<TokenStream, CompileError> {
    let events = &blocks.model.events;
    let printer = blocks.printer();
    let n = Literal::usize_unsuffixed(events.len());

    let initial_values = events.iter().map(|e| e.initial_value);
    let trigger_values = events.iter().map(|e| e.use_values_from_trigger_time);

    let triggers = events.iter().map(|e| &e.trigger);
    let trigger_prelude = blocks.prelude(triggers, &[])?;
    let conditions = events
        .iter()
        .map(|e| printer.condition(&e.trigger))
        .collect::<Result<Vec<_>, _>>()?;

    let delays: Vec<&Expr> = events.iter().filter_map(|e| e.delay.as_ref()).collect();
    let delay_prelude = blocks.prelude(delays, &[])?;
    let mut delay_arms = Vec::new();
    for (i, event) in events.iter().enumerate() {
        if let Some(delay) = &event.delay {
            let i = Literal::usize_unsuffixed(i);
            let value = printer.numeric(delay)?;
            delay_arms.push(quote!(#i => #value,));
        }
    }

    let values = events
        .iter()
        .flat_map(|e| e.assignments.iter().map(|a| &a.expr));
    let values_prelude = blocks.prelude(values, &[])?;
    let mut value_arms = Vec::with_capacity(events.len());
    let mut apply_arms = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        let i = Literal::usize_unsuffixed(i);
        let exprs = event
            .assignments
            .iter()
            .map(|a| printer.numeric(&a.expr))
            .collect::<Result<Vec<_>, _>>()?;
        value_arms.push(quote!(#i => vec![#(#exprs),*],));
        let writes = event.assignments.iter().enumerate().map(|(k, a)| {
            let slot = Literal::usize_unsuffixed(a.index);
            let k = Literal::usize_unsuffixed(k);
            quote!(y[#slot] = values[#k];)
        });
        apply_arms.push(quote!(#i => { #(#writes)* }));
    }

    Ok(quote! {
        pub const N_EVENTS: usize = #n;
        /// Trigger value assumed just before `t = 0`
        pub const EVENT_INITIAL_VALUES: [bool; N_EVENTS] = [#(#initial_values),*];
        /// Whether assignment values are computed when the trigger fires
        /// rather than when a delayed event executes
        pub const EVENT_USE_TRIGGER_VALUES: [bool; N_EVENTS] = [#(#trigger_values),*];

        pub fn event_triggers(t: f64, y: &[f64], c: &Constants) -> [bool; N_EVENTS] {
            #trigger_prelude
            [#(#conditions),*]
        }

        pub fn event_delay(index: usize, t: f64, y: &[f64], c: &Constants) -> f64 {
            #delay_prelude
            match index {
                #(#delay_arms)*
                _ => 0.0,
            }
        }

        /// Values of the event's assignments, in declaration order
        pub fn event_values(index: usize, t: f64, y: &[f64], c: &Constants) -> Vec<f64> {
            #values_prelude
            match index {
                #(#value_arms)*
                _ => Vec::new(),
            }
        }

        pub fn apply_event(index: usize, values: &[f64], y: &mut [f64]) {
            match index {
                #(#apply_arms)*
                _ => {}
            }
        }
    })
}
