//! JSON document layout of a [`Model`]
//!
//! JSON objects may repeat a key and a plain map keeps only the last value.
//! The document keeps every entry so that a repeated identifier is reported
//! instead of silently replacing the earlier declaration.

use std::fmt;
use std::marker::PhantomData;

use ordermap::OrderMap;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use super::{
    Compartment, Event, FunctionDefinition, MathSource, Model, Parameter, Reaction, Rule, Species,
};
use crate::error::ValidationError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ModelDocument {
    id: String,

    #[serde(default)]
    name: Option<String>,

    #[serde(default, deserialize_with = "entries")]
    species: Vec<(String, Species)>,

    #[serde(default, deserialize_with = "entries")]
    parameters: Vec<(String, Parameter)>,

    #[serde(default, deserialize_with = "entries")]
    compartments: Vec<(String, Compartment)>,

    #[serde(default, deserialize_with = "entries")]
    reactions: Vec<(String, Reaction)>,

    #[serde(default)]
    rules: Vec<Rule>,

    #[serde(default)]
    events: Vec<Event>,

    #[serde(default, deserialize_with = "entries")]
    functions: Vec<(String, FunctionDefinition)>,

    #[serde(default, deserialize_with = "entries")]
    initial_assignments: Vec<(String, MathSource)>,
}

/// Object entries in document order, repeats included
fn entries<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct Entries<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for Entries<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object keyed by identifier")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, V>()? {
                out.push(entry);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(Entries(PhantomData))
}

fn unique<V>(
    section: &str,
    entries: Vec<(String, V)>,
) -> Result<OrderMap<String, V>, ValidationError> {
    let mut map = OrderMap::with_capacity(entries.len());
    for (key, value) in entries {
        if map.contains_key(&key) {
            return Err(ValidationError::DuplicateIdentifier {
                name: key,
                first: section.to_string(),
                second: section.to_string(),
            });
        }
        map.insert(key, value);
    }
    Ok(map)
}

impl TryFrom<ModelDocument> for Model {
    type Error = ValidationError;

    fn try_from(document: ModelDocument) -> Result<Self, Self::Error> {
        Ok(Model {
            id: document.id,
            name: document.name,
            species: unique("species", document.species)?,
            parameters: unique("parameter", document.parameters)?,
            compartments: unique("compartment", document.compartments)?,
            reactions: unique("reaction", document.reactions)?,
            rules: document.rules,
            events: document.events,
            functions: unique("function", document.functions)?,
            initial_assignments: unique("initial assignment", document.initial_assignments)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;

    #[test]
    fn test_repeated_species_key_is_rejected() {
        let json = r#"{
            "id": "twice",
            "species": {
                "A": { "initialAmount": 1.0 },
                "A": { "initialAmount": 5.0 }
            }
        }"#;
        let err = Model::from_str(json).unwrap_err();
        assert!(
            matches!(
                err,
                CompileError::Validation(ValidationError::DuplicateIdentifier {
                    ref name,
                    ref first,
                    ..
                }) if name == "A" && first == "species"
            ),
            "{err}"
        );
    }

    #[test]
    fn test_repeated_keys_in_every_section() {
        for (section, entry) in [
            ("parameters", r#"{ "value": 1 }"#),
            ("compartments", r#"{ "size": 1 }"#),
            ("reactions", r#"{ "kineticLaw": "1" }"#),
            ("functions", r#"{ "arguments": [], "math": "1" }"#),
            ("initialAssignments", r#""1""#),
        ] {
            let json =
                format!(r#"{{ "id": "twice", "{section}": {{ "x": {entry}, "x": {entry} }} }}"#);
            let err = Model::from_str(&json).unwrap_err();
            assert!(
                matches!(
                    err,
                    CompileError::Validation(ValidationError::DuplicateIdentifier { ref name, .. })
                        if name == "x"
                ),
                "{section}: {err}"
            );
        }
    }

    #[test]
    fn test_generic_deserialization_also_rejects_repeats() {
        let json = r#"{ "id": "twice", "parameters": { "k": { "value": 1 }, "k": { "value": 2 } } }"#;
        let err = serde_json::from_str::<Model>(json).unwrap_err();
        assert!(err.to_string().contains("'k'"), "{err}");
    }

    #[test]
    fn test_distinct_keys_keep_document_order() {
        let json = r#"{ "id": "ok", "species": { "B": {}, "A": {}, "C": {} } }"#;
        let model = Model::from_str(json).unwrap();
        let ids: Vec<&str> = model.species.keys().map(String::as_str).collect();
        assert_eq!(ids, ["B", "A", "C"]);
    }
}
