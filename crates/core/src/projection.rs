//! Attribute projection from source keys onto destination keys.
//!
//! Projection never fails. A person missing a required attribute is kept in
//! the output with `changes_disabled` set, so it is neither created nor
//! updated but still shields its destination counterpart from deletion.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{AttributeMapping, Person};

/// Rebuild each source person with only the mapped destination attributes.
pub fn project(source_people: &[Person], mapping: &[AttributeMapping]) -> Vec<Person> {
    let projected: Vec<Person> = source_people
        .iter()
        .map(|person| project_person(person, mapping))
        .collect();

    let degraded = projected.iter().filter(|p| p.changes_disabled).count();
    debug!(
        total = projected.len(),
        degraded, "projected source people onto destination attributes"
    );
    projected
}

fn project_person(person: &Person, mapping: &[AttributeMapping]) -> Person {
    let mut attributes = HashMap::with_capacity(mapping.len());
    let mut missing = Vec::new();

    for entry in mapping {
        match person.attributes.get(&entry.source) {
            Some(value) => {
                attributes.insert(entry.destination.clone(), value.clone());
            }
            None if entry.required => missing.push(entry.source.as_str()),
            None => {}
        }
    }

    if !missing.is_empty() {
        warn!(
            compare_key = %person.compare_key,
            missing = ?missing,
            "person missing required attribute, changes disabled"
        );
    }

    Person {
        compare_key: person.compare_key.clone(),
        external_id: person.external_id.clone(),
        attributes,
        changes_disabled: !missing.is_empty(),
    }
}
