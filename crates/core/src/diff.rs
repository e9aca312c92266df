//! Three-way diff between a projected source listing and a destination listing.
//!
//! People are matched on their lower-cased compare key through a hash index.
//! When a listing holds duplicate keys the first occurrence wins, which is the
//! same tie-break a linear scan would give.
//!
//! Two matched people are identical only if their attribute maps are equal:
//! same key set and same values. An attribute that exists only on the
//! destination side therefore forces an update.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::models::{ChangeSet, Person};

/// Where a source person stands relative to the destination listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonStatus {
    Absent,
    Identical,
    Different,
}

/// Index of a listing by lower-cased compare key, first occurrence wins.
fn index_by_identity(people: &[Person]) -> HashMap<String, &Person> {
    let mut index = HashMap::with_capacity(people.len());
    for person in people {
        if let Entry::Vacant(slot) = index.entry(person.identity()) {
            slot.insert(person);
        }
    }
    index
}

/// Compare one source person against an indexed destination listing.
fn status_in(person: &Person, index: &HashMap<String, &Person>) -> PersonStatus {
    match index.get(&person.identity()) {
        None => PersonStatus::Absent,
        Some(existing) if existing.attributes == person.attributes => PersonStatus::Identical,
        Some(existing) => {
            trace!(
                compare_key = %person.compare_key,
                source = ?person.attributes,
                destination = ?existing.attributes,
                "attributes differ"
            );
            PersonStatus::Different
        }
    }
}

/// Status of `person` within `people`, matching case-insensitively.
pub fn person_status(person: &Person, people: &[Person]) -> PersonStatus {
    status_in(person, &index_by_identity(people))
}

/// Whether `compare_key` matches any person in `people`, case-insensitively.
pub fn is_person_in_list(compare_key: &str, people: &[Person]) -> bool {
    let key = compare_key.to_lowercase();
    people.iter().any(|p| p.identity() == key)
}

/// Build the create/update/delete lists needed to make `destination` match
/// `source`.
///
/// Source people with `changes_disabled` are never created or updated, but
/// still count as present so their destination records are kept.
pub fn generate_change_set(source: &[Person], destination: &[Person]) -> ChangeSet {
    let dest_index = index_by_identity(destination);
    let mut changes = ChangeSet::default();

    for person in source.iter().filter(|p| !p.changes_disabled) {
        match status_in(person, &dest_index) {
            PersonStatus::Absent => changes.create.push(person.clone()),
            PersonStatus::Different => {
                // Updates are addressed through the destination's handle.
                let mut update = person.clone();
                if update.external_id.is_none() {
                    update.external_id = dest_index
                        .get(&person.identity())
                        .and_then(|existing| existing.external_id.clone());
                }
                changes.update.push(update);
            }
            PersonStatus::Identical => {}
        }
    }

    let source_keys: HashSet<String> = source.iter().map(Person::identity).collect();
    changes.delete = destination
        .iter()
        .filter(|p| !source_keys.contains(&p.identity()))
        .cloned()
        .collect();

    debug!(
        create = changes.create.len(),
        update = changes.update.len(),
        delete = changes.delete.len(),
        "generated change set"
    );
    changes
}
