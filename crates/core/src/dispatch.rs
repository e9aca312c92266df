//! Concurrent, rate-limited application of a change set.
//!
//! Each create, update and delete becomes its own tokio task. A
//! [`BatchTimer`] is awaited before every spawn, so the timer paces how fast
//! operations *start* while they run concurrently. All tasks are joined once
//! at the end, after which the shared counters are read.
//!
//! Counters are only incremented on confirmed success. A failed operation is
//! reported to the event sink and the remaining operations carry on.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::batch_timer::BatchTimer;
use crate::errors::AdapterError;
use crate::events::EventSink;
use crate::models::{ChangeCounters, ChangeKind, ChangeResults, ChangeSet, Person};

/// Per-record write operations of a destination.
///
/// Destinations implement this and hand themselves to [`apply_change_set`]
/// from their `Destination::apply_change_set`.
#[async_trait]
pub trait PersonWriter: Send + Sync + 'static {
    /// Short label used in event messages.
    fn label(&self) -> &str;

    /// Whether this destination can perform `kind` at all.
    fn supports(&self, kind: ChangeKind) -> bool {
        let _ = kind;
        true
    }

    async fn create_person(&self, person: &Person) -> Result<(), AdapterError>;

    async fn update_person(&self, person: &Person) -> Result<(), AdapterError>;

    async fn delete_person(&self, person: &Person) -> Result<(), AdapterError> {
        let _ = person;
        Err(AdapterError::Unsupported("delete"))
    }
}

/// Apply every change in `changes` through `writer`, pacing starts with
/// `timer`, and return the number of confirmed successes per kind.
pub async fn apply_change_set<W: PersonWriter>(
    writer: Arc<W>,
    changes: ChangeSet,
    timer: &mut BatchTimer,
    events: &EventSink,
) -> ChangeResults {
    let counters = Arc::new(ChangeCounters::new());
    let mut tasks = JoinSet::new();

    info!(
        destination = writer.label(),
        create = changes.create.len(),
        update = changes.update.len(),
        delete = changes.delete.len(),
        max_per_window = timer.max_per_window(),
        window_secs = timer.window().as_secs_f64(),
        "applying change set"
    );

    let batches = [
        (ChangeKind::Create, changes.create),
        (ChangeKind::Update, changes.update),
        (ChangeKind::Delete, changes.delete),
    ];

    for (kind, people) in batches {
        if people.is_empty() {
            continue;
        }
        if !writer.supports(kind) {
            events.warning(format!(
                "{}: skipping {} planned {}(s), {} is not supported",
                writer.label(),
                people.len(),
                kind,
                kind
            ));
            continue;
        }

        for person in people {
            timer.admit().await;
            let writer = Arc::clone(&writer);
            let counters = Arc::clone(&counters);
            let events = events.clone();
            tasks.spawn(async move {
                apply_one(writer.as_ref(), kind, &person, &counters, &events).await;
            });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "apply task did not complete");
            events.error(format!("{}: apply task did not complete: {}", writer.label(), e));
        }
    }

    let results = counters.snapshot();
    info!(destination = writer.label(), %results, "change set applied");
    results
}

async fn apply_one<W: PersonWriter>(
    writer: &W,
    kind: ChangeKind,
    person: &Person,
    counters: &ChangeCounters,
    events: &EventSink,
) {
    let outcome = match kind {
        ChangeKind::Create => writer.create_person(person).await,
        ChangeKind::Update => writer.update_person(person).await,
        ChangeKind::Delete => writer.delete_person(person).await,
    };

    match outcome {
        Ok(()) => {
            debug!(%kind, compare_key = %person.compare_key, "applied");
            counters.record(kind);
            events.info(format!("{} {}: {}", writer.label(), kind, person.compare_key));
        }
        Err(e) => {
            events.error(format!(
                "{}: unable to {} {}: {}",
                writer.label(),
                kind,
                person.compare_key,
                e
            ));
        }
    }
}
