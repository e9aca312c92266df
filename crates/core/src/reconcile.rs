//! Reconciliation orchestrator.
//!
//! One run walks a fixed state machine:
//!
//! ```text
//! Idle -> FetchingSource -> Projecting -> FetchingDestination -> Diffing
//!      -> DryRunReporting | Applying -> Done
//! ```
//!
//! A failed fetch jumps straight to `Done` with a zero-count result carrying
//! the error. Nothing is retried here; transport retries belong to adapters.
//!
//! [`Reconciler`] runs a run per configured sync set, each with its own event
//! channel, and turns the outcome into a [`SyncSetReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{self, Destination, Source};
use crate::config::{AppConfig, SyncSetConfig, VERBOSITY_MEDIUM};
use crate::diff::generate_change_set;
use crate::errors::{AdapterError, CoreError};
use crate::events::{event_channel, trace_entry, EventSink};
use crate::models::{AttributeMapping, ChangeResults, ChangeSet, EventLogEntry, Person};
use crate::notify::Notifier;
use crate::projection::project;

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// States of a single reconciliation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    FetchingSource,
    Projecting,
    FetchingDestination,
    Diffing,
    DryRunReporting,
    Applying,
    Done,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::FetchingSource => write!(f, "fetching_source"),
            Self::Projecting => write!(f, "projecting"),
            Self::FetchingDestination => write!(f, "fetching_destination"),
            Self::Diffing => write!(f, "diffing"),
            Self::DryRunReporting => write!(f, "dry_run_reporting"),
            Self::Applying => write!(f, "applying"),
            Self::Done => write!(f, "done"),
        }
    }
}

fn enter(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "run state");
    *state = next;
}

/// Run-level switches taken from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub dry_run: bool,
    pub verbosity: u8,
    pub disable_add: bool,
    pub disable_update: bool,
    pub disable_delete: bool,
}

impl ReconcileOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dry_run: config.runtime.dry_run,
            verbosity: config.runtime.verbosity,
            disable_add: config.destination.disable_add,
            disable_update: config.destination.disable_update,
            disable_delete: config.destination.disable_delete,
        }
    }
}

// ---------------------------------------------------------------------------
// Single run
// ---------------------------------------------------------------------------

/// Reconcile `destination` against `source` once.
///
/// Apply failures arrive on `events`; only fetch failures end up in the
/// returned `errors`.
pub async fn reconcile(
    source: &dyn Source,
    destination: &dyn Destination,
    mapping: &[AttributeMapping],
    options: &ReconcileOptions,
    events: &EventSink,
) -> ChangeResults {
    let mut state = RunState::Idle;

    enter(&mut state, RunState::FetchingSource);
    let source_attrs: Vec<String> = mapping.iter().map(|m| m.source.clone()).collect();
    let source_people = match source.list_users(&source_attrs).await {
        Ok(people) => people,
        Err(e) => {
            enter(&mut state, RunState::Done);
            let msg = format!("unable to get users from source {}: {}", source.name(), e);
            error!("{}", msg);
            return ChangeResults::failed(msg);
        }
    };

    enter(&mut state, RunState::Projecting);
    let projected = project(&source_people, mapping);

    enter(&mut state, RunState::FetchingDestination);
    let destination_attrs: Vec<String> = mapping.iter().map(|m| m.destination.clone()).collect();
    let destination_people = match destination.list_users(&destination_attrs).await {
        Ok(people) => people,
        Err(e) => {
            enter(&mut state, RunState::Done);
            let msg = format!(
                "unable to get users from destination {}: {}",
                destination.name(),
                e
            );
            error!("{}", msg);
            return ChangeResults::failed(msg);
        }
    };

    enter(&mut state, RunState::Diffing);
    let mut changes = generate_change_set(&projected, &destination_people);
    apply_toggles(&mut changes, options);
    info!(
        source = source_people.len(),
        destination = destination_people.len(),
        create = changes.create.len(),
        update = changes.update.len(),
        delete = changes.delete.len(),
        "change set computed"
    );

    let results = if options.dry_run {
        enter(&mut state, RunState::DryRunReporting);
        report_plan(&changes, options.verbosity, events);
        ChangeResults::planned(&changes)
    } else {
        enter(&mut state, RunState::Applying);
        destination.apply_change_set(changes, events).await
    };

    enter(&mut state, RunState::Done);
    results
}

/// Drop whole categories the destination is configured never to receive.
fn apply_toggles(changes: &mut ChangeSet, options: &ReconcileOptions) {
    let toggles = [
        (options.disable_add, &mut changes.create, "create"),
        (options.disable_update, &mut changes.update, "update"),
        (options.disable_delete, &mut changes.delete, "delete"),
    ];
    for (disabled, list, kind) in toggles {
        if disabled && !list.is_empty() {
            info!(kind, suppressed = list.len(), "destination changes disabled");
            list.clear();
        }
    }
}

/// Surface a dry-run plan on the event log.
fn report_plan(changes: &ChangeSet, verbosity: u8, events: &EventSink) {
    events.info(format!(
        "dry run: would create {}, update {}, delete {}",
        changes.create.len(),
        changes.update.len(),
        changes.delete.len()
    ));
    if verbosity < VERBOSITY_MEDIUM {
        return;
    }
    let lists: [(&str, &[Person]); 3] = [
        ("create", &changes.create),
        ("update", &changes.update),
        ("delete", &changes.delete),
    ];
    for (kind, people) in lists {
        for person in people {
            events.info(format!("dry run: would {} {}", kind, person.compare_key));
        }
    }
}

// ---------------------------------------------------------------------------
// Sync sets
// ---------------------------------------------------------------------------

/// Outcome of one sync set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSetReport {
    pub name: String,
    pub run_id: Uuid,
    pub results: ChangeResults,
    pub events: Vec<EventLogEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SyncSetReport {
    /// Error-or-worse entries from the event log.
    pub fn error_events(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.events.iter().filter(|e| e.severity.is_error())
    }

    /// Whether this set failed in any way worth alerting on.
    pub fn has_failures(&self) -> bool {
        self.results.has_errors() || self.error_events().next().is_some()
    }
}

type SetAdapters = (Option<Box<dyn Source>>, Option<Box<dyn Destination>>);

/// Runs reconciliation over a list of sync sets with one source and one
/// destination.
pub struct Reconciler {
    source: Box<dyn Source>,
    destination: Box<dyn Destination>,
    mapping: Vec<AttributeMapping>,
    options: ReconcileOptions,
    notifier: Option<Notifier>,
}

impl Reconciler {
    pub fn new(
        source: Box<dyn Source>,
        destination: Box<dyn Destination>,
        mapping: Vec<AttributeMapping>,
        options: ReconcileOptions,
    ) -> Self {
        info!(
            source = source.name(),
            destination = destination.name(),
            dry_run = options.dry_run,
            "initializing reconciler"
        );
        Self {
            source,
            destination,
            mapping,
            options,
            notifier: None,
        }
    }

    /// Build adapters and alerting from a resolved configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        let source = adapters::build_source(&config.source)?;
        let destination = adapters::build_destination(&config.destination.adapter)?;
        let notifier = Notifier::new(&config.notifications);
        let reconciler = Self::new(
            source,
            destination,
            config.attribute_map.clone(),
            ReconcileOptions::from_config(config),
        );
        Ok(if notifier.is_configured() {
            reconciler.with_notifier(notifier)
        } else {
            reconciler
        })
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Run every set in order. A failing set never stops the ones after it.
    pub async fn run_sync_sets(&self, sets: &[SyncSetConfig]) -> Vec<SyncSetReport> {
        let mut reports = Vec::with_capacity(sets.len());
        for set in sets {
            reports.push(self.run_set(set).await);
        }
        reports
    }

    /// Run one sync set and alert if it failed.
    pub async fn run_set(&self, set: &SyncSetConfig) -> SyncSetReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(set = %set.name, %run_id, "starting sync set");

        let (sink, mut log) = event_channel();
        let results = match self.adapters_for(set) {
            Ok((source, destination)) => {
                reconcile(
                    source.as_deref().unwrap_or(self.source.as_ref()),
                    destination.as_deref().unwrap_or(self.destination.as_ref()),
                    &self.mapping,
                    &self.options,
                    &sink,
                )
                .await
            }
            Err(e) => {
                let msg = format!("sync set '{}' rejected its overrides: {}", set.name, e);
                error!("{}", msg);
                ChangeResults::failed(msg)
            }
        };
        drop(sink);

        // Every apply task has joined by now, so the log is complete.
        let events = log.drain();
        for entry in &events {
            trace_entry(&set.name, entry);
        }

        let report = SyncSetReport {
            name: set.name.clone(),
            run_id,
            results,
            events,
            started_at,
            completed_at: Utc::now(),
        };
        info!(set = %report.name, results = %report.results, "sync set finished");

        if report.has_failures() {
            if let Some(ref notifier) = self.notifier {
                if let Err(e) = notifier.notify_set_failure(&report).await {
                    warn!(set = %report.name, error = %e, "failed to send alert");
                }
            }
        }
        report
    }

    /// Adapters built for this set's overrides. `None` runs the set on the
    /// configured adapter.
    fn adapters_for(&self, set: &SyncSetConfig) -> Result<SetAdapters, AdapterError> {
        let source = set
            .source
            .as_ref()
            .map(|overrides| self.source.for_set(overrides))
            .transpose()?;
        let destination = set
            .destination
            .as_ref()
            .map(|overrides| self.destination.for_set(overrides))
            .transpose()?;
        Ok((source, destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::models::Severity;

    #[derive(Clone)]
    struct MockSource {
        people: Result<Vec<Person>, String>,
        requested: Arc<Mutex<Vec<String>>>,
        path: String,
        listed_paths: Arc<Mutex<Vec<String>>>,
    }

    impl MockSource {
        fn new(people: Vec<Person>) -> Self {
            Self {
                people: Ok(people),
                requested: Arc::default(),
                path: "/people".into(),
                listed_paths: Arc::default(),
            }
        }

        fn failing(msg: &str) -> Self {
            Self {
                people: Err(msg.into()),
                requested: Arc::default(),
                path: "/people".into(),
                listed_paths: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Source for MockSource {
        fn name(&self) -> &str {
            "mock-source"
        }

        fn for_set(&self, overrides: &toml::Table) -> Result<Box<dyn Source>, AdapterError> {
            let mut source = self.clone();
            if let Some(path) = adapters::override_str(overrides, "path")? {
                source.path = path.to_string();
            }
            Ok(Box::new(source))
        }

        async fn list_users(&self, desired: &[String]) -> Result<Vec<Person>, AdapterError> {
            *self.requested.lock().unwrap() = desired.to_vec();
            self.listed_paths.lock().unwrap().push(self.path.clone());
            self.people.clone().map_err(AdapterError::Parse)
        }
    }

    #[derive(Default, Clone)]
    struct MockDestination {
        people: Vec<Person>,
        fail_listing: bool,
        apply_calls: Arc<AtomicUsize>,
        applied: Arc<Mutex<Option<ChangeSet>>>,
    }

    #[async_trait]
    impl Destination for MockDestination {
        fn name(&self) -> &str {
            "mock-destination"
        }

        fn for_set(&self, _overrides: &toml::Table) -> Result<Box<dyn Destination>, AdapterError> {
            Ok(Box::new(self.clone()))
        }

        async fn list_users(&self, _desired: &[String]) -> Result<Vec<Person>, AdapterError> {
            if self.fail_listing {
                return Err(AdapterError::Api {
                    status: 500,
                    body: "down".into(),
                });
            }
            Ok(self.people.clone())
        }

        async fn apply_change_set(&self, changes: ChangeSet, events: &EventSink) -> ChangeResults {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            let results = ChangeResults::planned(&changes);
            for person in &changes.update {
                events.info(format!("updated {}", person.compare_key));
            }
            *self.applied.lock().unwrap() = Some(changes);
            results
        }
    }

    fn mapping() -> Vec<AttributeMapping> {
        vec![
            AttributeMapping::new("email", "email", true),
            AttributeMapping::new("name", "name", false),
        ]
    }

    fn scenario() -> (MockSource, MockDestination) {
        let source = MockSource::new(vec![Person::new(
            "a@x.com",
            [("email", "a@x.com"), ("name", "A")],
        )]);
        let destination = MockDestination {
            people: vec![
                Person::new("a@x.com", [("email", "a@x.com"), ("name", "OLD")]),
                Person::new("b@x.com", [("email", "b@x.com")]),
            ],
            ..Default::default()
        };
        (source, destination)
    }

    #[tokio::test]
    async fn test_reconcile_applies_change_set() {
        let (source, destination) = scenario();
        let (sink, mut log) = event_channel();
        let results = reconcile(
            &source,
            &destination,
            &mapping(),
            &ReconcileOptions::default(),
            &sink,
        )
        .await;

        assert_eq!(results.updated, 1);
        assert_eq!(results.deleted, 1);
        assert_eq!(results.created, 0);
        assert_eq!(destination.apply_calls.load(Ordering::SeqCst), 1);
        let applied = destination.applied.lock().unwrap().clone().unwrap();
        assert_eq!(applied.update[0].compare_key, "a@x.com");
        assert_eq!(applied.delete[0].compare_key, "b@x.com");
        assert_eq!(
            *source.requested.lock().unwrap(),
            vec!["email".to_string(), "name".to_string()]
        );
        drop(sink);
        assert_eq!(log.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_never_applies() {
        let (source, destination) = scenario();
        let (sink, mut log) = event_channel();
        let options = ReconcileOptions {
            dry_run: true,
            verbosity: VERBOSITY_MEDIUM,
            ..Default::default()
        };
        let results = reconcile(&source, &destination, &mapping(), &options, &sink).await;

        assert_eq!(destination.apply_calls.load(Ordering::SeqCst), 0);
        assert_eq!((results.created, results.updated, results.deleted), (0, 1, 1));
        let messages: Vec<String> = log.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages[0], "dry run: would create 0, update 1, delete 1");
        assert!(messages.contains(&"dry run: would update a@x.com".to_string()));
        assert!(messages.contains(&"dry run: would delete b@x.com".to_string()));
    }

    #[tokio::test]
    async fn test_dry_run_low_verbosity_reports_counts_only() {
        let (source, destination) = scenario();
        let (sink, mut log) = event_channel();
        let options = ReconcileOptions {
            dry_run: true,
            ..Default::default()
        };
        reconcile(&source, &destination, &mapping(), &options, &sink).await;
        assert_eq!(log.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_is_fatal() {
        let (_, destination) = scenario();
        let source = MockSource::failing("boom");
        let (sink, _log) = event_channel();
        let results = reconcile(
            &source,
            &destination,
            &mapping(),
            &ReconcileOptions::default(),
            &sink,
        )
        .await;

        assert_eq!((results.created, results.updated, results.deleted), (0, 0, 0));
        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].contains("source"));
        assert!(results.errors[0].contains("boom"));
        assert_eq!(destination.apply_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_destination_failure_is_fatal() {
        let (source, mut destination) = scenario();
        destination.fail_listing = true;
        let (sink, _log) = event_channel();
        let results = reconcile(
            &source,
            &destination,
            &mapping(),
            &ReconcileOptions::default(),
            &sink,
        )
        .await;

        assert!(results.has_errors());
        assert!(results.errors[0].contains("destination"));
        assert_eq!(destination.apply_calls.load(Ordering::SeqCst), 0);
    }

    /// Source: a (changed), c (new). Destination: a (old), b (gone).
    fn scenario_with_every_kind() -> (MockSource, MockDestination) {
        let (_, destination) = scenario();
        let source = MockSource::new(vec![
            Person::new("a@x.com", [("email", "a@x.com"), ("name", "A")]),
            Person::new("c@x.com", [("email", "c@x.com"), ("name", "C")]),
        ]);
        (source, destination)
    }

    #[tokio::test]
    async fn test_toggles_suppress_categories() {
        let (source, destination) = scenario_with_every_kind();
        let (sink, _log) = event_channel();
        let results = reconcile(
            &source,
            &destination,
            &mapping(),
            &ReconcileOptions::default(),
            &sink,
        )
        .await;
        assert_eq!((results.created, results.updated, results.deleted), (1, 1, 1));

        let cases = [
            (true, false, false, (0, 1, 1)),
            (false, true, false, (1, 0, 1)),
            (false, false, true, (1, 1, 0)),
            (true, true, true, (0, 0, 0)),
        ];
        for (disable_add, disable_update, disable_delete, expected) in cases {
            let (source, destination) = scenario_with_every_kind();
            let (sink, _log) = event_channel();
            let options = ReconcileOptions {
                disable_add,
                disable_update,
                disable_delete,
                ..Default::default()
            };
            let results = reconcile(&source, &destination, &mapping(), &options, &sink).await;
            assert_eq!(
                (results.created, results.updated, results.deleted),
                expected
            );
            let applied = destination.applied.lock().unwrap().clone().unwrap();
            assert_eq!(applied.create.is_empty(), disable_add);
            assert_eq!(applied.update.is_empty(), disable_update);
            assert_eq!(applied.delete.is_empty(), disable_delete);
        }
    }

    #[tokio::test]
    async fn test_dry_run_counts_reflect_toggles() {
        let (source, destination) = scenario_with_every_kind();
        let (sink, mut log) = event_channel();
        let options = ReconcileOptions {
            dry_run: true,
            verbosity: VERBOSITY_MEDIUM,
            disable_add: true,
            disable_update: true,
            ..Default::default()
        };
        let results = reconcile(&source, &destination, &mapping(), &options, &sink).await;

        assert_eq!(destination.apply_calls.load(Ordering::SeqCst), 0);
        assert_eq!((results.created, results.updated, results.deleted), (0, 0, 1));
        let messages: Vec<String> = log.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages[0], "dry run: would create 0, update 0, delete 1");
        assert!(!messages.iter().any(|m| m.contains("c@x.com")));
        assert!(!messages.iter().any(|m| m.contains("would update")));
    }

    #[tokio::test]
    async fn test_run_sync_sets_reports_each_set() {
        let (source, destination) = scenario();
        let listed_paths = Arc::clone(&source.listed_paths);
        let reconciler = Reconciler::new(
            Box::new(source),
            Box::new(destination),
            mapping(),
            ReconcileOptions::default(),
        );

        let staff = SyncSetConfig {
            name: "staff".into(),
            source: Some(toml::from_str("path = \"/staff\"").unwrap()),
            destination: None,
        };
        let broken = SyncSetConfig {
            name: "broken".into(),
            source: Some(toml::from_str("path = 7").unwrap()),
            destination: None,
        };
        let reports = reconciler
            .run_sync_sets(&[staff, broken, SyncSetConfig::named("default")])
            .await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].name, "staff");
        assert_eq!(reports[0].results.updated, 1);
        assert!(!reports[0].has_failures());
        assert_eq!(reports[0].events.len(), 1);

        assert!(reports[1].results.has_errors());
        assert!(reports[1].has_failures());
        assert!(reports[1].results.errors[0].contains("broken"));

        assert_eq!(reports[2].results.updated, 1);
        assert_ne!(reports[0].run_id, reports[2].run_id);
        assert!(reports[2].completed_at >= reports[2].started_at);

        // The rejected set never lists; the set without overrides is back on
        // the configured path.
        assert_eq!(*listed_paths.lock().unwrap(), vec!["/staff", "/people"]);
    }

    #[tokio::test]
    async fn test_set_overrides_do_not_leak_into_later_sets() {
        let (source, destination) = scenario();
        let listed_paths = Arc::clone(&source.listed_paths);
        let reconciler = Reconciler::new(
            Box::new(source),
            Box::new(destination),
            mapping(),
            ReconcileOptions::default(),
        );

        let contractors = SyncSetConfig {
            name: "contractors".into(),
            source: Some(toml::from_str("path = \"/contractors\"").unwrap()),
            destination: Some(toml::Table::new()),
        };
        reconciler
            .run_sync_sets(&[
                SyncSetConfig::named("all"),
                contractors,
                SyncSetConfig::named("all-again"),
            ])
            .await;

        assert_eq!(
            *listed_paths.lock().unwrap(),
            vec!["/people", "/contractors", "/people"]
        );
    }

    #[test]
    fn test_report_failures_from_events() {
        let report = SyncSetReport {
            name: "s".into(),
            run_id: Uuid::new_v4(),
            results: ChangeResults::default(),
            events: vec![
                EventLogEntry::info("ok"),
                EventLogEntry::new(Severity::Critical, "bad"),
            ],
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };
        assert!(report.has_failures());
        assert_eq!(report.error_events().count(), 1);
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Idle.to_string(), "idle");
        assert_eq!(RunState::FetchingSource.to_string(), "fetching_source");
        assert_eq!(RunState::DryRunReporting.to_string(), "dry_run_reporting");
        assert_eq!(RunState::Done.to_string(), "done");
    }
}
