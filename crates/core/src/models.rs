//! Domain model types used throughout rostersync.
//!
//! A [`Person`] is the unit being reconciled. Adapters produce fresh people on
//! every run; the projector and diff engine only ever build new values and
//! never mutate the ones they are given.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

/// A person record as seen by a source or destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Identity used for matching. Compared case-insensitively.
    pub compare_key: String,

    /// Destination-specific handle used to address updates and deletes.
    /// `None` for records the destination has never seen.
    #[serde(default)]
    pub external_id: Option<String>,

    /// Flat attribute map. All comparison operates over this.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Excluded from create/update, but still counts as present so its
    /// destination counterpart is not deleted.
    #[serde(default)]
    pub changes_disabled: bool,
}

impl Person {
    /// Create a person with the given compare key and attributes.
    pub fn new<K, V, I>(compare_key: impl Into<String>, attributes: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            compare_key: compare_key.into(),
            external_id: None,
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            changes_disabled: false,
        }
    }

    /// Builder-style setter for the destination handle.
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Lower-cased compare key used as the matching identity.
    pub fn identity(&self) -> String {
        self.compare_key.to_lowercase()
    }

    /// Shorthand for looking up a single attribute.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Attribute mapping
// ---------------------------------------------------------------------------

/// One entry of the source → destination attribute map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Attribute name on the source side.
    pub source: String,

    /// Attribute name the destination expects.
    pub destination: String,

    /// A person missing this attribute has changes disabled.
    #[serde(default)]
    pub required: bool,

    /// Carried through from configuration; matching is always
    /// case-insensitive on the compare key regardless of this flag.
    #[serde(default)]
    pub case_sensitive: bool,
}

impl AttributeMapping {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, required: bool) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            required,
            case_sensitive: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

/// Output of the diff engine. A compare key appears in at most one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub create: Vec<Person>,
    pub update: Vec<Person>,
    pub delete: Vec<Person>,
}

impl ChangeSet {
    /// Total number of planned operations.
    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Change results
// ---------------------------------------------------------------------------

/// Aggregated outcome of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeResults {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Run-level (fatal) errors. Per-operation failures go to the event log.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ChangeResults {
    /// A zero-count result carrying a single fatal error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Default::default()
        }
    }

    /// Predicted counts for a change set (used by dry runs).
    pub fn planned(changes: &ChangeSet) -> Self {
        Self {
            created: changes.create.len() as u64,
            updated: changes.update.len() as u64,
            deleted: changes.delete.len() as u64,
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for ChangeResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created: {}, updated: {}, deleted: {}",
            self.created, self.updated, self.deleted
        )?;
        if !self.errors.is_empty() {
            write!(f, ", errors: {}", self.errors.len())?;
        }
        Ok(())
    }
}

/// Lock-free counters shared by every concurrent apply unit of one run.
#[derive(Debug, Default)]
pub struct ChangeCounters {
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
}

impl ChangeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ChangeKind) {
        let counter = match kind {
            ChangeKind::Create => &self.created,
            ChangeKind::Update => &self.updated,
            ChangeKind::Delete => &self.deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read the counters. Only meaningful once every apply unit has joined.
    pub fn snapshot(&self) -> ChangeResults {
        ChangeResults {
            created: self.created.load(Ordering::Acquire),
            updated: self.updated.load(Ordering::Acquire),
            deleted: self.deleted.load(Ordering::Acquire),
            errors: Vec::new(),
        }
    }
}

/// The three categories of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Syslog-style severity of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    /// Whether this severity should be treated as a failure for alerting.
    pub fn is_error(self) -> bool {
        self <= Severity::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emergency => write!(f, "Emerg"),
            Self::Alert => write!(f, "Alert"),
            Self::Critical => write!(f, "Critical"),
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
            Self::Notice => write!(f, "Notice"),
            Self::Info => write!(f, "Info"),
            Self::Debug => write!(f, "Debug"),
        }
    }
}

/// One progress or failure event from the apply phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub severity: Severity,
    pub message: String,
}

impl EventLogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

impl std::fmt::Display for EventLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}
