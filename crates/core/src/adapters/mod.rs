//! Source and destination adapters.
//!
//! The reconciliation engine only depends on the [`Source`] and
//! [`Destination`] traits. Each concrete adapter turns its vendor's records
//! into flat [`Person`] values at this boundary, so the projector and diff
//! engine never see vendor schemas.

pub mod google_contacts;
pub mod google_users;
pub mod http;
pub mod rest;
pub mod webhelpdesk;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use crate::config::{DestinationAdapterConfig, SourceConfig};
use crate::errors::AdapterError;
use crate::events::EventSink;
use crate::models::{ChangeResults, ChangeSet, Person};

pub use google_contacts::GoogleContacts;
pub use google_users::GoogleUsers;
pub use rest::RestApiSource;
pub use webhelpdesk::WebHelpDesk;

/// Something people can be listed from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// A fresh source for one sync set: this adapter's configuration with
    /// `overrides` applied. `self` is left untouched.
    fn for_set(&self, overrides: &toml::Table) -> Result<Box<dyn Source>, AdapterError>;

    /// Every person the source knows about. Paginated APIs are fully
    /// drained before returning.
    async fn list_users(&self, desired_attrs: &[String]) -> Result<Vec<Person>, AdapterError>;
}

/// Something people can be listed from and written to.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// A fresh destination for one sync set. `self` is left untouched.
    fn for_set(&self, overrides: &toml::Table) -> Result<Box<dyn Destination>, AdapterError>;

    /// Current destination state, restricted to `desired_attrs` when it is
    /// non-empty.
    async fn list_users(&self, desired_attrs: &[String]) -> Result<Vec<Person>, AdapterError>;

    /// Apply a change set, honouring the adapter's batch window and
    /// reporting every attempt to `events`. Individual failures are logged,
    /// never returned.
    async fn apply_change_set(&self, changes: ChangeSet, events: &EventSink) -> ChangeResults;
}

/// Build the configured source adapter.
pub fn build_source(config: &SourceConfig) -> Result<Box<dyn Source>, AdapterError> {
    let source: Box<dyn Source> = match config {
        SourceConfig::RestApi(cfg) => Box::new(RestApiSource::new(cfg.clone())?),
    };
    info!(source = source.name(), "source adapter ready");
    Ok(source)
}

/// Build the configured destination adapter.
pub fn build_destination(
    config: &DestinationAdapterConfig,
) -> Result<Box<dyn Destination>, AdapterError> {
    let destination: Box<dyn Destination> = match config {
        DestinationAdapterConfig::WebHelpDesk(cfg) => Box::new(WebHelpDesk::new(cfg.clone())?),
        DestinationAdapterConfig::GoogleContacts(cfg) => {
            Box::new(GoogleContacts::new(cfg.clone())?)
        }
        DestinationAdapterConfig::GoogleUsers(cfg) => Box::new(GoogleUsers::new(cfg.clone())?),
    };
    info!(destination = destination.name(), "destination adapter ready");
    Ok(destination)
}

/// Keep only the attributes in `desired`; an empty list keeps everything.
pub(crate) fn retain_desired(attributes: &mut HashMap<String, String>, desired: &[String]) {
    if !desired.is_empty() {
        attributes.retain(|k, _| desired.iter().any(|d| d == k));
    }
}

/// Read a string override from a sync-set table.
pub(crate) fn override_str<'a>(
    overrides: &'a toml::Table,
    key: &str,
) -> Result<Option<&'a str>, AdapterError> {
    match overrides.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(AdapterError::InvalidConfig(format!(
            "sync set override '{}' must be a string, got {}",
            key,
            other.type_str()
        ))),
    }
}
