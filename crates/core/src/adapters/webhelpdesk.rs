//! Web Help Desk destination.
//!
//! In Web Help Desk the people being synced are called "clients". The API
//! authenticates with `username` and `apiKey` query parameters and cannot
//! delete clients, so planned deletes are reported and skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::http::{build_client, check_response, default_timeout_secs, trim_base_url};
use super::{retain_desired, Destination};
use crate::batch_timer::BatchTimer;
use crate::dispatch::{self, PersonWriter};
use crate::errors::AdapterError;
use crate::events::EventSink;
use crate::models::{ChangeKind, ChangeResults, ChangeSet, Person};

pub const CLIENTS_API_PATH: &str = "/ra/Clients";

/// Web Help Desk connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebHelpDeskConfig {
    /// Base URL of the Web Help Desk instance, e.g. `https://whd.example.com/helpdesk/WebObjects/Helpdesk.woa`.
    pub url: String,

    /// API user name.
    pub username: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Clients requested per listing page.
    #[serde(default = "default_page_limit")]
    pub list_clients_page_limit: u32,

    /// Apply operations started per minute.
    #[serde(default = "default_batch_size_per_minute")]
    pub batch_size_per_minute: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Resolved API key (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_page_limit() -> u32 {
    100
}
fn default_batch_size_per_minute() -> u32 {
    50
}

/// A Web Help Desk client record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhdClient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
}

impl WhdClient {
    fn into_person(self) -> Person {
        let id = self.id.map(|id| id.to_string());
        let mut person = Person::new(
            self.email.clone(),
            [
                ("email", self.email),
                ("firstName", self.first_name),
                ("lastName", self.last_name),
                ("username", self.username),
            ],
        );
        if let Some(id) = id {
            person.attributes.insert("id".into(), id.clone());
            person.external_id = Some(id);
        }
        person
    }

    /// Client body without an id, as sent on create.
    fn new_from_person(person: &Person) -> Self {
        Self {
            id: None,
            first_name: person.attr("firstName").unwrap_or_default().to_string(),
            last_name: person.attr("lastName").unwrap_or_default().to_string(),
            email: person.attr("email").unwrap_or_default().to_string(),
            username: person.attr("username").unwrap_or_default().to_string(),
        }
    }

    /// Client body addressed by the destination id, as sent on update.
    fn from_person(person: &Person) -> Result<Self, AdapterError> {
        let id = match person.external_id.as_deref().or(person.attr("id")) {
            Some(raw) => Some(raw.parse::<i64>().map_err(|e| {
                AdapterError::Parse(format!("client id '{}' is not an integer: {}", raw, e))
            })?),
            None => None,
        };
        Ok(Self {
            id,
            ..Self::new_from_person(person)
        })
    }
}

/// Web Help Desk destination adapter.
#[derive(Clone)]
pub struct WebHelpDesk {
    config: WebHelpDeskConfig,
    api_key: String,
    http: reqwest::Client,
}

impl WebHelpDesk {
    pub fn new(mut config: WebHelpDeskConfig) -> Result<Self, AdapterError> {
        if config.url.is_empty() {
            return Err(AdapterError::InvalidConfig("web help desk url is empty".into()));
        }
        let api_key = match config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                return Err(AdapterError::InvalidConfig(format!(
                    "web help desk api key is not set (environment variable {})",
                    config.api_key_env
                )))
            }
        };
        if config.list_clients_page_limit == 0 {
            config.list_clients_page_limit = default_page_limit();
        }
        config.url = trim_base_url(&config.url);
        let http = build_client(config.timeout_secs)?;
        info!(url = %config.url, "created Web Help Desk destination");
        Ok(Self {
            config,
            api_key,
            http,
        })
    }

    fn auth_query(&self) -> [(&str, &str); 2] {
        [
            ("username", self.config.username.as_str()),
            ("apiKey", self.api_key.as_str()),
        ]
    }

    async fn list_page(&self, page: u32) -> Result<Vec<WhdClient>, AdapterError> {
        let url = format!("{}{}", self.config.url, CLIENTS_API_PATH);
        let resp = self
            .http
            .get(&url)
            .query(&self.auth_query())
            .query(&[
                ("limit", self.config.list_clients_page_limit.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?;
        let clients: Vec<WhdClient> = check_response(resp).await?.json().await?;
        debug!(page, count = clients.len(), "fetched client page");
        Ok(clients)
    }
}

#[async_trait]
impl Destination for WebHelpDesk {
    fn name(&self) -> &str {
        "WebHelpDesk"
    }

    fn for_set(&self, _overrides: &toml::Table) -> Result<Box<dyn Destination>, AdapterError> {
        Ok(Box::new(self.clone()))
    }

    #[instrument(skip(self, desired_attrs))]
    async fn list_users(&self, desired_attrs: &[String]) -> Result<Vec<Person>, AdapterError> {
        let mut clients = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_page(page).await?;
            let short = batch.len() < self.config.list_clients_page_limit as usize;
            clients.extend(batch);
            if short {
                break;
            }
            page += 1;
        }

        let people: Vec<Person> = clients
            .into_iter()
            .map(|client| {
                let mut person = client.into_person();
                retain_desired(&mut person.attributes, desired_attrs);
                person
            })
            .collect();
        info!(count = people.len(), "listed Web Help Desk clients");
        Ok(people)
    }

    async fn apply_change_set(&self, changes: ChangeSet, events: &EventSink) -> ChangeResults {
        let mut timer = BatchTimer::new(self.config.batch_size_per_minute, 60);
        dispatch::apply_change_set(Arc::new(self.clone()), changes, &mut timer, events).await
    }
}

#[async_trait]
impl PersonWriter for WebHelpDesk {
    fn label(&self) -> &str {
        "WebHelpDesk"
    }

    fn supports(&self, kind: ChangeKind) -> bool {
        kind != ChangeKind::Delete
    }

    #[instrument(skip(self, person), fields(compare_key = %person.compare_key))]
    async fn create_person(&self, person: &Person) -> Result<(), AdapterError> {
        let client = WhdClient::new_from_person(person);
        let url = format!("{}{}", self.config.url, CLIENTS_API_PATH);
        let resp = self
            .http
            .post(&url)
            .query(&self.auth_query())
            .json(&client)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    #[instrument(skip(self, person), fields(compare_key = %person.compare_key))]
    async fn update_person(&self, person: &Person) -> Result<(), AdapterError> {
        let client = WhdClient::from_person(person)?;
        let id = client.id.ok_or_else(|| AdapterError::MissingAttribute {
            compare_key: person.compare_key.clone(),
            attribute: "id".into(),
        })?;
        let url = format!("{}{}/{}", self.config.url, CLIENTS_API_PATH, id);
        let resp = self
            .http
            .put(&url)
            .query(&self.auth_query())
            .json(&client)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(url: &str) -> WebHelpDeskConfig {
        WebHelpDeskConfig {
            url: url.into(),
            username: "api".into(),
            api_key_env: "WHD_API_KEY".into(),
            list_clients_page_limit: 2,
            batch_size_per_minute: 50,
            timeout_secs: 5,
            api_key: Some("secret".into()),
        }
    }

    #[test]
    fn test_client_into_person() {
        let client = WhdClient {
            id: Some(12),
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            email: "ann@x.com".into(),
            username: "ann".into(),
        };
        let person = client.into_person();
        assert_eq!(person.compare_key, "ann@x.com");
        assert_eq!(person.external_id.as_deref(), Some("12"));
        assert_eq!(person.attr("id"), Some("12"));
        assert_eq!(person.attr("firstName"), Some("Ann"));
    }

    #[test]
    fn test_client_from_person_parses_id() {
        let person = Person::new("a@x.com", [("email", "a@x.com"), ("lastName", "Lee")])
            .with_external_id("7");
        let client = WhdClient::from_person(&person).unwrap();
        assert_eq!(client.id, Some(7));
        assert_eq!(client.last_name, "Lee");
        assert_eq!(client.first_name, "");

        let bad = Person::new("b@x.com", [("id", "seven")]);
        assert!(matches!(WhdClient::from_person(&bad), Err(AdapterError::Parse(_))));
    }

    #[test]
    fn test_client_serializes_camel_case_without_id() {
        let client = WhdClient {
            first_name: "Ann".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&client).unwrap();
        assert_eq!(json["firstName"], "Ann");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_new_rejects_empty_url() {
        let result = WebHelpDesk::new(test_config(""));
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
        let whd = WebHelpDesk::new(test_config("https://whd.example.com/")).unwrap();
        assert!(!whd.supports(ChangeKind::Delete));
        assert!(whd.supports(ChangeKind::Update));
    }

    #[test]
    fn test_new_rejects_missing_api_key() {
        let mut config = test_config("https://whd.example.com");
        config.api_key = None;
        let err = WebHelpDesk::new(config.clone()).err().unwrap();
        assert!(err.to_string().contains("WHD_API_KEY"));

        config.api_key = Some(String::new());
        assert!(matches!(
            WebHelpDesk::new(config),
            Err(AdapterError::InvalidConfig(_))
        ));
    }
}
