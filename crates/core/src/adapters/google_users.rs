//! Google Workspace directory users destination.
//!
//! The directory API hands back loosely typed JSON: phones, locations,
//! relations and external ids are arrays of objects tagged by `type`, and
//! custom schemas are free-form. [`extract_data`] picks the tagged entries
//! this adapter understands and ignores anything of an unexpected shape.
//!
//! Users are provisioned elsewhere, so only updates are applied.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use super::http::{build_client, check_response, default_timeout_secs, trim_base_url};
use super::{retain_desired, Destination};
use crate::batch_timer::BatchTimer;
use crate::dispatch::{self, PersonWriter};
use crate::errors::AdapterError;
use crate::events::EventSink;
use crate::models::{ChangeKind, ChangeResults, ChangeSet, Person};

const USERS_API_PATH: &str = "/admin/directory/v1/users";
const PAGE_SIZE: u32 = 500;

/// Google directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleUsersConfig {
    /// Workspace domain whose users are listed.
    pub domain: String,

    /// Environment variable holding an OAuth access token with the
    /// directory user scope.
    pub token_env: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub batch_size: u32,

    #[serde(default)]
    pub batch_delay_seconds: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Resolved access token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_base_url() -> String {
    "https://admin.googleapis.com".into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    #[serde(default)]
    users: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google directory destination adapter.
#[derive(Clone)]
pub struct GoogleUsers {
    config: GoogleUsersConfig,
    http: reqwest::Client,
}

impl GoogleUsers {
    pub fn new(mut config: GoogleUsersConfig) -> Result<Self, AdapterError> {
        if config.domain.is_empty() {
            return Err(AdapterError::InvalidConfig("google users domain is empty".into()));
        }
        config.base_url = trim_base_url(&config.base_url);
        let http = build_client(config.timeout_secs)?;
        info!(domain = %config.domain, "created Google Users destination");
        Ok(Self { config, http })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        match self.config.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn user_url(&self, email: &str) -> String {
        format!("{}{}/{}", self.config.base_url, USERS_API_PATH, email)
    }

    async fn list_page(&self, page_token: Option<&str>) -> Result<UsersPage, AdapterError> {
        let url = format!("{}{}", self.config.base_url, USERS_API_PATH);
        let mut req = self.request(reqwest::Method::GET, &url).query(&[
            ("domain", self.config.domain.clone()),
            ("maxResults", PAGE_SIZE.to_string()),
            ("projection", "full".to_string()),
        ]);
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }
        let page: UsersPage = check_response(req.send().await?).await?.json().await?;
        debug!(count = page.users.len(), "fetched directory user page");
        Ok(page)
    }
}

#[async_trait]
impl Destination for GoogleUsers {
    fn name(&self) -> &str {
        "GoogleUsers"
    }

    fn for_set(&self, _overrides: &toml::Table) -> Result<Box<dyn Destination>, AdapterError> {
        Ok(Box::new(self.clone()))
    }

    #[instrument(skip(self, desired_attrs), fields(domain = %self.config.domain))]
    async fn list_users(&self, desired_attrs: &[String]) -> Result<Vec<Person>, AdapterError> {
        let mut people = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(page_token.as_deref()).await?;
            for user in &page.users {
                if let Some(mut person) = extract_data(user) {
                    retain_desired(&mut person.attributes, desired_attrs);
                    people.push(person);
                }
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        info!(count = people.len(), "listed Google directory users");
        Ok(people)
    }

    async fn apply_change_set(&self, changes: ChangeSet, events: &EventSink) -> ChangeResults {
        let mut timer = BatchTimer::new(self.config.batch_size, self.config.batch_delay_seconds);
        dispatch::apply_change_set(Arc::new(self.clone()), changes, &mut timer, events).await
    }
}

#[async_trait]
impl PersonWriter for GoogleUsers {
    fn label(&self) -> &str {
        "GoogleUsers"
    }

    fn supports(&self, kind: ChangeKind) -> bool {
        kind == ChangeKind::Update
    }

    async fn create_person(&self, _person: &Person) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("create"))
    }

    #[instrument(skip(self, person), fields(compare_key = %person.compare_key))]
    async fn update_person(&self, person: &Person) -> Result<(), AdapterError> {
        let email = person.attr("email").unwrap_or(&person.compare_key);
        let url = self.user_url(email);
        let existing: Value = check_response(
            self.request(reqwest::Method::GET, &url)
                .query(&[("projection", "full")])
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let body = new_user_for_update(person, &existing);
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// String field of a JSON object; other types are ignored.
fn str_field<'a>(entry: &'a Value, field: &str) -> Option<&'a str> {
    entry.get(field).and_then(Value::as_str)
}

/// `field` of the first array entry whose `type` equals `kind`.
fn find_typed<'a>(list: Option<&'a Value>, kind: &str, field: &str) -> Option<&'a str> {
    list?
        .as_array()?
        .iter()
        .find(|entry| str_field(entry, "type") == Some(kind))
        .and_then(|entry| str_field(entry, field))
}

/// Flatten a directory user into a [`Person`] keyed by primary email.
/// Users without a primary email yield `None`.
pub fn extract_data(user: &Value) -> Option<Person> {
    let email = str_field(user, "primaryEmail")?;
    let mut person = Person::new(email, [("email", email)]);
    let mut set = |key: &str, value: Option<&str>| {
        if let Some(value) = value {
            person.attributes.insert(key.to_string(), value.to_string());
        }
    };

    set("id", find_typed(user.get("externalIds"), "organization", "value"));
    set("area", find_typed(user.get("locations"), "desk", "area"));
    set("phone", find_typed(user.get("phones"), "work", "value"));
    set("manager", find_typed(user.get("relations"), "manager", "value"));

    if let Some(name) = user.get("name") {
        set("givenName", str_field(name, "givenName"));
        set("familyName", str_field(name, "familyName"));
    }

    if let Some(org) = user
        .get("organizations")
        .and_then(Value::as_array)
        .and_then(|orgs| orgs.first())
    {
        set("costCenter", str_field(org, "costCenter"));
        set("department", str_field(org, "department"));
        set("title", str_field(org, "title"));
    }

    if let Some(schemas) = user.get("customSchemas").and_then(Value::as_object) {
        for (schema, fields) in schemas {
            let Some(fields) = fields.as_object() else {
                continue;
            };
            for (field, value) in fields {
                set(&format!("{}.{}", schema, field), value.as_str());
            }
        }
    }

    Some(person)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Replace the entry tagged `kind` with `{type: kind, field: value}` at the
/// front of the list, keeping every other entry untouched.
pub fn update_typed(old: Option<&Value>, kind: &str, field: &str, value: &str) -> Value {
    let mut entry = Map::new();
    entry.insert("type".into(), Value::String(kind.to_string()));
    entry.insert(field.to_string(), Value::String(value.to_string()));
    let mut list = vec![Value::Object(entry)];
    if let Some(entries) = old.and_then(Value::as_array) {
        list.extend(
            entries
                .iter()
                .filter(|entry| str_field(entry, "type") != Some(kind))
                .cloned(),
        );
    }
    Value::Array(list)
}

/// Build the PUT body for `person`, merging into the user's current tagged
/// lists so entries this adapter does not manage survive the update.
pub fn new_user_for_update(person: &Person, existing: &Value) -> Value {
    let mut user = Map::new();
    let mut name = Map::new();
    let mut organization = Map::new();
    let mut schemas: Map<String, Value> = Map::new();

    for (key, value) in &person.attributes {
        match key.as_str() {
            "email" => {}
            "id" => {
                user.insert(
                    "externalIds".into(),
                    update_typed(existing.get("externalIds"), "organization", "value", value),
                );
            }
            "area" => {
                user.insert(
                    "locations".into(),
                    update_typed(existing.get("locations"), "desk", "area", value),
                );
            }
            "phone" => {
                user.insert(
                    "phones".into(),
                    update_typed(existing.get("phones"), "work", "value", value),
                );
            }
            "manager" => {
                user.insert(
                    "relations".into(),
                    update_typed(existing.get("relations"), "manager", "value", value),
                );
            }
            "givenName" | "familyName" => {
                name.insert(key.clone(), Value::String(value.clone()));
            }
            "costCenter" | "department" | "title" => {
                organization.insert(key.clone(), Value::String(value.clone()));
            }
            other => match other.split_once('.') {
                Some((schema, field)) => {
                    let entry = schemas
                        .entry(schema.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(fields) = entry {
                        fields.insert(field.to_string(), Value::String(value.clone()));
                    }
                }
                None => debug!(attribute = other, "attribute not writable in directory"),
            },
        }
    }

    if !name.is_empty() {
        user.insert("name".into(), Value::Object(name));
    }
    if !organization.is_empty() {
        user.insert(
            "organizations".into(),
            Value::Array(vec![Value::Object(organization)]),
        );
    }
    if !schemas.is_empty() {
        user.insert("customSchemas".into(), Value::Object(schemas));
    }
    Value::Object(user)
}
