//! Generic JSON REST API source.
//!
//! Fetches a list of people from `{base_url}{path}`. The response is either a
//! JSON array or an object holding the array under `results_container`. Each
//! element's scalar fields become attributes; nested objects are flattened to
//! dotted keys (`name.first`). When `page_size` is set the endpoint is read
//! page by page until a short page comes back.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::http::{build_client, check_response, default_timeout_secs, scalar_to_string, trim_base_url};
use super::{override_str, Source};
use crate::errors::AdapterError;
use crate::models::Person;

/// How to authenticate against the REST source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestAuth {
    #[default]
    None,
    Basic,
    Bearer,
}

/// REST source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiConfig {
    /// Root URL of the API, e.g. `https://hr.example.com/api`.
    pub base_url: String,

    /// Path of the people listing, appended to `base_url`.
    pub path: String,

    #[serde(default)]
    pub auth: RestAuth,

    /// Username for basic auth.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the basic-auth password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Key of the array in an object-shaped response.
    #[serde(default)]
    pub results_container: Option<String>,

    /// Attribute whose value becomes the compare key.
    pub compare_attribute: String,

    /// Records per page; unset means the endpoint is not paginated.
    #[serde(default)]
    pub page_size: Option<u32>,

    #[serde(default = "default_page_param")]
    pub page_param: String,

    #[serde(default = "default_page_size_param")]
    pub page_size_param: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,

    /// Resolved bearer token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_page_param() -> String {
    "page".into()
}
fn default_page_size_param() -> String {
    "limit".into()
}

impl RestApiConfig {
    pub fn new(base_url: impl Into<String>, path: impl Into<String>, compare_attribute: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            auth: RestAuth::None,
            username: None,
            password_env: None,
            token_env: None,
            results_container: None,
            compare_attribute: compare_attribute.into(),
            page_size: None,
            page_param: default_page_param(),
            page_size_param: default_page_size_param(),
            timeout_secs: default_timeout_secs(),
            password: None,
            token: None,
        }
    }
}

/// People source backed by a JSON REST endpoint.
#[derive(Clone)]
pub struct RestApiSource {
    config: RestApiConfig,
    http: reqwest::Client,
}

impl RestApiSource {
    pub fn new(mut config: RestApiConfig) -> Result<Self, AdapterError> {
        if config.base_url.is_empty() {
            return Err(AdapterError::InvalidConfig("rest source base_url is empty".into()));
        }
        if config.compare_attribute.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "rest source compare_attribute is empty".into(),
            ));
        }
        config.base_url = trim_base_url(&config.base_url);
        let http = build_client(config.timeout_secs)?;
        info!(base_url = %config.base_url, path = %config.path, "created REST source");
        Ok(Self { config, http })
    }

    fn request(&self, url: &str) -> Result<reqwest::RequestBuilder, AdapterError> {
        let req = self.http.get(url);
        match self.config.auth {
            RestAuth::None => Ok(req),
            RestAuth::Basic => {
                let username = self.config.username.as_deref().ok_or_else(|| {
                    AdapterError::InvalidConfig("basic auth requires a username".into())
                })?;
                Ok(req.basic_auth(username, self.config.password.as_deref()))
            }
            RestAuth::Bearer => {
                let token = self.config.token.as_deref().ok_or_else(|| {
                    AdapterError::InvalidConfig("bearer auth requires a resolved token".into())
                })?;
                Ok(req.bearer_auth(token))
            }
        }
    }

    async fn fetch_page(&self, page: Option<u32>) -> Result<Vec<Value>, AdapterError> {
        let url = format!("{}{}", self.config.base_url, self.config.path);
        let mut req = self.request(&url)?;
        if let (Some(page), Some(size)) = (page, self.config.page_size) {
            req = req.query(&[
                (self.config.page_param.as_str(), page.to_string()),
                (self.config.page_size_param.as_str(), size.to_string()),
            ]);
        }
        let resp = check_response(req.send().await?).await?;
        let body: Value = resp.json().await?;
        extract_results(body, self.config.results_container.as_deref())
    }
}

#[async_trait]
impl Source for RestApiSource {
    fn name(&self) -> &str {
        "RestApi"
    }

    fn for_set(&self, overrides: &toml::Table) -> Result<Box<dyn Source>, AdapterError> {
        let mut source = self.clone();
        if let Some(path) = override_str(overrides, "path")? {
            debug!(path, "rest source path overridden for sync set");
            source.config.path = path.to_string();
        }
        Ok(Box::new(source))
    }

    #[instrument(skip(self, desired_attrs), fields(path = %self.config.path))]
    async fn list_users(&self, desired_attrs: &[String]) -> Result<Vec<Person>, AdapterError> {
        let records = match self.config.page_size.filter(|size| *size > 0) {
            None => self.fetch_page(None).await?,
            Some(size) => {
                let mut all = Vec::new();
                let mut page = 1;
                loop {
                    let batch = self.fetch_page(Some(page)).await?;
                    let short = batch.len() < size as usize;
                    all.extend(batch);
                    if short {
                        break;
                    }
                    page += 1;
                }
                all
            }
        };

        let people = records_to_people(&records, &self.config.compare_attribute, desired_attrs);
        info!(count = people.len(), "listed people from REST source");
        Ok(people)
    }
}

/// Pull the record array out of a response body.
fn extract_results(body: Value, container: Option<&str>) -> Result<Vec<Value>, AdapterError> {
    let list = match container {
        Some(key) => match body {
            Value::Object(mut map) => map.remove(key).ok_or_else(|| {
                AdapterError::Parse(format!("response has no '{}' key", key))
            })?,
            _ => {
                return Err(AdapterError::Parse(format!(
                    "expected an object holding '{}'",
                    key
                )))
            }
        },
        None => body,
    };
    match list {
        Value::Array(items) => Ok(items),
        _ => Err(AdapterError::Parse("expected a JSON array of people".into())),
    }
}

fn records_to_people(records: &[Value], compare_attribute: &str, desired: &[String]) -> Vec<Person> {
    let mut people = Vec::with_capacity(records.len());
    for record in records {
        let Value::Object(fields) = record else {
            warn!("skipping non-object record in REST response");
            continue;
        };
        let mut attributes = HashMap::new();
        flatten_into(&mut attributes, "", fields);

        let Some(compare_key) = attributes.get(compare_attribute).cloned() else {
            warn!(compare_attribute, "skipping record without compare attribute");
            continue;
        };
        super::retain_desired(&mut attributes, desired);
        people.push(Person {
            compare_key,
            external_id: None,
            attributes,
            changes_disabled: false,
        });
    }
    people
}

fn flatten_into(out: &mut HashMap<String, String>, prefix: &str, fields: &Map<String, Value>) {
    for (key, value) in fields {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_into(out, &name, nested),
            other => {
                if let Some(s) = scalar_to_string(other) {
                    out.insert(name, s);
                }
            }
        }
    }
}
