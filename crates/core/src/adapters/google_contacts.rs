//! Google (domain shared) Contacts destination.
//!
//! Contacts are exchanged as Atom/GData XML. Listing reads a single feed of
//! up to [`MAX_QUERY_SIZE`] entries; a directory that large is refused rather
//! than partially synced. Updates and deletes fetch the entry first so its
//! etag can be sent as `If-Match`.

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::{CONTENT_TYPE, IF_MATCH};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::http::{build_client, check_response, default_timeout_secs, trim_base_url};
use super::{retain_desired, Destination};
use crate::batch_timer::BatchTimer;
use crate::dispatch::{self, PersonWriter};
use crate::errors::AdapterError;
use crate::events::EventSink;
use crate::models::{ChangeResults, ChangeSet, Person};

pub const MAX_QUERY_SIZE: usize = 10_000;

const ATOM_CONTENT_TYPE: &str = "application/atom+xml";

/// Google Contacts settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleContactsConfig {
    /// Google Apps domain whose shared contacts are managed.
    pub domain: String,

    /// Environment variable holding an OAuth access token with the
    /// contacts feed scope.
    pub token_env: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Operations started per window.
    #[serde(default)]
    pub batch_size: u32,

    /// Window length in seconds.
    #[serde(default)]
    pub batch_delay_seconds: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Resolved access token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_base_url() -> String {
    "https://www.google.com".into()
}

/// One `<entry>` of a contacts feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub etag: String,
    pub self_link: String,
    pub title: String,
    pub full_name: String,
    pub given_name: String,
    pub family_name: String,
    pub primary_email: String,
    pub primary_phone: String,
    pub where_: String,
    pub org_name: String,
    pub org_title: String,
    pub org_job_description: String,
    pub org_department: String,
}

impl Contact {
    fn into_person(self) -> Person {
        Person::new(
            self.primary_email.clone(),
            [
                ("id", self.self_link.clone()),
                ("email", self.primary_email),
                ("phoneNumber", self.primary_phone),
                ("fullName", self.title),
                ("givenName", self.given_name),
                ("familyName", self.family_name),
                ("where", self.where_),
                ("organization", self.org_name),
                ("title", self.org_title),
                ("jobDescription", self.org_job_description),
                ("department", self.org_department),
            ],
        )
        .with_external_id(self.self_link)
    }
}

/// A parsed contacts feed.
#[derive(Debug, Default)]
pub struct ContactFeed {
    pub total: usize,
    pub entries: Vec<Contact>,
}

/// Google Contacts destination adapter.
#[derive(Clone)]
pub struct GoogleContacts {
    config: GoogleContactsConfig,
    http: reqwest::Client,
}

impl GoogleContacts {
    pub fn new(mut config: GoogleContactsConfig) -> Result<Self, AdapterError> {
        if config.domain.is_empty() {
            return Err(AdapterError::InvalidConfig("google contacts domain is empty".into()));
        }
        config.base_url = trim_base_url(&config.base_url);
        let http = build_client(config.timeout_secs)?;
        info!(domain = %config.domain, "created Google Contacts destination");
        Ok(Self { config, http })
    }

    fn feed_url(&self) -> String {
        format!(
            "{}/m8/feeds/contacts/{}/full",
            self.config.base_url, self.config.domain
        )
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, url)
            .header("GData-Version", "3.0");
        match self.config.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_contact(&self, url: &str) -> Result<Contact, AdapterError> {
        let resp = check_response(self.request(Method::GET, url).send().await?).await?;
        let body = resp.text().await?;
        parse_feed(&body)?
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Xml("response holds no contact entry".into()))
    }

    fn entry_url<'a>(&self, person: &'a Person) -> Result<&'a str, AdapterError> {
        person
            .external_id
            .as_deref()
            .or(person.attr("id"))
            .ok_or_else(|| AdapterError::MissingAttribute {
                compare_key: person.compare_key.clone(),
                attribute: "id".into(),
            })
    }
}

#[async_trait]
impl Destination for GoogleContacts {
    fn name(&self) -> &str {
        "GoogleContacts"
    }

    fn for_set(&self, _overrides: &toml::Table) -> Result<Box<dyn Destination>, AdapterError> {
        Ok(Box::new(self.clone()))
    }

    #[instrument(skip(self, desired_attrs), fields(domain = %self.config.domain))]
    async fn list_users(&self, desired_attrs: &[String]) -> Result<Vec<Person>, AdapterError> {
        let resp = self
            .request(Method::GET, &self.feed_url())
            .query(&[("max-results", MAX_QUERY_SIZE.to_string())])
            .send()
            .await?;
        let body = check_response(resp).await?.text().await?;
        let feed = parse_feed(&body)?;
        if feed.total >= MAX_QUERY_SIZE {
            return Err(AdapterError::InvalidConfig(format!(
                "too many entries in Google Contacts directory ({})",
                feed.total
            )));
        }

        let people: Vec<Person> = feed
            .entries
            .into_iter()
            .map(|contact| {
                let mut person = contact.into_person();
                retain_desired(&mut person.attributes, desired_attrs);
                person
            })
            .collect();
        info!(count = people.len(), "listed Google contacts");
        Ok(people)
    }

    async fn apply_change_set(&self, changes: ChangeSet, events: &EventSink) -> ChangeResults {
        let mut timer = BatchTimer::new(self.config.batch_size, self.config.batch_delay_seconds);
        dispatch::apply_change_set(Arc::new(self.clone()), changes, &mut timer, events).await
    }
}

#[async_trait]
impl PersonWriter for GoogleContacts {
    fn label(&self) -> &str {
        "GoogleContacts"
    }

    #[instrument(skip(self, person), fields(compare_key = %person.compare_key))]
    async fn create_person(&self, person: &Person) -> Result<(), AdapterError> {
        let resp = self
            .request(Method::POST, &self.feed_url())
            .header(CONTENT_TYPE, ATOM_CONTENT_TYPE)
            .body(contact_body(person))
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    // Every field is overwritten from the source; fields the source does not
    // carry are cleared in Google.
    #[instrument(skip(self, person), fields(compare_key = %person.compare_key))]
    async fn update_person(&self, person: &Person) -> Result<(), AdapterError> {
        let url = self.entry_url(person)?;
        let existing = self.get_contact(url).await?;
        let resp = self
            .request(Method::PUT, url)
            .header(IF_MATCH, existing.etag)
            .header(CONTENT_TYPE, ATOM_CONTENT_TYPE)
            .body(contact_body(person))
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    #[instrument(skip(self, person), fields(compare_key = %person.compare_key))]
    async fn delete_person(&self, person: &Person) -> Result<(), AdapterError> {
        let url = self.entry_url(person)?;
        let existing = self.get_contact(url).await?;
        let resp = self
            .request(Method::DELETE, url)
            .header(IF_MATCH, existing.etag)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

/// Render the Atom entry sent on create and update.
pub fn contact_body(person: &Person) -> String {
    let field = |key: &str| escape(person.attr(key).unwrap_or_default()).into_owned();
    format!(
        "<atom:entry xmlns:atom='http://www.w3.org/2005/Atom' xmlns:gd='http://schemas.google.com/g/2005'>\n\
         \t<atom:category scheme='http://schemas.google.com/g/2005#kind' term='http://schemas.google.com/contact/2008#contact' />\n\
         \t<gd:name>\n\
         \t\t<gd:fullName>{}</gd:fullName>\n\
         \t\t<gd:givenName>{}</gd:givenName>\n\
         \t\t<gd:familyName>{}</gd:familyName>\n\
         \t</gd:name>\n\
         \t<gd:email rel='http://schemas.google.com/g/2005#work' primary='true' address='{}'/>\n\
         \t<gd:phoneNumber rel='http://schemas.google.com/g/2005#work' primary='true'>{}</gd:phoneNumber>\n\
         \t<gd:where valueString='{}'/>\n\
         \t<gd:organization rel='http://schemas.google.com/g/2005#work' label='Work' primary='true'>\n\
         \t\t<gd:orgName>{}</gd:orgName>\n\
         \t\t<gd:orgTitle>{}</gd:orgTitle>\n\
         \t\t<gd:orgJobDescription>{}</gd:orgJobDescription>\n\
         \t\t<gd:orgDepartment>{}</gd:orgDepartment>\n\
         \t</gd:organization>\n\
         </atom:entry>",
        field("fullName"),
        field("givenName"),
        field("familyName"),
        field("email"),
        field("phoneNumber"),
        field("where"),
        field("organization"),
        field("title"),
        field("jobDescription"),
        field("department"),
    )
}

// ---------------------------------------------------------------------------
// Feed parsing
// ---------------------------------------------------------------------------

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attribute value by local name, unescaped.
fn attr_value(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == name.as_bytes() {
            attr.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn is_primary(e: &BytesStart<'_>) -> bool {
    attr_value(e, "primary").as_deref() == Some("true")
}

/// Handle attributes of an opening (or self-closing) element inside an entry.
fn read_entry_element(contact: &mut Contact, name: &str, e: &BytesStart<'_>) {
    match name {
        "link" => {
            if contact.self_link.is_empty() && attr_value(e, "rel").as_deref() == Some("self") {
                contact.self_link = attr_value(e, "href").unwrap_or_default();
            }
        }
        "email" => {
            if contact.primary_email.is_empty() && is_primary(e) {
                contact.primary_email = attr_value(e, "address").unwrap_or_default();
            }
        }
        "where" => contact.where_ = attr_value(e, "valueString").unwrap_or_default(),
        _ => {}
    }
}

/// Parse a contacts feed, or a single `<entry>` document.
pub fn parse_feed(xml: &str) -> Result<ContactFeed, AdapterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ContactFeed::default();
    let mut current: Option<Contact> = None;
    let mut path: Vec<String> = Vec::new();
    let mut primary_phone_open = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(&e);
                if let Some(contact) = current.as_mut() {
                    if name == "phoneNumber" {
                        primary_phone_open = is_primary(&e);
                    } else {
                        read_entry_element(contact, &name, &e);
                    }
                } else if name == "entry" {
                    current = Some(Contact {
                        etag: attr_value(&e, "etag").unwrap_or_default(),
                        ..Default::default()
                    });
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if let Some(contact) = current.as_mut() {
                    read_entry_element(contact, &local_name(&e), &e);
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                let name = path.last().map(String::as_str).unwrap_or_default();
                let parent = path
                    .len()
                    .checked_sub(2)
                    .and_then(|i| path.get(i))
                    .map(String::as_str)
                    .unwrap_or_default();
                match current.as_mut() {
                    None => {
                        if name == "totalResults" {
                            feed.total = text.trim().parse().map_err(|_| {
                                AdapterError::Xml(format!("bad totalResults '{}'", text))
                            })?;
                        }
                    }
                    Some(contact) => match (parent, name) {
                        ("entry", "id") => contact.id = text,
                        ("entry", "title") => contact.title = text,
                        ("name", "fullName") => contact.full_name = text,
                        ("name", "givenName") => contact.given_name = text,
                        ("name", "familyName") => contact.family_name = text,
                        ("organization", "orgName") => contact.org_name = text,
                        ("organization", "orgTitle") => contact.org_title = text,
                        ("organization", "orgJobDescription") => contact.org_job_description = text,
                        ("organization", "orgDepartment") => contact.org_department = text,
                        (_, "phoneNumber") => {
                            if primary_phone_open && contact.primary_phone.is_empty() {
                                contact.primary_phone = text;
                            }
                        }
                        _ => {}
                    },
                }
            }
            Event::End(_) => {
                if let Some(name) = path.pop() {
                    if name == "entry" {
                        if let Some(contact) = current.take() {
                            feed.entries.push(contact);
                        }
                    } else if name == "phoneNumber" {
                        primary_phone_open = false;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(total = feed.total, entries = feed.entries.len(), "parsed contacts feed");
    Ok(feed)
}
