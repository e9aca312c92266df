//! TOML-based configuration for rostersync.
//!
//! Secrets (API keys, passwords, tokens, webhook URLs) are never written
//! inline. Each one is an `_env` field naming an environment variable, and
//! [`AppConfig::resolve_env_vars`] fills in the resolved values at runtime.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::google_contacts::GoogleContactsConfig;
use crate::adapters::google_users::GoogleUsersConfig;
use crate::adapters::rest::{RestApiConfig, RestAuth};
use crate::adapters::webhelpdesk::WebHelpDeskConfig;
use crate::errors::ConfigError;
use crate::models::AttributeMapping;

/// Environment variable consulted when no `--config` path is given.
pub const CONFIG_PATH_ENV: &str = "ROSTERSYNC_CONFIG";

/// Name of the sync set run when none are declared.
pub const DEFAULT_SYNC_SET: &str = "default";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run behaviour (dry run, verbosity, log level).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Where people are read from.
    pub source: SourceConfig,

    /// Where people are written to.
    pub destination: DestinationConfig,

    /// Source-to-destination attribute projection.
    #[serde(default)]
    pub attribute_map: Vec<AttributeMapping>,

    /// Named sync sets. Empty means a single implicit `default` set.
    #[serde(default)]
    pub sync_sets: Vec<SyncSetConfig>,

    /// Alert channels (Slack, email).
    #[serde(default)]
    pub notifications: NotificationConfig,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Verbosity at which the dry-run plan lists every compare key.
pub const VERBOSITY_MEDIUM: u8 = 5;
/// Highest verbosity level.
pub const VERBOSITY_HIGH: u8 = 10;

/// Run behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Compute and report the change set without applying it.
    #[serde(default)]
    pub dry_run: bool,

    /// 0 = low, 5 = medium, 10 = high.
    #[serde(default)]
    pub verbosity: u8,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbosity: 0,
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source & destination
// ---------------------------------------------------------------------------

/// Source adapter selection, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    RestApi(RestApiConfig),
}

/// Destination adapter selection, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DestinationAdapterConfig {
    WebHelpDesk(WebHelpDeskConfig),
    GoogleContacts(GoogleContactsConfig),
    GoogleUsers(GoogleUsersConfig),
}

/// Destination settings shared by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Never create people in the destination.
    #[serde(default)]
    pub disable_add: bool,

    /// Never update people in the destination.
    #[serde(default)]
    pub disable_update: bool,

    /// Never delete people from the destination.
    #[serde(default)]
    pub disable_delete: bool,

    pub adapter: DestinationAdapterConfig,
}

// ---------------------------------------------------------------------------
// Sync sets
// ---------------------------------------------------------------------------

/// One named pass of the reconciliation. The optional tables are handed
/// verbatim to the adapters' `for_set` hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncSetConfig {
    pub name: String,

    #[serde(default)]
    pub source: Option<toml::Table>,

    #[serde(default)]
    pub destination: Option<toml::Table>,
}

impl SyncSetConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    /// Environment variable holding the Slack incoming-webhook URL.
    #[serde(default)]
    pub slack_webhook_url_env: Option<String>,

    /// SMTP server address for email alerts (e.g. `smtp.example.com:587`).
    #[serde(default)]
    pub email_smtp: Option<String>,

    /// SMTP user name, when the relay requires authentication.
    #[serde(default)]
    pub email_username: Option<String>,

    /// Environment variable holding the SMTP password.
    #[serde(default)]
    pub email_password_env: Option<String>,

    /// Sender email address.
    #[serde(default)]
    pub email_from: Option<String>,

    /// Recipient email addresses.
    #[serde(default)]
    pub email_recipients: Vec<String>,

    /// Resolved Slack webhook URL.
    #[serde(skip)]
    pub slack_webhook_url: Option<String>,

    /// Resolved SMTP password.
    #[serde(skip)]
    pub email_password: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Path to load when none is given: `$ROSTERSYNC_CONFIG`, else
    /// `./config.toml`.
    pub fn default_path() -> PathBuf {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from("config.toml"),
        }
    }

    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables and populate the
    /// corresponding resolved fields.
    ///
    /// Missing variables log a warning and leave the resolved field `None`.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        match &mut self.source {
            SourceConfig::RestApi(rest) => {
                if let Some(ref env_name) = rest.password_env {
                    rest.password = resolve_optional_env(env_name, "source.password_env");
                }
                if let Some(ref env_name) = rest.token_env {
                    rest.token = resolve_optional_env(env_name, "source.token_env");
                }
            }
        }

        match &mut self.destination.adapter {
            DestinationAdapterConfig::WebHelpDesk(whd) => {
                whd.api_key = resolve_optional_env(&whd.api_key_env, "destination.adapter.api_key_env");
            }
            DestinationAdapterConfig::GoogleContacts(gc) => {
                gc.token = resolve_optional_env(&gc.token_env, "destination.adapter.token_env");
            }
            DestinationAdapterConfig::GoogleUsers(gu) => {
                gu.token = resolve_optional_env(&gu.token_env, "destination.adapter.token_env");
            }
        }

        if let Some(ref env_name) = self.notifications.slack_webhook_url_env {
            self.notifications.slack_webhook_url =
                resolve_optional_env(env_name, "notifications.slack_webhook_url_env");
        }
        if let Some(ref env_name) = self.notifications.email_password_env {
            self.notifications.email_password =
                resolve_optional_env(env_name, "notifications.email_password_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attribute_map.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "attribute_map".into(),
                detail: "at least one attribute mapping is required".into(),
            });
        }

        let mut seen = HashSet::new();
        for mapping in &self.attribute_map {
            if mapping.source.is_empty() || mapping.destination.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "attribute_map".into(),
                    detail: "mappings need both a source and a destination name".into(),
                });
            }
            if !seen.insert(mapping.destination.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "attribute_map".into(),
                    detail: format!("destination '{}' is mapped twice", mapping.destination),
                });
            }
        }

        match &self.source {
            SourceConfig::RestApi(rest) => {
                if rest.base_url.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "source.base_url".into(),
                        detail: "REST source URL must not be empty".into(),
                    });
                }
                if rest.compare_attribute.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "source.compare_attribute".into(),
                        detail: "compare attribute must not be empty".into(),
                    });
                }
                if rest.auth == RestAuth::Basic && rest.username.is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: "source.username".into(),
                        detail: "basic auth requires a username".into(),
                    });
                }
            }
        }

        match &self.destination.adapter {
            DestinationAdapterConfig::WebHelpDesk(whd) => {
                if whd.url.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "destination.adapter.url".into(),
                        detail: "Web Help Desk URL must not be empty".into(),
                    });
                }
            }
            DestinationAdapterConfig::GoogleContacts(GoogleContactsConfig {
                domain,
                base_url,
                ..
            })
            | DestinationAdapterConfig::GoogleUsers(GoogleUsersConfig {
                domain, base_url, ..
            }) => {
                if base_url.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "destination.adapter.base_url".into(),
                        detail: "Google API URL must not be empty".into(),
                    });
                }
                if domain.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "destination.adapter.domain".into(),
                        detail: "Google domain must not be empty".into(),
                    });
                }
            }
        }

        let mut names = HashSet::new();
        for set in &self.sync_sets {
            if set.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sync_sets.name".into(),
                    detail: "every sync set needs a name".into(),
                });
            }
            if !names.insert(set.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "sync_sets.name".into(),
                    detail: format!("sync set '{}' is declared twice", set.name),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Sync sets to run, in order. Falls back to a single `default` set.
    pub fn sync_sets(&self) -> Vec<SyncSetConfig> {
        if self.sync_sets.is_empty() {
            vec![SyncSetConfig::named(DEFAULT_SYNC_SET)]
        } else {
            self.sync_sets.clone()
        }
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[runtime]
dry_run = true
verbosity = 5
log_level = "debug"

[source]
type = "RestApi"
base_url = "https://hr.example.com/api"
path = "/people"
auth = "bearer"
token_env = "HR_TOKEN"
results_container = "data"
compare_attribute = "email"

[destination]
disable_delete = true

[destination.adapter]
type = "WebHelpDesk"
url = "https://whd.example.com/helpdesk/WebObjects/Helpdesk.woa"
username = "api"
api_key_env = "WHD_API_KEY"

[[attribute_map]]
source = "email"
destination = "email"
required = true

[[attribute_map]]
source = "first_name"
destination = "firstName"

[[sync_sets]]
name = "staff"
source = { path = "/staff" }

[[sync_sets]]
name = "contractors"
source = { path = "/contractors" }

[notifications]
slack_webhook_url_env = "SLACK_URL"
email_smtp = "smtp.example.com:587"
email_from = "sync@example.com"
email_recipients = ["admin@example.com"]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert!(config.runtime.dry_run);
        assert_eq!(config.runtime.verbosity, 5);
        let SourceConfig::RestApi(ref rest) = config.source;
        assert_eq!(rest.auth, RestAuth::Bearer);
        assert_eq!(rest.results_container.as_deref(), Some("data"));
        assert!(matches!(
            config.destination.adapter,
            DestinationAdapterConfig::WebHelpDesk(ref whd) if whd.batch_size_per_minute == 50
        ));
        assert!(config.destination.disable_delete);
        assert!(!config.destination.disable_add);
        assert_eq!(config.attribute_map.len(), 2);
        assert!(config.attribute_map[0].required);
        assert_eq!(config.sync_sets.len(), 2);
        assert_eq!(
            config.sync_sets[1].source.as_ref().and_then(|t| t.get("path")),
            Some(&toml::Value::String("/contractors".into()))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_google_destinations() {
        let contacts = r#"
[source]
type = "RestApi"
base_url = "https://hr.example.com"
path = "/people"
compare_attribute = "email"

[destination.adapter]
type = "GoogleContacts"
domain = "example.com"
token_env = "GOOGLE_TOKEN"
batch_size = 10
batch_delay_seconds = 30

[[attribute_map]]
source = "email"
destination = "email"
"#;
        let config: AppConfig = toml::from_str(contacts).unwrap();
        match config.destination.adapter {
            DestinationAdapterConfig::GoogleContacts(ref gc) => {
                assert_eq!(gc.base_url, "https://www.google.com");
                assert_eq!(gc.batch_size, 10);
            }
            ref other => panic!("unexpected adapter {:?}", other),
        }
        assert!(config.validate().is_ok());

        let users = contacts.replace("GoogleContacts", "GoogleUsers");
        let config: AppConfig = toml::from_str(&users).unwrap();
        assert!(matches!(
            config.destination.adapter,
            DestinationAdapterConfig::GoogleUsers(ref gu) if gu.base_url == "https://admin.googleapis.com"
        ));
    }

    #[test]
    fn test_unknown_adapter_type_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let bad = sample_toml().replace("type = \"WebHelpDesk\"", "type = \"Ldap\"");
        std::fs::write(&path, bad).unwrap();
        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.runtime.log_level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_empty_attribute_map() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.attribute_map.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "attribute_map"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_destination_key() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config
            .attribute_map
            .push(AttributeMapping::new("mail", "email", false));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref detail, .. }) if detail.contains("mapped twice")
        ));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        if let DestinationAdapterConfig::WebHelpDesk(ref mut whd) = config.destination.adapter {
            whd.url = String::new();
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "destination.adapter.url"
        ));
    }

    #[test]
    fn test_validate_rejects_unnamed_sync_set() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.sync_sets.push(SyncSetConfig::named("  "));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync_sets.name"
        ));
    }

    #[test]
    fn test_sync_sets_default() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        let names: Vec<_> = config.sync_sets().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["staff", "contractors"]);

        config.sync_sets.clear();
        assert_eq!(config.sync_sets(), vec![SyncSetConfig::named("default")]);
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("ROSTERSYNC_TEST_HR_TOKEN", "tok");
        std::env::set_var("ROSTERSYNC_TEST_WHD_KEY", "key");

        let toml_str = sample_toml()
            .replace("HR_TOKEN", "ROSTERSYNC_TEST_HR_TOKEN")
            .replace("WHD_API_KEY", "ROSTERSYNC_TEST_WHD_KEY")
            .replace("SLACK_URL", "ROSTERSYNC_TEST_UNSET_SLACK");
        let mut config: AppConfig = toml::from_str(&toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        let SourceConfig::RestApi(ref rest) = config.source;
        assert_eq!(rest.token.as_deref(), Some("tok"));
        match config.destination.adapter {
            DestinationAdapterConfig::WebHelpDesk(ref whd) => {
                assert_eq!(whd.api_key.as_deref(), Some("key"))
            }
            ref other => panic!("unexpected adapter {:?}", other),
        }
        assert!(config.notifications.slack_webhook_url.is_none());

        std::env::remove_var("ROSTERSYNC_TEST_HR_TOKEN");
        std::env::remove_var("ROSTERSYNC_TEST_WHD_KEY");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[source]
type = "RestApi"
base_url = "https://hr.example.com"
path = "/people"
compare_attribute = "email"

[destination.adapter]
type = "WebHelpDesk"
url = "https://whd.example.com"
username = "api"
api_key_env = "WHD_KEY"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert!(!config.runtime.dry_run);
        assert_eq!(config.runtime.verbosity, 0);
        assert_eq!(config.runtime.log_level, "info");
        assert!(config.sync_sets.is_empty());
        assert!(config.notifications.email_recipients.is_empty());
        let SourceConfig::RestApi(ref rest) = config.source;
        assert_eq!(rest.timeout_secs, 30);
        assert_eq!(rest.page_param, "page");
    }
}
