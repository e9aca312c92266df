//! Error types for the rostersync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.
//!
//! Note that individual create/update/delete failures are *not* represented
//! here as returned errors: they are reported through the event log (see
//! [`crate::events`]) so that one bad record never aborts a run.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

// ---------------------------------------------------------------------------
// Adapter errors
// ---------------------------------------------------------------------------

/// Errors raised by source and destination adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// HTTP-level transport error (network, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API returned a non-success status code.
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// The response body could not be interpreted.
    #[error("response parse error: {0}")]
    Parse(String),

    /// The XML feed could not be parsed.
    #[error("XML error: {0}")]
    Xml(String),

    /// The adapter's configuration (or a sync-set override) is unusable.
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),

    /// A person is missing an attribute the adapter needs to address it.
    #[error("person '{compare_key}' is missing attribute '{attribute}'")]
    MissingAttribute {
        compare_key: String,
        attribute: String,
    },

    /// The destination does not support this kind of change.
    #[error("{0} is not supported by this destination")]
    Unsupported(&'static str),
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<quick_xml::Error> for AdapterError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the alerting subsystem (Slack, email).
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Slack webhook delivery failed.
    #[error("Slack notification failed: {0}")]
    SlackError(String),

    /// Email delivery failed.
    #[error("email notification failed: {0}")]
    EmailError(String),

    /// HTTP error during notification delivery.
    #[error("notification HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// All notification channels failed.
    #[error("all notification channels failed: {0}")]
    AllChannelsFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = AdapterError::Api {
            status: 503,
            body: "try later".into(),
        };
        assert_eq!(err.to_string(), "API error (HTTP 503): try later");

        let err = AdapterError::MissingAttribute {
            compare_key: "a@x.com".into(),
            attribute: "id".into(),
        };
        assert!(err.to_string().contains("a@x.com"));

        let err = AdapterError::Unsupported("delete");
        assert_eq!(err.to_string(), "delete is not supported by this destination");

        let err = ConfigError::EnvVarMissing {
            var: "WHD_API_KEY".into(),
            field: "destination.adapter.api_key_env".into(),
        };
        assert!(err.to_string().contains("WHD_API_KEY"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err: CoreError = AdapterError::Parse("bad".into()).into();
        assert!(matches!(err, CoreError::Adapter(_)));

        let err: CoreError = ConfigError::FileNotFound("x.toml".into()).into();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: AdapterError = json_err.into();
        assert!(matches!(err, AdapterError::Parse(_)));
    }
}
