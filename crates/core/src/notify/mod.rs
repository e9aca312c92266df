//! Alerting for failed sync sets.
//!
//! Supports Slack webhook and SMTP email channels. The [`Notifier`] facade
//! dispatches to all configured channels and logs failures without aborting.

pub mod email;
pub mod slack;

use tracing::{error, info, warn};

use crate::config::NotificationConfig;
use crate::errors::NotificationError;
use crate::reconcile::SyncSetReport;

/// Error lines included in an alert before the rest are summarised.
const MAX_ALERT_LINES: usize = 20;

/// Unified notifier that dispatches to all configured channels.
pub struct Notifier {
    slack: Option<slack::SlackNotifier>,
    email: Option<email::EmailNotifier>,
}

impl Notifier {
    /// Create a new notifier from the notification configuration. Channels
    /// that are only partly configured stay disabled.
    pub fn new(config: &NotificationConfig) -> Self {
        let slack = config.slack_webhook_url.as_ref().and_then(|url| {
            match slack::SlackNotifier::new(url.clone()) {
                Ok(notifier) => {
                    info!("Slack alerts enabled");
                    Some(notifier)
                }
                Err(e) => {
                    error!(error = %e, "Slack alerts disabled");
                    None
                }
            }
        });

        let email = match (&config.email_smtp, &config.email_from) {
            (Some(smtp), Some(from)) if !config.email_recipients.is_empty() => {
                info!("email alerts enabled");
                let mut notifier = email::EmailNotifier::new(
                    smtp.clone(),
                    from.clone(),
                    config.email_recipients.clone(),
                );
                if let (Some(user), Some(password)) =
                    (&config.email_username, &config.email_password)
                {
                    notifier = notifier.with_credentials(user.clone(), password.clone());
                }
                Some(notifier)
            }
            _ => None,
        };

        Self { slack, email }
    }

    /// Alert every configured channel that a sync set failed.
    ///
    /// Returns an error only when every configured channel failed.
    pub async fn notify_set_failure(&self, report: &SyncSetReport) -> Result<(), NotificationError> {
        info!(set = %report.name, "sending sync set failure alert");

        let lines = failure_lines(report);
        let mut errors = Vec::new();

        if let Some(ref slack) = self.slack {
            let message = format_failure_slack(report, &lines);
            if let Err(e) = slack.send_message(&message).await {
                warn!(error = %e, "Slack alert failed");
                errors.push(format!("Slack: {}", e));
            }
        }

        if let Some(ref email) = self.email {
            let subject = format!("[rostersync] Sync set '{}' reported errors", report.name);
            let body = format_failure_email_html(report, &lines);
            if let Err(e) = email.send(&subject, &body).await {
                warn!(error = %e, "email alert failed");
                errors.push(format!("Email: {}", e));
            }
        }

        let total_channels = self.slack.is_some() as usize + self.email.is_some() as usize;
        if total_channels > 0 && errors.len() >= total_channels {
            return Err(NotificationError::AllChannelsFailed(errors.join("; ")));
        }
        Ok(())
    }

    /// Return whether any notification channel is configured.
    pub fn is_configured(&self) -> bool {
        self.slack.is_some() || self.email.is_some()
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Run errors first, then error-severity events, capped at
/// [`MAX_ALERT_LINES`].
fn failure_lines(report: &SyncSetReport) -> Vec<String> {
    let all: Vec<String> = report
        .results
        .errors
        .iter()
        .cloned()
        .chain(report.error_events().map(|e| e.to_string()))
        .collect();
    let mut lines: Vec<String> = all.iter().take(MAX_ALERT_LINES).cloned().collect();
    if all.len() > MAX_ALERT_LINES {
        lines.push(format!("... and {} more", all.len() - MAX_ALERT_LINES));
    }
    lines
}

fn format_failure_slack(report: &SyncSetReport, lines: &[String]) -> String {
    format!(
        ":x: *rostersync: sync set `{}` reported errors*\n\
         *Run:* `{}`\n\
         *Results:* {}\n\
         ```{}```",
        report.name,
        report.run_id,
        report.results,
        lines.join("\n"),
    )
}

fn format_failure_email_html(report: &SyncSetReport, lines: &[String]) -> String {
    let mut html = format!(
        "<html><body>\
        <h2 style=\"color: red;\">Sync set '{}' reported errors</h2>\
        <table style=\"border-collapse: collapse;\">\
        <tr><td style=\"padding: 4px 12px; font-weight: bold;\">Run</td>\
            <td style=\"padding: 4px 12px;\"><code>{}</code></td></tr>\
        <tr><td style=\"padding: 4px 12px; font-weight: bold;\">Started</td>\
            <td style=\"padding: 4px 12px;\">{}</td></tr>\
        <tr><td style=\"padding: 4px 12px; font-weight: bold;\">Results</td>\
            <td style=\"padding: 4px 12px;\">{}</td></tr>\
        </table><ul>",
        html_escape(&report.name),
        report.run_id,
        report.started_at.to_rfc3339(),
        html_escape(&report.results.to_string()),
    );
    for line in lines {
        html.push_str(&format!("<li><pre>{}</pre></li>", html_escape(line)));
    }
    html.push_str("</ul></body></html>");
    html
}

/// Minimal HTML escaping for user-provided strings.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
