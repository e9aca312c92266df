//! rostersync command-line tool.
//!
//! Runs reconciliation for the configured sync sets, validates configuration
//! files, and writes a starter configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rostersync_core::config::{
    AppConfig, DestinationAdapterConfig, SourceConfig, SyncSetConfig,
};
use rostersync_core::{Reconciler, SyncSetReport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Sync people from a source roster into a destination directory.
#[derive(Parser, Debug)]
#[command(name = "rostersync", version, about = "Reconcile a destination directory against a source roster")]
struct Cli {
    /// Path to the TOML configuration file (default: $ROSTERSYNC_CONFIG or ./config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every configured sync set (or just one).
    Run {
        /// Compute and report changes without applying them.
        #[arg(long)]
        dry_run: bool,

        /// Only run the sync set with this name.
        #[arg(long)]
        set: Option<String>,

        /// Override the log level from the config file (trace, debug, info, warn, error).
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Validate a configuration file.
    Validate,

    /// Generate a starter configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./config.toml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    match cli.command {
        Commands::Run {
            dry_run,
            set,
            log_level,
        } => cmd_run(&config_path, dry_run, set.as_deref(), log_level.as_deref()).await,
        Commands::Validate => {
            init_tracing("warn");
            cmd_validate(&config_path)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { output } => {
            init_tracing("warn");
            cmd_init(&output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: &Path,
    dry_run: bool,
    only_set: Option<&str>,
    log_level: Option<&str>,
) -> Result<ExitCode> {
    let mut config =
        AppConfig::load_from_file(config_path).context("failed to load configuration file")?;
    init_tracing(log_level.unwrap_or(&config.runtime.log_level));

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;
    if dry_run {
        config.runtime.dry_run = true;
    }

    let sets = select_sets(config.sync_sets(), only_set)?;
    let reconciler =
        Reconciler::from_config(&config).context("failed to initialise adapters")?;

    info!(
        sets = sets.len(),
        dry_run = config.runtime.dry_run,
        "starting reconciliation"
    );
    let reports = reconciler.run_sync_sets(&sets).await;

    for report in &reports {
        println!("{}", summary_line(report, config.runtime.dry_run));
    }

    if reports.iter().any(SyncSetReport::has_failures) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn select_sets(sets: Vec<SyncSetConfig>, only: Option<&str>) -> Result<Vec<SyncSetConfig>> {
    let Some(name) = only else {
        return Ok(sets);
    };
    let selected: Vec<SyncSetConfig> = sets.into_iter().filter(|s| s.name == name).collect();
    if selected.is_empty() {
        anyhow::bail!("no sync set named '{}' in configuration", name);
    }
    Ok(selected)
}

fn summary_line(report: &SyncSetReport, dry_run: bool) -> String {
    let mut line = format!("{}: {}", report.name, report.results);
    if dry_run {
        line.push_str(" (dry run)");
    }
    let failed = report.error_events().count();
    if failed > 0 {
        line.push_str(&format!(", failed operations: {}", failed));
    }
    for error in &report.results.errors {
        line.push_str(&format!("\n  error: {}", error));
    }
    line
}

const STARTER_CONFIG: &str = r#"# rostersync configuration
# Secrets are never stored here: every *_env field names an environment
# variable that holds the value.

[runtime]
dry_run = true
# 0 = low, 5 = medium (list every planned change in dry runs), 10 = high
verbosity = 0
log_level = "info"

[source]
type = "RestApi"
base_url = "https://hr.example.com/api"
path = "/people"
auth = "bearer"             # none | basic | bearer
token_env = "HR_API_TOKEN"
# username = "sync"
# password_env = "HR_API_PASSWORD"
# results_container = "data"
compare_attribute = "email"
# page_size = 100

[destination]
disable_add = false
disable_update = false
disable_delete = false

[destination.adapter]
type = "WebHelpDesk"
url = "https://whd.example.com/helpdesk/WebObjects/Helpdesk.woa"
username = "api_user"
api_key_env = "WHD_API_KEY"
batch_size_per_minute = 50

# [destination.adapter]
# type = "GoogleContacts"
# domain = "example.com"
# token_env = "GOOGLE_ACCESS_TOKEN"
# batch_size = 50
# batch_delay_seconds = 60

# [destination.adapter]
# type = "GoogleUsers"
# domain = "example.com"
# token_env = "GOOGLE_ACCESS_TOKEN"

[[attribute_map]]
source = "email"
destination = "email"
required = true

[[attribute_map]]
source = "first_name"
destination = "firstName"
required = true

[[attribute_map]]
source = "last_name"
destination = "lastName"

# [[sync_sets]]
# name = "staff"
# source = { path = "/staff" }

[notifications]
# slack_webhook_url_env = "SLACK_WEBHOOK_URL"
# email_smtp = "smtp.example.com:587"
# email_username = "rostersync"
# email_password_env = "SMTP_PASSWORD"
# email_from = "rostersync@example.com"
# email_recipients = ["admin@example.com"]
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, STARTER_CONFIG).context("failed to write config file")?;

    println!("Starter configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the source, destination and attribute_map sections");
    println!("  2. Set the referenced environment variables (HR_API_TOKEN, WHD_API_KEY, etc.)");
    println!(
        "  3. Validate with: rostersync validate --config {}",
        output.display()
    );
    println!(
        "  4. Preview with:  rostersync run --dry-run --config {}",
        output.display()
    );
    Ok(())
}

fn set_or_not(value: bool) -> &'static str {
    if value {
        "set"
    } else {
        "NOT SET"
    }
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    match &config.source {
        SourceConfig::RestApi(rest) => {
            println!("  Source        : RestApi {}{}", rest.base_url, rest.path);
            println!("  Compare on    : {}", rest.compare_attribute);
        }
    }
    match &config.destination.adapter {
        DestinationAdapterConfig::WebHelpDesk(whd) => {
            println!("  Destination   : WebHelpDesk {}", whd.url);
            println!("  API key       : {}", set_or_not(whd.api_key.is_some()));
        }
        DestinationAdapterConfig::GoogleContacts(gc) => {
            println!("  Destination   : GoogleContacts {}", gc.domain);
            println!("  Access token  : {}", set_or_not(gc.token.is_some()));
        }
        DestinationAdapterConfig::GoogleUsers(gu) => {
            println!("  Destination   : GoogleUsers {}", gu.domain);
            println!("  Access token  : {}", set_or_not(gu.token.is_some()));
        }
    }
    println!("  Mapped attrs  : {}", config.attribute_map.len());
    let names: Vec<String> = config.sync_sets().into_iter().map(|s| s.name).collect();
    println!("  Sync sets     : {}", names.join(", "));
    println!("  Dry run       : {}", config.runtime.dry_run);
    println!();
    println!("Configuration is valid.");
    Ok(())
}
