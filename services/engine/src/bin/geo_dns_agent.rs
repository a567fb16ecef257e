//! Geo DNS Agent - Standalone Binary
//!
//! Synthesizes the geolocation records of a zone document and converges them
//! on Route53 and/or Gandi LiveDNS. Runs once and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use luffy_engine::geo_dns::{
    AwsCredentials, DryRunBackend, FanOutBackend, GandiBackend, GandiConfig, GeoDnsAgent,
    Route53Backend, Route53Config, ZoneBackend, ZoneConfig, DEFAULT_CONCURRENCY,
};

/// Geo DNS Agent - geolocation DNS records for the web fleet
#[derive(Parser, Debug)]
#[command(name = "geo-dns-agent", version, about)]
struct Args {
    /// Zone document (JSON)
    #[arg(long, env = "GEO_DNS_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the record sets the zone should contain, as JSON
    Plan,

    /// Upsert every record set on the selected providers
    Apply(ApplyArgs),
}

#[derive(clap::Args, Debug)]
struct ApplyArgs {
    /// Providers to write to (repeatable)
    #[arg(long = "backend", value_enum, required = true)]
    backends: Vec<BackendKind>,

    /// Route53 hosted zone ID
    #[arg(long, env = "ROUTE53_HOSTED_ZONE_ID")]
    route53_zone_id: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    aws_session_token: Option<String>,

    /// Gandi personal access token
    #[arg(long, env = "GANDI_API_TOKEN", hide_env_values = true)]
    gandi_token: Option<String>,

    /// Upserts in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "SYNC_CONCURRENCY")]
    concurrency: usize,

    /// Dry run - log changes instead of calling providers
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Route53,
    Gandi,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, stdout is reserved for plan output)
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = ZoneConfig::load(&args.config)?;

    info!(
        zone = %config.zone,
        config = %args.config.display(),
        servers = config.servers.len(),
        "Starting Geo DNS Agent"
    );

    match args.command {
        Commands::Plan => {
            let agent = GeoDnsAgent::new(config, Box::new(DryRunBackend));
            let records = agent.plan()?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            info!(records = records.len(), "Plan complete");
        }

        Commands::Apply(apply) => {
            let backend = build_backend(&apply)?;
            let agent = GeoDnsAgent::new(config, backend).concurrency(apply.concurrency);
            let report = agent.sync().await?;

            if !report.success {
                for e in &report.errors {
                    error!(error = %e, "Record set failed");
                }
                anyhow::bail!("{} of {} record sets failed", report.errors.len(), report.records_synced);
            }
        }
    }

    Ok(())
}

/// Build the backend selected on the command line
fn build_backend(args: &ApplyArgs) -> Result<Box<dyn ZoneBackend>> {
    if args.dry_run {
        info!("DRY RUN - no provider will be called");
        return Ok(Box::new(DryRunBackend));
    }

    let mut backends: Vec<Box<dyn ZoneBackend>> = Vec::new();

    for kind in &args.backends {
        match kind {
            BackendKind::Route53 => {
                let zone_id = args
                    .route53_zone_id
                    .as_deref()
                    .context("ROUTE53_HOSTED_ZONE_ID must be set for the route53 backend")?;

                let credentials = AwsCredentials {
                    access_key_id: args
                        .aws_access_key_id
                        .clone()
                        .context("AWS_ACCESS_KEY_ID must be set for the route53 backend")?,
                    secret_access_key: args
                        .aws_secret_access_key
                        .clone()
                        .context("AWS_SECRET_ACCESS_KEY must be set for the route53 backend")?,
                    session_token: args.aws_session_token.clone(),
                };

                info!(hosted_zone_id = %zone_id, "Using Route53 backend");
                backends.push(Box::new(Route53Backend::new(Route53Config::new(zone_id, credentials))?));
            }
            BackendKind::Gandi => {
                let token = args
                    .gandi_token
                    .as_deref()
                    .context("GANDI_API_TOKEN must be set for the gandi backend")?;

                info!("Using Gandi LiveDNS backend");
                backends.push(Box::new(GandiBackend::new(GandiConfig::new(token))?));
            }
        }
    }

    if backends.len() == 1 {
        Ok(backends.remove(0))
    } else {
        Ok(Box::new(FanOutBackend::new(backends)))
    }
}
