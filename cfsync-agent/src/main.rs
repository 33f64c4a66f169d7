//! cfsync: Apply a declared set of Cloud Foundry resources.
//!
//! - Loads a manifest of service instances and private domain shares
//! - Converges the Cloud Controller onto it, waiting out asynchronous operations
//! - Records durable identities in a local state file
//! - Imports existing resources into the state file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cfsync_agent::{Agent, CloudControllerClient, Manifest, ResourceKind, StateStore};
use cfsync_engine::{CancellationToken, OperationType, PollTimeouts};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cfsync Cloud Foundry resource agent
#[derive(Parser, Debug)]
#[command(name = "cfsync", version, about)]
struct Args {
    /// Cloud Controller endpoint (e.g., https://api.sys.example.com)
    #[arg(long, env = "CF_API")]
    api_endpoint: String,

    /// OAuth bearer token for the Cloud Controller
    #[arg(long, env = "CF_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// State file recording applied resources
    #[arg(long, default_value = "cfsync.state.json")]
    state: PathBuf,

    /// Purge service instances on delete instead of waiting for the broker
    #[arg(long)]
    purge_on_delete: bool,

    /// Seconds between operation status checks
    #[arg(long, default_value = "30")]
    poll_interval_secs: u64,

    /// Seconds to wait before the first status check
    #[arg(long, default_value = "5")]
    initial_delay_secs: u64,

    /// Time budget for asynchronous creates, in seconds
    #[arg(long, default_value = "900")]
    create_timeout_secs: u64,

    /// Time budget for asynchronous updates, in seconds
    #[arg(long, default_value = "900")]
    update_timeout_secs: u64,

    /// Time budget for asynchronous deletes, in seconds
    #[arg(long, default_value = "900")]
    delete_timeout_secs: u64,

    /// Per-request timeout for Cloud Controller calls, in seconds
    #[arg(long, default_value = "60")]
    request_timeout_secs: u64,

    /// Accept invalid TLS certificates from the Cloud Controller
    #[arg(long)]
    skip_tls_verify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Converge the Cloud Controller onto a manifest
    Apply {
        /// Manifest file
        #[arg(long, default_value = "cfsync.json")]
        manifest: PathBuf,
    },
    /// Adopt an existing resource into the state file
    Import {
        /// Resource kind
        #[arg(value_enum)]
        kind: ResourceKind,
        /// Key to record the resource under
        key: String,
        /// Remote identity (service instance GUID, or ORG/DOMAIN for shares)
        id: String,
    },
}

impl Args {
    fn timeouts(&self) -> PollTimeouts {
        PollTimeouts::default()
            .with_initial_delay(Duration::from_secs(self.initial_delay_secs))
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_timeout(
                OperationType::Create,
                Duration::from_secs(self.create_timeout_secs),
            )
            .with_timeout(
                OperationType::Update,
                Duration::from_secs(self.update_timeout_secs),
            )
            .with_timeout(
                OperationType::Delete,
                Duration::from_secs(self.delete_timeout_secs),
            )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cfsync=info,cfsync_engine=info,cfsync_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Cloud Controller: {}", args.api_endpoint);
    if args.skip_tls_verify {
        warn!("TLS certificate verification is disabled");
    }

    let client = Arc::new(
        CloudControllerClient::new(
            &args.api_endpoint,
            args.token.clone(),
            args.skip_tls_verify,
            Duration::from_secs(args.request_timeout_secs),
        )
        .context("Failed to build Cloud Controller client")?,
    );
    let agent = Agent::new(client, args.timeouts(), args.purge_on_delete);
    let mut state = StateStore::open(&args.state).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Apply { manifest } => {
            let manifest = Manifest::load(&manifest).await?;
            let report = agent.apply(&manifest, &mut state, &cancel).await?;
            if report.failed() > 0 {
                bail!(
                    "{} of {} resources failed to apply",
                    report.failed(),
                    report.outcomes.len()
                );
            }
        }
        Command::Import { kind, key, id } => {
            agent.import(kind, &key, &id, &mut state).await?;
        }
    }

    Ok(())
}
