//! Command line console for the table service.
//!
//! Runs SQL through an interactive session or lists the splits of a table scan. Configuration
//! is loaded from `./configuration` unless `--config-dir` points elsewhere.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use tunnel::client::{InstanceClient, ReadSessionClient, RestClient};
use tunnel::interactive::{InteractiveSession, InteractiveSessionOptions};
use tunnel::session::SessionCoordinator;
use tunnel::types::ScanScope;
use tunnel_config::shared::ConsoleConfig;
use tunnel_config::{load_config, load_config_from};
use tunnel_telemetry::tracing::init_tracing;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `base.yaml` and the per-environment overrides.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs a statement in an interactive session and prints every result.
    Query {
        /// Statement to run.
        #[arg(long)]
        sql: String,

        /// Attach to this running session instead of creating an unnamed one.
        #[arg(long)]
        session: Option<String>,

        /// Query setting as `key=value`. May be repeated.
        #[arg(long = "setting", value_parser = parse_setting)]
        settings: Vec<(String, String)>,

        /// Seconds to wait for the session to start. Zero waits without a deadline.
        #[arg(long, default_value = "300")]
        start_timeout_secs: u64,
    },
    /// Lists the splits of a table scan, one per line.
    Splits {
        /// Table to scan in the configured project and schema.
        #[arg(long)]
        table: String,

        /// Maximum number of splits requested per page.
        #[arg(long)]
        page_size: Option<u32>,
    },
}

fn parse_setting(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{value}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config: ConsoleConfig = match &args.config_dir {
        Some(directory) => load_config_from(directory),
        None => load_config(),
    }
    .context("loading the console configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    let client = RestClient::new(&config.service)?;
    let coordinator = SessionCoordinator::from_config(client, &config)?;

    let shutdown_tx = coordinator.shutdown_tx();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            shutdown_tx.shutdown();
        }
    });

    match args.command {
        Command::Query {
            sql,
            session,
            settings,
            start_timeout_secs,
        } => {
            run_query(
                &coordinator,
                &sql,
                session,
                settings.into_iter().collect(),
                Duration::from_secs(start_timeout_secs),
            )
            .await
        }
        Command::Splits { table, page_size } => list_splits(&coordinator, &table, page_size).await,
    }
}

async fn run_query<C>(
    coordinator: &SessionCoordinator<C>,
    sql: &str,
    session_name: Option<String>,
    settings: BTreeMap<String, String>,
    start_timeout: Duration,
) -> anyhow::Result<()>
where
    C: InstanceClient + Clone,
{
    let attached = session_name.is_some();
    let mut session = match session_name {
        Some(name) => {
            coordinator
                .attach_interactive(&name, &BTreeMap::new(), None, None)
                .await?
        }
        None => {
            coordinator
                .create_interactive(InteractiveSessionOptions::new())
                .await?
        }
    };

    if let Some(log_view) = session.log_view() {
        info!(log_view, "interactive session created");
    }

    let outcome = query_session(&mut session, sql, &settings, start_timeout).await;

    // Attached sessions are shared and stay up.
    if !attached {
        let stopped = session.stop().await;
        if let Err(err) = stopped {
            if outcome.is_ok() {
                return Err(err.into());
            }
            warn!(%err, "stopping the interactive session failed");
        }
    }

    outcome
}

async fn query_session<C>(
    session: &mut InteractiveSession<C>,
    sql: &str,
    settings: &BTreeMap<String, String>,
    start_timeout: Duration,
) -> anyhow::Result<()>
where
    C: InstanceClient + Clone,
{
    if !session.wait_for_start(start_timeout).await? {
        bail!("the session did not start within {start_timeout:?}");
    }

    let results = session.run(sql, settings).await?.into_stream();
    let mut results = std::pin::pin!(results);
    while let Some(response) = results.try_next().await? {
        if let Some(warnings) = &response.warnings {
            warn!(%warnings, "query reported warnings");
        }
        if let Some(result) = response.non_empty_result() {
            println!("{result}");
        }
    }

    if let Some(stats) = session.query_stats().await? {
        info!(%stats, "query finished");
    }

    Ok(())
}

async fn list_splits<C>(
    coordinator: &SessionCoordinator<C>,
    table: &str,
    page_size: Option<u32>,
) -> anyhow::Result<()>
where
    C: ReadSessionClient + Clone,
{
    let table = coordinator.table(table);
    let mut scope = ScanScope::full();
    if let Some(page_size) = page_size {
        scope = scope.with_page_size(page_size);
    }

    let mut session = coordinator.create_read_session(&table, scope).await?;

    let mut listing = session.list_splits();
    let mut count = 0usize;
    let outcome = loop {
        match listing.next_split().await {
            Ok(Some(split)) => {
                println!("{}\t{}", split.key, split.locator);
                count += 1;
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    info!(%table, splits = count, pages = listing.pages_fetched(), "listing finished");

    let stopped = session.stop().await;
    outcome?;
    stopped?;

    Ok(())
}
