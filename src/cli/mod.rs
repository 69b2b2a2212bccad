//! Command-line interface for eventchain.
//!
//! Commands that run events boot the same way: store, marker, recovery scan,
//! then the orchestrator. Only one process may own the interrupt marker, so
//! a second `publish`, `serve` or `recover` fails fast while another is
//! live. `events` only reads the store and never touches the marker.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::adapters::{InMemoryBus, ResultStore, SqliteResultStore};
use crate::config::ResolvedConfig;
use crate::core::{InterruptMarker, Orchestrator, RecoveryReport};
use crate::domain::EventRequest;

pub mod boundary;

use boundary::Response;

/// eventchain - three-stage pub/sub event chain
#[derive(Parser, Debug)]
#[command(name = "eventchain")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one event through the chain and print the response
    Publish {
        /// Event name (seed payload)
        event_name: String,
    },

    /// Answer `{"eventName": ...}` JSON lines from stdin, one response per line
    Serve,

    /// Reconcile the interrupt marker and report
    Recover,

    /// List persisted results
    Events {
        /// Maximum number of results to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self, config: ResolvedConfig) -> Result<()> {
        match self.command {
            Commands::Publish { event_name } => publish(&config, event_name).await,
            Commands::Serve => serve(&config).await,
            Commands::Recover => recover(&config).await,
            Commands::Events { limit } => list_events(&config, limit).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Open the result database
pub fn open_store(config: &ResolvedConfig) -> Result<Arc<dyn ResultStore>> {
    let store = SqliteResultStore::open(&config.database)
        .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
    Ok(Arc::new(store))
}

/// Open collaborators, take ownership of the marker and run boot-time recovery
pub async fn bootstrap(config: &ResolvedConfig) -> Result<(Orchestrator, RecoveryReport)> {
    let store = open_store(config)?;
    let marker = Arc::new(
        InterruptMarker::open(&config.marker)
            .with_context(|| format!("Failed to open interrupt marker: {}", config.marker.display()))?,
    );
    let bus = Arc::new(InMemoryBus::with_capacity(config.bus_capacity));

    let (orchestrator, report) = Orchestrator::boot(bus, store, marker)
        .await
        .context("Recovery failed; refusing to accept events")?;
    Ok((orchestrator, report))
}

async fn publish(config: &ResolvedConfig, event_name: String) -> Result<()> {
    let (orchestrator, _) = bootstrap(config).await?;

    let response = boundary::handle(&orchestrator, EventRequest::new(event_name)).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Response::Err(err) = response {
        std::process::exit(err.error.exit_code());
    }
    Ok(())
}

async fn serve(config: &ResolvedConfig) -> Result<()> {
    let (orchestrator, _) = bootstrap(config).await?;
    let orchestrator = Arc::new(orchestrator);
    info!("reading requests from stdin");

    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut requests = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let tx = tx.clone();
        match boundary::parse_request(&line) {
            Ok(request) => {
                let orchestrator = Arc::clone(&orchestrator);
                requests.spawn(async move {
                    let response = boundary::handle(&orchestrator, request).await;
                    deliver(&tx, response);
                });
            }
            Err(err) => {
                warn!(error = %err.message, "rejected request");
                deliver(&tx, Response::Err(err));
            }
        }
    }

    while requests.join_next().await.is_some() {}
    drop(tx);
    writer.await.context("Response writer panicked")??;
    Ok(())
}

/// Hand a response to the writer task. Returns false if it is gone.
fn deliver(tx: &mpsc::UnboundedSender<Response>, response: Response) -> bool {
    match tx.send(response) {
        Ok(()) => true,
        Err(mpsc::error::SendError(dropped)) => {
            warn!(status = dropped.status(), "response writer stopped, dropping response");
            false
        }
    }
}

async fn recover(config: &ResolvedConfig) -> Result<()> {
    let (_, report) = bootstrap(config).await?;

    if report.is_clean() {
        println!("Previous shutdown was clean");
        return Ok(());
    }

    println!("Previous shutdown was interrupted");
    for entry in &report.reconciled {
        println!("  reconciled: {} ({})", entry.run_id, entry.event_name);
    }
    for lost in &report.lost {
        println!("  lost: {}", lost);
    }
    if !report.lost.is_empty() {
        eprintln!("\n[{} run(s) could not be recovered]", report.lost.len());
    }
    Ok(())
}

async fn list_events(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let results = open_store(config)?.recent(limit).await?;

    if results.is_empty() {
        println!("No events found");
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<16} {:<16} {}",
        "RUN ID", "LISTENER 1", "LISTENER 2", "LISTENER 3", "EVENT TIME"
    );
    println!("{}", "-".repeat(110));
    for r in results {
        println!(
            "{:<38} {:<16} {:<16} {:<16} {}",
            r.run_id,
            r.listener1,
            r.listener2,
            r.listener3,
            r.event_time.to_rfc3339()
        );
    }
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("Home:        {}", config.home.display());
    println!("Database:    {}", config.database.display());
    println!("Marker:      {}", config.marker.display());
    match &config.log_file {
        Some(path) => println!("Log file:    {}", path.display()),
        None => println!("Log file:    (stderr only)"),
    }
    println!("Log filter:  {}", config.log_filter);
    println!("Bus buffer:  {}", config.bus_capacity);
    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, using defaults)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_publish() {
        let cli = Cli::parse_from(["eventchain", "publish", "go"]);
        assert!(matches!(cli.command, Commands::Publish { ref event_name } if event_name == "go"));
    }

    #[test]
    fn test_cli_parses_events_limit() {
        let cli = Cli::parse_from(["eventchain", "events", "--limit", "3"]);
        assert!(matches!(cli.command, Commands::Events { limit: 3 }));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_state() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig::with_home(temp.path().join("home"));

        let (orchestrator, report) = bootstrap(&config).await.unwrap();

        assert!(report.is_clean());
        assert!(config.database.exists());
        assert!(config.marker.exists());
        assert!(orchestrator.store().recent(1).await.unwrap().is_empty());
    }

    #[test]
    fn test_deliver_reports_stopped_writer() {
        let response = || Response::Err(boundary::parse_request("{").unwrap_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(deliver(&tx, response()));
        assert_eq!(rx.try_recv().unwrap().status(), 400);

        drop(rx);
        assert!(!deliver(&tx, response()));
    }

    #[tokio::test]
    async fn test_second_bootstrap_fails_while_first_is_live() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig::with_home(temp.path().join("home"));

        let (live, _) = bootstrap(&config).await.unwrap();
        live.run(crate::domain::Event::new("go")).await.unwrap();

        let err = bootstrap(&config).await.err().unwrap();
        assert!(format!("{:#}", err).contains("owned by another running process"));

        // Read-only access does not need the marker
        assert_eq!(open_store(&config).unwrap().recent(10).await.unwrap().len(), 1);

        drop(live);
        assert!(bootstrap(&config).await.is_ok());
    }
}
