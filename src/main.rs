//! linkrelay - Durable message relay
//!
//! Main entry point for the linkrelay CLI.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use linkrelay::communicator::Communicator;
use linkrelay::config::{validate_config_result, RelayConfig};
use linkrelay::connection::Connection;
use linkrelay::dispatch::{FilesystemOutbox, OutboxEntry, SenderKind, Translator};
use linkrelay::storage::CancelToken;
use linkrelay::sweeper::{metrics, Sweeper, SweeperConfig, SweeperEvent};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

/// linkrelay - Record, deliver, and reconcile relayed messages
#[derive(Parser, Debug)]
#[command(name = "linkrelay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/linkrelay/config.yaml)
    #[arg(short, long, env = "LINKRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Desired-connections log (overrides config)
    #[arg(long, env = "DESIRED_CONNECTIONS_FILEPATH")]
    desired: Option<PathBuf>,

    /// Current-connections log (overrides config)
    #[arg(long, env = "CURRENT_CONNECTIONS_FILEPATH")]
    current: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Record a connection without delivering it
    Record {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Validate, record, and deliver a connection
    Submit {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Deliver every recorded connection that has not been delivered yet
    Reconcile {
        /// Print Prometheus metrics after the pass
        #[arg(long)]
        metrics: bool,
    },

    /// List delivered connections
    Sent,

    /// List every recorded connection
    Received,

    /// List connections still waiting for delivery
    Unsent,

    /// Show log statistics
    Stats,

    /// Run the reconcile daemon until interrupted
    Daemon {
        /// Seconds between passes (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// List messages spooled in the filesystem outbox
    Outbox {
        #[arg(value_enum, default_value_t = OutboxKind::Email)]
        kind: OutboxKind,
    },
}

#[derive(clap::Args, Debug)]
struct ConnectionArgs {
    /// Sender address (empty for anonymous)
    #[arg(short, long, default_value = "")]
    sender: String,

    /// Receiver: an email address or a +E164 phone number
    #[arg(short, long)]
    receiver: String,

    /// Message body
    #[arg(short, long)]
    message: String,
}

impl ConnectionArgs {
    fn into_connection(self) -> Connection {
        Connection::now(self.sender, self.receiver, self.message)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutboxKind {
    Email,
    Sms,
}

impl From<OutboxKind> for SenderKind {
    fn from(kind: OutboxKind) -> Self {
        match kind {
            OutboxKind::Email => SenderKind::Email,
            OutboxKind::Sms => SenderKind::Sms,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    if let Err(e) = linkrelay::logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(RelayConfig::default_path);

    if let Commands::Init { force } = cli.command {
        return handle_init_command(&config_path, force);
    }

    let mut config = RelayConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(desired) = cli.desired {
        config.storage.desired_path = desired;
    }
    if let Some(current) = cli.current {
        config.storage.current_path = current;
    }
    validate_config_result(&config)?;

    let outbox = Arc::new(
        FilesystemOutbox::new(&config.outbox.path)
            .with_context(|| format!("opening outbox {}", config.outbox.path.display()))?,
    );

    if let Commands::Outbox { kind } = cli.command {
        for entry in outbox.pending(kind.into())? {
            print_outbox_entry(&entry);
        }
        return Ok(());
    }

    let communicator = build_communicator(&config, outbox)
        .context("preparing connection logs")?;

    match cli.command {
        Commands::Record { connection } => {
            let connection = connection.into_connection();
            communicator.record(&connection)?;
            println!("Recorded {}", connection);
        }

        Commands::Submit { connection } => {
            let connection = connection.into_connection();
            let runtime = tokio::runtime::Runtime::new()?;
            let outcome = runtime.block_on(async {
                let handle = communicator.submit(connection)?;
                handle
                    .await
                    .map_err(|e| linkrelay::RelayError::Other(format!("link task failed: {}", e)))
            })?;
            match outcome {
                Ok(linked) => println!("Delivered {}", linked),
                Err(e) => {
                    // Recorded; the next reconcile picks it up
                    println!("Recorded but not yet delivered: {}", e);
                }
            }
        }

        Commands::Reconcile { metrics: show_metrics } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let linked = runtime.block_on(communicator.reconcile())?;

            println!("Linked {} connection(s)", linked.len());
            for connection in &linked {
                print_connection(connection);
            }

            if show_metrics {
                println!();
                print!("{}", metrics::encode_metrics());
            }
        }

        Commands::Sent => {
            for connection in communicator.sent(CancelToken::new())? {
                print_connection(&connection);
            }
        }

        Commands::Received => {
            for connection in communicator.received(CancelToken::new())? {
                print_connection(&connection);
            }
        }

        Commands::Unsent => {
            let unsent = communicator.unsent()?;
            println!("Unsent: {} connection(s)", unsent.len());
            for connection in &unsent {
                print_connection(connection);
            }
        }

        Commands::Stats => {
            let stats = communicator.stats()?;
            println!("Desired:   {}", stats.desired);
            println!("Linked:    {}", stats.linked);
            println!("Unsent:    {}", stats.unsent);
            if stats.malformed > 0 {
                println!("Malformed: {}", stats.malformed);
            }
        }

        Commands::Daemon { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.reconcile.interval());
            run_daemon(communicator, interval)?;
        }

        // Handled before the logs are opened
        Commands::Init { .. } | Commands::Outbox { .. } => {}
    }

    Ok(())
}

fn build_communicator(
    config: &RelayConfig,
    outbox: Arc<FilesystemOutbox>,
) -> linkrelay::Result<Communicator> {
    for path in [&config.storage.desired_path, &config.storage.current_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let translator = Translator::new(config.dispatch_settings(), outbox.clone(), outbox);
    Ok(Communicator::new(
        &config.storage.desired_path,
        &config.storage.current_path,
        translator,
    )
    .with_max_in_flight(config.reconcile.max_in_flight)
    .with_retry(config.reconcile.retry()))
}

fn run_daemon(communicator: Communicator, interval: Duration) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut sweeper = Sweeper::new(communicator, SweeperConfig::default().with_interval(interval));
        let mut events = sweeper.subscribe();

        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    SweeperEvent::Linked(connection) => println!("linked   {}", connection),
                    SweeperEvent::ReconcileCompleted { linked, unsent } => {
                        println!("reconcile: {} linked, {} unsent", linked, unsent)
                    }
                    SweeperEvent::Error { message } => eprintln!("error: {}", message),
                    SweeperEvent::Stopped => break,
                    _ => {}
                }
            }
        });

        println!("Sweeping every {}s (Ctrl-C to stop)", interval.as_secs());
        sweeper.run().await
    })?;
    Ok(())
}

fn handle_init_command(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!("Configuration already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    let config = RelayConfig::default();
    config.save(path)?;
    println!("Wrote default configuration to {}", path.display());
    println!();
    println!("Edit email.source, email.site_label and sms.from_number before relaying.");
    Ok(())
}

fn print_connection(connection: &Connection) {
    let status = if connection.is_linked() {
        match chrono::DateTime::<chrono::Utc>::from_timestamp(connection.receive_epoch, 0) {
            Some(at) => format!("delivered {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "delivered".to_string(),
        }
    } else {
        "pending".to_string()
    };
    println!("  {} [{}] ({})", connection, connection.identity(), status);
}

fn print_outbox_entry(entry: &OutboxEntry) {
    match entry {
        OutboxEntry::Email { queued_at, request } => {
            println!(
                "{}  {} -> {}  \"{}\"",
                queued_at.format("%Y-%m-%d %H:%M:%S"),
                request.reply_to,
                request.to.join(", "),
                request.subject
            );
        }
        OutboxEntry::Sms { queued_at, request } => {
            println!(
                "{}  {} -> {}  {} bytes",
                queued_at.format("%Y-%m-%d %H:%M:%S"),
                request.from,
                request.to,
                request.body.len()
            );
        }
    }
}
