//! Lead Outreach - CLI and campaign daemon

use clap::{Parser, Subcommand};
use lead_outreach::bridge::BridgeClient;
use lead_outreach::campaign::Campaign;
use lead_outreach::channel::{ClientEvent, DryRunClient, MessagingClient};
use lead_outreach::config::Config;
use lead_outreach::contacts::{ingest_csv, ContactStore, LedgerSummary};
use lead_outreach::scheduler::Scheduler;
use lead_outreach::Result;
use std::fs;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lead Outreach - staggered campaign sender
#[derive(Parser)]
#[command(name = "lead-outreach")]
#[command(about = "Send a capped first-contact campaign and auto-reply to interested leads")]
struct Cli {
    /// Working directory holding contacts.csv, contacts.json and backups/
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the campaign until interrupted
    Run {
        /// Log messages instead of delivering them
        #[arg(long)]
        dry_run: bool,

        /// Bridge executable (defaults to `node bridge.js` in --dir).
        ///
        /// Any program works that reads NDJSON requests on stdin and writes
        /// responses and events on stdout; see `Config::bridge_command`.
        #[arg(long)]
        bridge: Option<PathBuf>,

        /// Argument passed to the bridge executable (repeatable)
        #[arg(long = "bridge-arg")]
        bridge_args: Vec<String>,
    },

    /// Show ledger counts
    Status,

    /// Show the batch the next run would schedule
    Plan,

    /// Ingest contacts.csv into the ledger
    Import {
        /// Replace an existing ledger (it is backed up first)
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::in_dir(&cli.dir);

    match cli.command {
        Commands::Run {
            dry_run,
            bridge,
            bridge_args,
        } => {
            if let Some(bridge) = bridge {
                config.bridge_command = bridge;
                config.bridge_args = bridge_args;
            }
            cmd_run(&config, dry_run)
        }
        Commands::Status => cmd_status(&config),
        Commands::Plan => cmd_plan(&config),
        Commands::Import { force } => cmd_import(&config, force),
    }
}

// ============================================================================
// CLI Commands
// ============================================================================

fn cmd_status(config: &Config) -> Result<()> {
    // Read only: an empty ledger is reported, never re-ingested
    let contacts = match ContactStore::new(config).read_ledger()? {
        Some(contacts) => contacts,
        None => {
            println!("No ledger at {}", config.ledger_file.display());
            println!("Run `lead-outreach import` to ingest {}", config.contacts_csv.display());
            return Ok(());
        }
    };
    let summary = LedgerSummary::of(&contacts);

    println!("Ledger: {}", config.ledger_file.display());
    println!("  Contacts:  {}", summary.total);
    println!("  Sent:      {}", summary.sent);
    println!("  Responded: {}", summary.responded);
    println!("  Pending:   {}", summary.pending);

    let backups = match fs::read_dir(&config.backup_dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    };
    println!("  Backups:   {}", backups);

    Ok(())
}

fn cmd_plan(config: &Config) -> Result<()> {
    // Planning never writes the ledger
    let contacts = match ContactStore::new(config).read_ledger()? {
        Some(contacts) if !contacts.is_empty() => contacts,
        _ => ingest_csv(&config.contacts_csv)?,
    };

    let mut scheduler = Scheduler::new(config);
    let plan = scheduler.plan_initial_batch(&contacts);

    if plan.is_empty() {
        println!("All contacts processed.");
        return Ok(());
    }

    println!("Next run would message {} contacts:", plan.len());
    for planned in &plan {
        let minutes = planned.delay.as_secs() / 60;
        println!("  +{}h{:02}m  {}", minutes / 60, minutes % 60, planned.number);
    }

    Ok(())
}

fn cmd_import(config: &Config, force: bool) -> Result<()> {
    let mut store = ContactStore::new(config);

    if config.ledger_file.exists() {
        if !force {
            println!(
                "Ledger already exists at {} (use --force to replace it)",
                config.ledger_file.display()
            );
            return Ok(());
        }
        let backup = store.backup()?;
        println!("Backed up existing ledger to {}", backup.display());
    }

    let count = store.import_csv()?;
    println!("Imported {} contacts into {}", count, config.ledger_file.display());
    Ok(())
}

// ============================================================================
// Daemon Loop
// ============================================================================

fn cmd_run(config: &Config, dry_run: bool) -> Result<()> {
    info!("Lead outreach starting");

    // A missing contact list is fatal before anything connects
    let mut store = ContactStore::new(config);
    let count = store.load()?;
    info!("Loaded {} contacts", count);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        if dry_run {
            info!("Dry run: messages are logged, not delivered");
            let campaign = Campaign::new(config, store, DryRunClient::new());
            drive(campaign, DryRunClient::events()).await
        } else {
            let (client, events) = BridgeClient::spawn(config)?;
            let campaign = Campaign::new(config, store, client);
            drive(campaign, events).await
        }
    })
}

async fn drive<C: MessagingClient>(
    mut campaign: Campaign<C>,
    events: mpsc::Receiver<ClientEvent>,
) -> Result<()> {
    tokio::select! {
        result = campaign.run(events) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
