//! LedgerSync CLI
//!
//! Command-line tools for inspecting and repairing a file-backed LedgerSync
//! store.
//!
//! # Commands
//!
//! - `status` - Pending, retrying and dead-lettered counts
//! - `queue` - List pending operations in replay order
//! - `enqueue` - Append an operation without contacting the backend
//! - `dead-letters` - List operations that are no longer retried
//! - `requeue` - Move dead letters back to the end of the queue
//! - `purge-dead` - Drop dead letters
//! - `get` / `list` - Read local records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LedgerSync offline store tools.
#[derive(Parser)]
#[command(name = "ledgersync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Namespace of local records
    #[arg(global = true, short, long, default_value = "ledgersync")]
    namespace: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the sync backlog
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending operations
    Queue {
        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Append an operation to the queue
    Enqueue {
        /// Entity kind (product, sale, customer, supplier, expense, transaction, settings)
        #[arg(short, long)]
        kind: String,

        /// Verb (create, update, delete)
        #[arg(long)]
        verb: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// List dead-lettered operations
    DeadLetters {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Move dead letters back to the queue
    Requeue,

    /// Discard dead letters
    PurgeDead {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Print one local record
    Get {
        /// Record key, without the namespace
        key: String,
    },

    /// List local records by key prefix
    List {
        /// Key prefix, without the namespace
        #[arg(default_value = "")]
        prefix: String,

        /// Print keys only
        #[arg(short, long)]
        keys: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let namespace = cli.namespace.as_str();
    match cli.command {
        Commands::Status { format } => {
            let path = cli.path.ok_or("Store path required for status")?;
            commands::status::run(&commands::open(&path, namespace)?, &format)?;
        }
        Commands::Queue { limit, format } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&commands::open(&path, namespace)?, limit, &format)?;
        }
        Commands::Enqueue {
            kind,
            verb,
            payload,
        } => {
            let path = cli.path.ok_or("Store path required for enqueue")?;
            let store = commands::open_or_create(&path, namespace)?;
            commands::queue::enqueue(&store, &kind, &verb, &payload)?;
        }
        Commands::DeadLetters { format } => {
            let path = cli.path.ok_or("Store path required for dead-letters")?;
            commands::dead_letters::run(&commands::open(&path, namespace)?, &format)?;
        }
        Commands::Requeue => {
            let path = cli.path.ok_or("Store path required for requeue")?;
            commands::dead_letters::requeue(&commands::open(&path, namespace)?)?;
        }
        Commands::PurgeDead { dry_run } => {
            let path = cli.path.ok_or("Store path required for purge-dead")?;
            commands::dead_letters::purge(&commands::open(&path, namespace)?, dry_run)?;
        }
        Commands::Get { key } => {
            let path = cli.path.ok_or("Store path required for get")?;
            if !commands::records::get(&commands::open(&path, namespace)?, &key)? {
                std::process::exit(1);
            }
        }
        Commands::List {
            prefix,
            keys,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::records::list(&commands::open(&path, namespace)?, &prefix, keys, &format)?;
        }
        Commands::Version => {
            println!("LedgerSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
