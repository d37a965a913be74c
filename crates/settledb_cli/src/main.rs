//! SettleDB CLI
//!
//! Command-line tools for SettleDB stores.
//!
//! # Commands
//!
//! - `inspect` - Display replica identity, products and journal size
//! - `get` / `set` / `delete` / `history` - Read and write values
//! - `register` - Register a product for the user or the admin
//! - `sync` - Run one sync pass against another store
//! - `remotes` - Manage remembered remotes
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Args, Parser, Subcommand};
use settledb_core::ProductKey;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SettleDB command-line tools.
#[derive(Parser)]
#[command(name = "settledb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display replica identity, products and journal size
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the current value of a setting
    Get {
        /// Product as name@version@pkh
        product: ProductKey,
        /// Value name
        name: String,
    },

    /// Write a setting
    Set {
        /// Product as name@version@pkh
        product: ProductKey,
        /// Value name
        name: String,
        #[command(flatten)]
        value: ValueArgs,
    },

    /// Delete a setting
    Delete {
        /// Product as name@version@pkh
        product: ProductKey,
        /// Value name
        name: String,
    },

    /// Print the visible history of a setting
    History {
        /// Product as name@version@pkh
        product: ProductKey,
        /// Value name
        name: String,
        /// Include entries hidden by history matching
        #[arg(long)]
        raw: bool,
    },

    /// Register a product
    Register {
        /// Product as name@version@pkh
        product: ProductKey,
        /// Set the admin flag instead of the user flag
        #[arg(long)]
        admin: bool,
        /// Clear the flag instead of setting it
        #[arg(long)]
        remove: bool,
    },

    /// Run one sync pass against another store
    Sync {
        /// Remote store directory
        remote: PathBuf,
    },

    /// Manage remembered remotes
    Remotes {
        #[command(subcommand)]
        action: RemotesAction,
    },

    /// Rewrite the journal as a single snapshot
    Compact {
        /// Drop history entries hidden by matching first
        #[arg(long)]
        purge_matched: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum RemotesAction {
    /// List remembered remotes
    List,
    /// Remember a remote store under a name
    Remember {
        /// Remote store directory
        remote: PathBuf,
        /// Friendly name
        name: String,
        /// Include the remote in autosync passes
        #[arg(long)]
        sync_by_default: bool,
    },
    /// Forget a remembered remote
    Forget {
        /// Friendly name
        name: String,
    },
}

/// Exactly one typed value.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct ValueArgs {
    /// String value
    #[arg(long)]
    string: Option<String>,
    /// 32-bit value
    #[arg(long)]
    dword: Option<u32>,
    /// 64-bit value
    #[arg(long)]
    qword: Option<u64>,
    /// Boolean value
    #[arg(long)]
    bool: Option<bool>,
    /// Blob as hex
    #[arg(long)]
    blob_hex: Option<String>,
    /// A value with no payload
    #[arg(long)]
    none: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("SettleDB CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("SettleDB Core v{}", settledb_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, &format)?,
        Commands::Get { product, name } => commands::values::get(&path, &product, &name)?,
        Commands::Set {
            product,
            name,
            value,
        } => {
            let data = commands::values::parse_value(
                value.string,
                value.dword,
                value.qword,
                value.bool,
                value.blob_hex.as_deref(),
                value.none,
            )?;
            commands::values::set(&path, &product, &name, data)?;
        }
        Commands::Delete { product, name } => commands::values::delete(&path, &product, &name)?,
        Commands::History { product, name, raw } => {
            commands::values::history(&path, &product, &name, raw)?;
        }
        Commands::Register {
            product,
            admin,
            remove,
        } => commands::register::run(&path, &product, admin, remove)?,
        Commands::Sync { remote } => commands::sync::run(&path, &remote)?,
        Commands::Remotes { action } => match action {
            RemotesAction::List => commands::remotes::list(&path)?,
            RemotesAction::Remember {
                remote,
                name,
                sync_by_default,
            } => commands::remotes::remember(&path, &remote, &name, sync_by_default)?,
            RemotesAction::Forget { name } => commands::remotes::forget(&path, &name)?,
        },
        Commands::Compact { purge_matched } => commands::compact::run(&path, purge_matched)?,
        Commands::Version => {}
    }

    Ok(())
}
