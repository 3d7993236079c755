//! quilldb CLI
//!
//! Command-line maintenance tools for quilldb store files.
//!
//! # Commands
//!
//! - `inspect` - List collections and document counts
//! - `dump` - Print a collection's documents as JSON lines
//! - `compact` - Rewrite the store file without dead entries
//! - `recover` - Run journal recovery and report what it did

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::Target;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// quilldb command-line database tools.
#[derive(Parser)]
#[command(name = "quilldb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// User name of a protected store
    #[arg(global = true, short, long, requires = "password")]
    user: Option<String>,

    /// Password of a protected store
    #[arg(global = true, long, requires = "user")]
    password: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Aligned table
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List collections and document counts
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print a collection's documents as JSON lines
    Dump {
        /// Collection name
        collection: String,

        /// Maximum number of documents to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Rewrite the store file without overwritten or deleted entries
    Compact,

    /// Replay or discard leftover commit journals
    Recover,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("quilldb CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    let target = Target {
        path,
        credentials: cli.user.zip(cli.password),
    };
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Inspect { format } => {
            commands::inspect::run(&target, format == Format::Json, &mut out)?;
        }
        Commands::Dump { collection, limit } => {
            commands::dump::run(&target, &collection, limit, &mut out)?;
        }
        Commands::Compact => commands::compact::run(&target, &mut out)?,
        Commands::Recover => commands::recover::run(&target, &mut out)?,
        Commands::Version => {}
    }

    Ok(())
}
