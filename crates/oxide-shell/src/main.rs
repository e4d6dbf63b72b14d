//! oxide-shell CLI
//!
//! Runs SQL through a cached-statement connection and prints the results.

mod json;
mod output;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use oxide_cursor::prelude::*;
use oxide_sql_sqlite::{OpenOptions, SqliteEngine};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::output::{write_rows, Format};

/// Run SQL against a database with statement caching.
#[derive(Parser)]
#[command(name = "oxide-shell")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path, or `:memory:`.
    #[arg(short, long, env = "OXIDE_DATABASE", default_value = ":memory:")]
    database: String,

    /// Open the database read-only.
    #[arg(long)]
    read_only: bool,

    /// Connection configuration as a JSON file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of compiled statements kept for reuse. Overrides the
    /// configuration file.
    #[arg(long, env = "OXIDE_STATEMENT_CACHE_SIZE")]
    statement_cache_size: Option<usize>,

    /// Output format for rows.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Print statement cache counters when done.
    #[arg(long)]
    stats: bool,

    /// Log every statement before it runs.
    #[arg(long)]
    trace: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute SQL given on the command line.
    Exec {
        /// One or more `;`-separated statements.
        sql: String,

        /// Bindings as a JSON array or object.
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Execute a SQL script.
    Run {
        /// Script file.
        file: PathBuf,

        /// Bindings as a JSON array or object.
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Execute SQL once per binding set.
    Batch {
        /// One or more `;`-separated statements.
        sql: String,

        /// File with one JSON array or object per line.
        bindings: PathBuf,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<ConnectionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ConnectionConfig::from_json(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => ConnectionConfig::default(),
    };
    if let Some(size) = cli.statement_cache_size {
        config = config.with_statement_cache_size(size);
    }
    Ok(config)
}

fn open(cli: &Cli) -> anyhow::Result<Connection<SqliteEngine>> {
    let config = load_config(cli)?;
    let options = OpenOptions::new().read_only(cli.read_only);
    let engine = SqliteEngine::open_with(&cli.database, &options)
        .with_context(|| format!("opening {}", cli.database))?;
    let conn = Connection::open(engine, config);

    if cli.trace {
        conn.set_exec_trace(|sql, bindings| {
            info!(sql = sql.trim(), ?bindings, "executing");
            true
        })?;
    }
    Ok(conn)
}

fn bindings(bind: Option<&str>) -> anyhow::Result<Bindings> {
    bind.map_or(Ok(Bindings::None), json::parse_bindings)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let conn = open(&cli)?;
    let cursor = conn.cursor()?;

    match &cli.command {
        Commands::Exec { sql, bind } => {
            cursor.execute(sql, bindings(bind.as_deref())?)?;
        }
        Commands::Run { file, bind } => {
            let script = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            cursor.execute(&script, bindings(bind.as_deref())?)?;
        }
        Commands::Batch {
            sql,
            bindings: path,
        } => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let batch = json::parse_batch(&text)?;
            debug!(sets = batch.len(), "loaded binding sets");
            cursor.execute_many(sql, batch)?;
        }
    }

    let mut out = io::stdout().lock();
    let rows = write_rows(&cursor, cli.format, &mut out)?;
    out.flush()?;
    debug!(rows, "done");

    cursor.close(false)?;
    if cli.stats {
        let engine = conn.engine().stats();
        info!(
            compiled = engine.compiled(),
            finalized = engine.finalized(),
            steps = engine.steps(),
            "engine counters"
        );
        println!("{}", serde_json::to_string_pretty(&conn.cache_stats())?);
    }
    conn.close(false)?;
    Ok(())
}
