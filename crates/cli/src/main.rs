//! GitSvnBridge command-line management tool.
//!
//! Operates a bridged repository out-of-band: refresh the revision cache,
//! inspect the revision log, and print file content or derived SVN
//! properties at a revision. The SVN protocol server consumes the same
//! core library; this binary is for administrators and scripts.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use console::style;
use tracing_subscriber::EnvFilter;

use gitsvnbridge_core::config::BridgeConfig;
use gitsvnbridge_core::revcache::RevisionStore;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// GitSvnBridge command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "gitsvnbridge",
    version,
    about = "Manage and inspect a GitSvnBridge repository"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/gitsvnbridge/config.toml"
    )]
    config: PathBuf,

    /// Operate directly on a Git repository path instead of a config file.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Branch to export when `--repo` is used.
    #[arg(long, global = true, default_value = "master")]
    branch: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extend and load the revision cache, then print the latest revision.
    Update,

    /// Show repository identity and cache state.
    Info,

    /// Show the revision log, newest first.
    Log {
        /// Maximum number of revisions to print.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Also list changed paths per revision.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a file's content at a revision.
    Cat {
        /// Repository path, e.g. /trunk/README.
        path: String,

        /// Revision (defaults to latest).
        #[arg(short, long)]
        revision: Option<i64>,
    },

    /// Print a node's derived SVN properties at a revision.
    Props {
        /// Repository path.
        path: String,

        /// Revision (defaults to latest).
        #[arg(short, long)]
        revision: Option<i64>,

        /// Include svn:entry:* pseudo-properties.
        #[arg(long)]
        internal: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.repo {
        Some(repo) => BridgeConfig::for_repository(repo.clone(), &cli.branch),
        None => BridgeConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    };
    let store = RevisionStore::open(&config).context("opening bridged repository")?;

    match cli.command {
        Commands::Update => update(&store),
        Commands::Info => info(&store, &config),
        Commands::Log { limit, verbose } => log(&store, limit, verbose),
        Commands::Cat { path, revision } => cat(&store, &path, revision),
        Commands::Props {
            path,
            revision,
            internal,
        } => props(&store, &path, revision, internal),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn update(store: &RevisionStore) -> Result<()> {
    store.update()?;
    let latest = store.latest();
    println!(
        "cache up to date: r{} ({})",
        latest.id(),
        latest
            .git_commit()
            .map(|oid| oid.to_string())
            .unwrap_or_else(|| "empty".into())
    );
    Ok(())
}

fn info(store: &RevisionStore, config: &BridgeConfig) -> Result<()> {
    let latest = store.latest();
    println!("{:<18} {}", "UUID:", store.uuid());
    println!("{:<18} {}", "Repository:", config.repository.path.display());
    println!("{:<18} {}", "Branch:", store.branch());
    println!("{:<18} {}", "Cache ref:", store.cache_ref());
    println!("{:<18} r{}", "Latest revision:", latest.id());
    println!("{:<18} {}", "Latest date:", format_date(latest.date_ms()));
    Ok(())
}

fn log(store: &RevisionStore, limit: usize, verbose: bool) -> Result<()> {
    let latest = store.latest().id();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["rev", "author", "date", "paths", "message"]);

    let first = latest.saturating_sub(limit as i64 - 1).max(1);
    for rev in (first..=latest).rev() {
        let revision = store.by_id(rev)?;
        table.add_row([
            format!("r{}", revision.id()),
            revision.author().to_string(),
            format_date(revision.date_ms()),
            revision.changes().len().to_string(),
            revision.log().lines().next().unwrap_or("").to_string(),
        ]);
    }
    println!("{table}");

    if verbose {
        for rev in (first..=latest).rev() {
            let revision = store.by_id(rev)?;
            println!("\n{}", style(format!("r{}", revision.id())).bold());
            for (path, change) in revision.changes() {
                let line = format!("  {} {}", change.action(), path);
                match change.action() {
                    "A" => println!("{}", style(line).green()),
                    "D" => println!("{}", style(line).red()),
                    _ => println!("{line}"),
                }
            }
        }
    }
    Ok(())
}

fn cat(store: &RevisionStore, path: &str, revision: Option<i64>) -> Result<()> {
    let rev = revision.unwrap_or_else(|| store.latest().id());
    let view = store.tree(rev)?;
    let node = view
        .node_at(path)?
        .with_context(|| format!("'{path}' does not exist at r{rev}"))?;
    let Some(mut content) = node.open()? else {
        bail!("'{path}' is a directory");
    };
    let mut bytes = Vec::with_capacity(content.len() as usize);
    content.read_to_end(&mut bytes)?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}

fn props(store: &RevisionStore, path: &str, revision: Option<i64>, internal: bool) -> Result<()> {
    let rev = revision.unwrap_or_else(|| store.latest().id());
    let view = store.tree(rev)?;
    let node = view
        .node_at(path)?
        .with_context(|| format!("'{path}' does not exist at r{rev}"))?;

    println!("{:<8} {}", "Path:", node.path());
    println!("{:<8} {}", "Kind:", node.kind());
    if let Some(md5) = node.md5()? {
        println!("{:<8} {}", "MD5:", md5);
        println!("{:<8} {}", "Size:", node.size()?);
    }
    let props = node.properties(internal)?;
    if props.is_empty() {
        println!("(no properties)");
        return Ok(());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["name", "value"]);
    for (name, value) in &props {
        table.add_row([name.as_str(), value.trim_end()]);
    }
    println!("{table}");
    Ok(())
}

fn format_date(time_ms: i64) -> String {
    match Utc.timestamp_millis_opt(time_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".into(),
    }
}
