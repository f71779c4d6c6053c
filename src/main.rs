use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use covmark::cli::{self, Style};
use covmark::report;

/// covmark: coverage reports for manually placed `sample()` markers.
#[derive(Parser)]
#[command(name = "covmark", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render instrumented methods with each marker flagged hit or missed.
    Report {
        /// Root of the source tree to scan.
        #[arg(long, env = "COVMARK_SRC", default_value = "src")]
        src: PathBuf,

        /// Hit file written by the instrumented program.
        #[arg(long, env = "COVMARK_HITS")]
        hits: Option<PathBuf>,

        /// Write the report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Output style.
        #[arg(long, value_enum, default_value = "markdown")]
        style: Style,
    },

    /// Show hit counts per instrumented method.
    Summary {
        /// Root of the source tree to scan.
        #[arg(long, env = "COVMARK_SRC", default_value = "src")]
        src: PathBuf,

        /// Hit file written by the instrumented program.
        #[arg(long, env = "COVMARK_HITS")]
        hits: Option<PathBuf>,
    },

    /// List the key of every marker found in the source tree.
    Markers {
        /// Root of the source tree to scan.
        #[arg(long, env = "COVMARK_SRC", default_value = "src")]
        src: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    match args.command {
        Commands::Report {
            src,
            hits,
            out,
            style,
        } => {
            let text = cli::cmd_report(&src, hits.as_deref(), style)?;
            emit(&text, out.as_deref())
        }
        Commands::Summary { src, hits } => {
            let text = cli::cmd_summary(&src, hits.as_deref())?;
            emit(&text, None)
        }
        Commands::Markers { src } => {
            let text = cli::cmd_markers(&src)?;
            emit(&text, None)
        }
    }
}

fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => report::write_report(path, text)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => std::io::stdout()
            .write_all(text.as_bytes())
            .context("Failed to write to stdout"),
    }
}
