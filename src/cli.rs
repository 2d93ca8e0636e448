use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport, ThresholdOverrides};
use crate::vault::paths::PathOverrides;

/// snipvault - externalize fenced code from a markdown vault and deduplicate it
#[derive(Parser)]
#[command(name = "snipvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Corpus root (default: current directory)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Record store directory (default: <corpus>/Snippets)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Replace fenced code blocks in documents with references to records
    Extract {
        /// Reuse an existing record at or above this similarity
        #[arg(long)]
        match_threshold: Option<f64>,

        /// Also process documents that already contain a reference
        #[arg(long)]
        force: bool,

        /// Create the record store if it does not exist
        #[arg(long)]
        create_store: bool,

        /// Report planned changes without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Merge identical records and report near-duplicates
    Dedup {
        #[command(flatten)]
        thresholds: DedupThresholds,

        /// Progress file for resuming an interrupted pass
        #[arg(long)]
        progress_file: Option<PathBuf>,

        /// Near-duplicate report destination
        #[arg(long)]
        report_file: Option<PathBuf>,

        /// Compare without rewriting, deleting or saving progress
        #[arg(long)]
        dry_run: bool,
    },

    /// List similar record pairs without changing anything
    Scan {
        /// Minimum similarity to list
        #[arg(short, long, default_value = "0.8")]
        threshold: f64,
    },

    /// Rewrite record metadata into the canonical layout
    #[command(name = "repair-metadata", alias = "repair")]
    Repair {
        /// Report fixes without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show resolved paths, store health and dedup progress
    Status,
}

#[derive(Args)]
struct DedupThresholds {
    /// Merge pairs at or above this similarity
    #[arg(long)]
    exact: Option<f64>,

    /// Report pairs at or above this similarity (and below --exact)
    #[arg(long)]
    report_floor: Option<f64>,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let status = if report.ok { "ok" } else { "issues" };
    println!("{}: {status}", report.command);
    for line in &report.details {
        println!("  {line}");
    }
    if !report.issues.is_empty() {
        println!("issues:");
        for line in &report.issues {
            println!("  - {line}");
        }
    }
    Ok(())
}

/// Runs the selected command; returns the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let base = PathOverrides {
        corpus_root: cli.corpus.clone(),
        store_dir: cli.store.clone(),
        ..PathOverrides::default()
    };

    let report = match cli.command {
        Command::Extract {
            match_threshold,
            force,
            create_store,
            dry_run,
        } => commands::extract::run(&commands::extract::ExtractCommandOptions {
            paths: base,
            thresholds: ThresholdOverrides {
                extract_match: match_threshold,
                ..ThresholdOverrides::default()
            },
            force,
            dry_run,
            create_store,
        })?,
        Command::Dedup {
            thresholds,
            progress_file,
            report_file,
            dry_run,
        } => commands::dedup::run(&commands::dedup::DedupCommandOptions {
            paths: PathOverrides {
                progress_file,
                report_file,
                ..base
            },
            thresholds: ThresholdOverrides {
                dedup_exact: thresholds.exact,
                report_floor: thresholds.report_floor,
                ..ThresholdOverrides::default()
            },
            dry_run,
        })?,
        Command::Scan { threshold } => {
            commands::scan::run(&commands::scan::ScanCommandOptions {
                paths: base,
                threshold,
            })?
        }
        Command::Repair { dry_run } => commands::repair::run(&commands::repair::RepairOptions {
            paths: base,
            dry_run,
        })?,
        Command::Status => commands::status::run(&base)?,
    };

    print_report(&report, cli.json)?;
    Ok(report.exit_code())
}
