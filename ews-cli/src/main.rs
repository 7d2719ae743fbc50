//! EWS CLI - district early-warning analytics for identity-service logs

#![deny(warnings)]

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output
// - No PIN-level data leaves the aggregation step

mod aggregate;
mod export;
mod ingest;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ews_core::config;
use ews_core::report::{render_summary_json, render_summary_text, summarize};
use ews_core::{render_json, render_text, EngineError};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ews")]
#[command(about = "District early-warning analytics over weekly identity-service transactions")]
#[command(version = env!("EWS_VERSION"))]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a weekly district table and write the output exports
    Run {
        /// Path to the weekly district CSV
        input: PathBuf,

        /// Output format for the terminal report
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Print every output row, not just the batch summary
        #[arg(long)]
        rows: bool,

        /// Directory for CSV/JSON exports (nothing is written when omitted)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Aggregate daily PIN-level logs into the weekly district table
    Aggregate {
        /// Daily enrolment log
        #[arg(long)]
        enrol: PathBuf,

        /// Daily demographic update log
        #[arg(long)]
        demo: PathBuf,

        /// Daily biometric update log
        #[arg(long)]
        bio: PathBuf,

        /// PIN reference (pincode,district,state)
        #[arg(long)]
        pincode: PathBuf,

        /// Weekly table output path
        #[arg(long)]
        out: PathBuf,

        /// Also write the geo-cleaning summary as CSV
        #[arg(long)]
        geo_summary: Option<PathBuf>,
    },
    /// Validate or show configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running the engine
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .init();

    match cli.command {
        Commands::Run {
            input,
            format,
            rows,
            out_dir,
            config: config_path,
        } => {
            if !input.exists() {
                anyhow::bail!("Input does not exist: {}", input.display());
            }

            let project_root = std::env::current_dir()?;
            let resolved = config::load_and_resolve(&project_root, config_path.as_deref())
                .context("failed to load configuration")?;
            if let Some(path) = &resolved.config_path {
                eprintln!("Using config: {}", path.display());
            }

            let records = ingest::load_weekly(&input)?;
            let output = match ews_core::run(records, &resolved) {
                Ok(output) => output,
                Err(EngineError::Schema { violations }) => {
                    eprintln!("Schema validation failed ({} violations):", violations.len());
                    for violation in &violations {
                        eprintln!("  - {}", violation);
                    }
                    std::process::exit(1);
                }
            };

            let summary = summarize(&output.records);
            match (format, rows) {
                (OutputFormat::Text, false) => print!("{}", render_summary_text(&summary)),
                (OutputFormat::Text, true) => {
                    print!("{}", render_text(&output.records));
                    println!();
                    print!("{}", render_summary_text(&summary));
                }
                (OutputFormat::Json, false) => println!("{}", render_summary_json(&summary)),
                (OutputFormat::Json, true) => println!("{}", render_json(&output.records)),
            }

            if let Some(out_dir) = out_dir {
                let written = export::write_run_outputs(&out_dir, &output)?;
                eprintln!("Wrote {} files to {}", written.len(), out_dir.display());
            }
        }
        Commands::Aggregate {
            enrol,
            demo,
            bio,
            pincode,
            out,
            geo_summary,
        } => {
            let (records, summaries) = aggregate::aggregate_files(&aggregate::DailyInputs {
                enrolment: &enrol,
                demographic: &demo,
                biometric: &bio,
                pincode: &pincode,
            })?;

            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            ingest::write_weekly(file, &records)
                .with_context(|| format!("failed to write weekly table: {}", out.display()))?;

            print!("{}", export::render_geo_summary(&summaries));
            if let Some(path) = geo_summary {
                export::write_geo_summary(&path, &summaries)?;
            }
            eprintln!("Wrote {} weekly rows to {}", records.len(), out.display());
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                match config::load_and_resolve(&project_root, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print!("{}", render_config(&resolved));
            }
        },
    }

    Ok(())
}

fn render_config(resolved: &config::ResolvedConfig) -> String {
    let mut out = String::from("Configuration:\n");
    match &resolved.config_path {
        Some(p) => out.push_str(&format!("  Source: {}\n", p.display())),
        None => out.push_str("  Source: defaults (no config file found)\n"),
    }

    let a = &resolved.anomaly;
    out.push_str("\nAnomaly:\n");
    out.push_str(&format!("  contamination: {}\n", a.contamination));
    out.push_str(&format!("  min_history_weeks: {}\n", a.min_history_weeks));
    out.push_str(&format!("  seed: {}\n", a.seed));
    out.push_str(&format!("  trees: {}\n", a.trees));
    out.push_str(&format!("  max_samples: {}\n", a.max_samples));

    let t = &resolved.trend;
    out.push_str("\nTrend:\n");
    out.push_str(&format!("  accelerating_change: {}\n", t.accelerating_change));
    out.push_str(&format!("  rising_change: {}\n", t.rising_change));
    out.push_str(&format!("  declining_change: {}\n", t.declining_change));

    let r = &resolved.risk;
    out.push_str("\nRisk:\n");
    out.push_str(&format!("  critical: {}\n", r.critical));
    out.push_str(&format!("  emerging_risk: {}\n", r.emerging_risk));
    out.push_str(&format!("  watchlist: {}\n", r.watchlist));

    let f = &resolved.forecast;
    out.push_str("\nForecast:\n");
    out.push_str(&format!("  window: {}\n", f.window));
    out.push_str(&format!("  horizon_weeks: {}\n", f.horizon_weeks));
    out.push_str(&format!("  rising_multiplier: {}\n", f.rising_multiplier));
    out.push_str(&format!("  declining_multiplier: {}\n", f.declining_multiplier));
    out
}
