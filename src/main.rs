//! # Compliance Checker CLI (`ccheck`)
//!
//! ## Usage
//!
//! ```bash
//! ccheck [--config ./config/ccheck.toml] [--progress auto] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ccheck rules` | List the active rule catalog |
//! | `ccheck audit model <pdfs...>` | Audit with the hosted model |
//! | `ccheck audit retrieval <pdfs...>` | Audit with retrieval scoring |
//! | `ccheck index <paths...> --out <dir>` | Build and persist vector indexes |
//! | `ccheck completions <shell>` | Print shell completions |
//!
//! Reports are JSON on stdout (or `--out`). Logs and progress go to stderr.
//! The exit status is 2 when an audit stopped early on an authentication
//! failure.

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use compliance_checker::analyzer::{GeminiClient, ModelAnalyzer, RateLimiter, TokioClock};
use compliance_checker::audit::{collect_pdfs, run_model_audit, RetrievalPipeline, SourceDocument};
use compliance_checker::config::{self, Config};
use compliance_checker::embedding::create_embedder;
use compliance_checker::models::Rule;
use compliance_checker::progress::ProgressMode;
use compliance_checker::report::ComplianceReport;
use compliance_checker::rules::RuleCatalog;

/// Compliance Checker: audit PDF policies against compliance rules.
#[derive(Parser)]
#[command(
    name = "ccheck",
    about = "Audit PDF policy documents against compliance rule catalogs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr: `auto`, `human`, `json` or `off`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the rules of the active catalog.
    Rules {
        /// Built-in catalog to list (`regulatory` or `security`).
        #[arg(long)]
        catalog: Option<String>,
    },

    /// Audit documents and print a JSON report.
    Audit {
        #[command(subcommand)]
        pipeline: AuditPipeline,
    },

    /// Build and persist a vector index per document.
    ///
    /// Directories are searched recursively for `*.pdf`. Writes
    /// `<stem>.index`, `<stem>.index.meta.json` and `<stem>.chunks.json`.
    Index {
        /// PDF files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output directory.
        #[arg(long)]
        out: PathBuf,
    },

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum AuditPipeline {
    /// Send each PDF to the hosted model (needs the API key in the environment).
    Model(AuditArgs),
    /// Score rules by keyword evidence in retrieved chunks.
    Retrieval(AuditArgs),
}

#[derive(Args)]
struct AuditArgs {
    /// PDF files or directories.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Rule id or name to check; repeat for several. Defaults to `[rules] select`,
    /// or every rule in the catalog.
    #[arg(long = "rule")]
    rules: Vec<String>,

    /// Built-in catalog (`regulatory` or `security`).
    #[arg(long)]
    catalog: Option<String>,

    /// Write the report here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("compliance_checker=info,ccheck=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ccheck", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    init_tracing();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let progress = ProgressMode::parse(&cli.progress)?.reporter();

    match cli.command {
        Commands::Rules { catalog } => {
            let catalog = RuleCatalog::from_config(&cfg.rules, catalog.as_deref())?;
            print_rules(catalog.rules());
        }
        Commands::Audit { pipeline } => {
            let report = match pipeline {
                AuditPipeline::Model(args) => {
                    let rules = active_rules(&cfg, &args)?;
                    let documents = source_documents(&args.paths)?;
                    let client = Arc::new(GeminiClient::new(&cfg.model)?);
                    let limiter = Arc::new(RateLimiter::new(
                        Arc::new(TokioClock),
                        cfg.model.min_delay(),
                    ));
                    let analyzer = ModelAnalyzer::new(client, limiter, &cfg.model);
                    let report =
                        run_model_audit(&analyzer, &documents, &rules, progress.as_ref()).await;
                    write_report(&report, args.out.as_deref())?;
                    report
                }
                AuditPipeline::Retrieval(args) => {
                    let rules = active_rules(&cfg, &args)?;
                    let documents = source_documents(&args.paths)?;
                    let embedder = create_embedder(&cfg.embedding)?;
                    let pipeline = RetrievalPipeline::new(embedder.as_ref(), &cfg);
                    let report = pipeline.audit(&documents, &rules, progress.as_ref()).await;
                    write_report(&report, args.out.as_deref())?;
                    report
                }
            };

            tracing::info!(
                documents = report.document_results.len(),
                errors = report.document_errors.len(),
                passed = report.passed,
                failed = report.failed,
                warnings = report.warnings,
                compliance_rate = report.compliance_rate,
                "audit finished"
            );
            if let Some(reason) = &report.aborted {
                eprintln!("Audit aborted: {}", reason);
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Index { paths, out } => {
            let documents = source_documents(&paths)?;
            let embedder = create_embedder(&cfg.embedding)?;
            let pipeline = RetrievalPipeline::new(embedder.as_ref(), &cfg);
            let written = pipeline
                .index_documents(&documents, &out, progress.as_ref())
                .await?;
            for path in &written {
                println!("{}", path.display());
            }
            println!(
                "Indexed {} of {} documents into {}",
                written.len(),
                documents.len(),
                out.display()
            );
        }
        Commands::Completions { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn active_rules(cfg: &Config, args: &AuditArgs) -> Result<Vec<Rule>> {
    let catalog = RuleCatalog::from_config(&cfg.rules, args.catalog.as_deref())?;
    let selectors = if args.rules.is_empty() {
        &cfg.rules.select
    } else {
        &args.rules
    };
    catalog.select(selectors)
}

fn source_documents(paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    let files = collect_pdfs(paths)?;
    if files.is_empty() {
        anyhow::bail!("No PDF files found");
    }
    Ok(files.into_iter().map(SourceDocument::File).collect())
}

fn write_report(report: &ComplianceReport, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match out {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn print_rules(rules: &[Rule]) {
    println!(
        "{:<10} {:<9} {:<22} {}",
        "ID", "SEVERITY", "CATEGORY", "NAME"
    );
    for rule in rules {
        println!(
            "{:<10} {:<9} {:<22} {}",
            rule.id,
            rule.severity.as_str(),
            rule.category,
            rule.name
        );
        println!("{:<10} {}", "", rule.description);
    }
}
