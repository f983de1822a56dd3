//! Mnemon operator CLI
//!
//! Single-purpose invocations over the memory engine. Every command
//! prints a one-line summary on success and exits non-zero on failure;
//! logs go to stderr so output stays machine-consumable.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemon_core::{
    CandidateEntry, MemoryEngine, MnemonConfig, SourceStamp, SupervisionOutcome,
};

#[derive(Parser)]
#[command(name = "mnemon", version, about = "Operator CLI for the mnemon memory engine")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialise the store and report counts
    Init,
    /// Query the store with free text
    Query {
        /// Query text
        text: String,
        /// Comma-separated domain hints (at most 3)
        #[arg(long, value_delimiter = ',')]
        domains: Vec<String>,
        /// Token budget override
        #[arg(long)]
        budget: Option<usize>,
        /// Entry cap override
        #[arg(long)]
        max: Option<usize>,
        /// Print full records as JSON instead of one line per hit
        #[arg(long)]
        json: bool,
    },
    /// List the top memories by activation
    Top {
        /// How many rows to list
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Print store statistics
    Stats,
    /// Apply multiplicative activation decay
    Decay {
        /// Factor override; the configured daily factor when omitted
        #[arg(long)]
        factor: Option<f64>,
    },
    /// Report low-activation memories (never deletes)
    Low {
        /// Activation threshold; the configured prune threshold when omitted
        #[arg(long)]
        threshold: Option<f64>,
        /// How many rows to list
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Deprecate one memory in favour of another
    Deprecate {
        /// Memory to deprecate
        old_id: String,
        /// Replacement memory
        new_id: String,
    },
    /// Mark one memory as a correction of another
    Correct {
        /// The correcting memory
        correction_id: String,
        /// The memory being corrected
        corrected_id: String,
    },
    /// Back-fill missing embeddings
    Backfill,
    /// Ingest candidate entries (JSON lines) from a file or stdin
    Ingest {
        /// Ingestion channel (atomic, session, reasoning)
        #[arg(long)]
        channel: String,
        /// Source path recorded for change detection
        #[arg(long)]
        source: Option<PathBuf>,
        /// Ingest even when the source fingerprint is unchanged
        #[arg(long)]
        force: bool,
        /// Candidate file; stdin when omitted
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let mut config = MnemonConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }

    let engine = MemoryEngine::new(config).context("failed to open memory engine")?;

    match cli.command {
        Command::Init => {
            let total = engine.store().count()?;
            let active = engine.store().count_active()?;
            println!("initialised: {} memories ({} active)", total, active);
        }
        Command::Query {
            text,
            domains,
            budget,
            max,
            json,
        } => {
            let mut request = engine.default_request(&text);
            request.domains = domains.into_iter().take(3).collect();
            if let Some(budget) = budget {
                request.token_budget = budget;
            }
            if let Some(max) = max {
                request.max_entries = max;
            }
            let results = engine.retrieve(&request)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("query: {} results", results.len());
                for r in &results {
                    let spread = if r.via_spread { " (spread)" } else { "" };
                    println!(
                        "  {:.3}{} [{}] {}  {}",
                        r.score, spread, r.memory.domain, r.memory.id, r.memory.title
                    );
                }
            }
        }
        Command::Top { count } => {
            let rows = engine.store().top_by_activation(count)?;
            println!("top: {} rows", rows.len());
            for r in &rows {
                println!(
                    "  {:>10.3}  {:>4}x  [{}] {}",
                    r.activation, r.retrieval_count, r.domain, r.id
                );
            }
        }
        Command::Stats => {
            let stats = engine.store().stats()?;
            println!(
                "stats: {} total, {} active, {} deprecated, {} embedded",
                stats.total, stats.active, stats.deprecated, stats.with_embedding
            );
            for (domain, n) in &stats.by_domain {
                println!("  domain {:<24} {}", domain, n);
            }
            for (pt, n) in &stats.by_pattern_type {
                println!("  type   {:<24} {}", pt, n);
            }
            for (bucket, n) in &stats.activation_buckets {
                println!("  activation {:<12} {}", bucket, n);
            }
        }
        Command::Decay { factor } => {
            let affected = engine.decay(factor)?;
            println!("decay: {} rows updated", affected);
        }
        Command::Low { threshold, count } => {
            let threshold = threshold.unwrap_or(engine.config().decay.prune_threshold);
            let rows = engine.store().low_activation(threshold, count)?;
            println!("low: {} rows below {}", rows.len(), threshold);
            for r in &rows {
                println!("  {:>10.4}  [{}] {}", r.activation, r.domain, r.id);
            }
        }
        Command::Deprecate { old_id, new_id } => {
            match engine.deprecate(&old_id, &new_id)? {
                SupervisionOutcome::Applied => {
                    println!("deprecated: {} superseded by {}", old_id, new_id);
                }
                SupervisionOutcome::NotFound { id } => {
                    bail!("not found: {}", id);
                }
            }
        }
        Command::Correct {
            correction_id,
            corrected_id,
        } => match engine.mark_correction(&correction_id, &corrected_id)? {
            SupervisionOutcome::Applied => {
                println!("correction: {} corrects {}", correction_id, corrected_id);
            }
            SupervisionOutcome::NotFound { id } => {
                bail!("not found: {}", id);
            }
        },
        Command::Backfill => {
            let report = engine.backfill_embeddings()?;
            println!(
                "backfill: {} embedded, {} failed",
                report.embedded, report.failed
            );
        }
        Command::Ingest {
            channel,
            source,
            force,
            file,
        } => {
            let raw = match &file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };

            let entries = parse_candidates(&raw)?;

            // Fingerprint the declared source, falling back to the
            // candidate file itself.
            let stamp = match (&source, &file) {
                (Some(path), _) | (None, Some(path)) => {
                    let content = std::fs::read(path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    Some(SourceStamp::of(&path.to_string_lossy(), &content))
                }
                (None, None) => None,
            };

            let report = engine.ingest(&entries, &channel, stamp.as_ref(), force)?;
            if report.source_unchanged {
                println!("ingest: source unchanged, skipped");
            } else {
                println!(
                    "ingest: {} added, {} existing, {} duplicates, {} embedded, {} embed failures",
                    report.added,
                    report.skipped_existing,
                    report.skipped_duplicate,
                    report.embedded,
                    report.embed_failures
                );
            }
        }
    }

    Ok(())
}

/// Parse JSON-lines candidate entries, skipping blank lines
fn parse_candidates(raw: &str) -> anyhow::Result<Vec<CandidateEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: CandidateEntry = serde_json::from_str(line)
            .with_context(|| format!("invalid candidate on line {}", lineno + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}
