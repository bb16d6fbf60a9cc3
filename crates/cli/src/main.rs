use anyhow::{bail, Result};
use autosort_core::config::{self, AppConfig};
use autosort_core::learning;
use autosort_core::models::{now_millis, FileEvent};
use autosort_core::pipeline::{build_registry, Engine};
use autosort_core::rules;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use cli::{undo, watch};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { paths } => watch::watch_paths(cfg, paths).await,
        Commands::Sweep { dir } => watch::sweep(cfg, dir).await,
        Commands::Classify { file, json } => run_classify(cfg, &file, json).await,
        Commands::Rules { action } => run_rules(cfg, action).await,
        Commands::Activity { json } => run_activity(cfg, json).await,
        Commands::Undo => undo::run_undo(cfg).await,
        Commands::Corrections { clear, json } => run_corrections(cfg, clear, json).await,
        Commands::Stats { limit, json } => run_stats(cfg, limit, json).await,
    }
}

#[derive(Parser)]
#[command(name = "autosort")]
#[command(about = "Routes newly arrived files into destination folders", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch folders and route new arrivals
    Watch {
        /// Folders to watch; defaults to watch.paths from config
        paths: Vec<String>,
    },
    /// Route files already sitting in a folder
    Sweep {
        /// Folder to sweep; defaults to the first watch path
        dir: Option<String>,
    },
    /// Classify one file without moving it
    Classify {
        file: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage filename rules
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },
    /// Show recent moves, newest first
    Activity {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Undo the latest move if its undo window is still open
    Undo,
    /// Show or clear the correction history
    Corrections {
        /// Delete every record
        #[arg(long, default_value_t = false)]
        clear: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Per-destination accuracy of suggestions
    Stats {
        /// Rows per section
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Add a rule; `*` matches any run of characters
    Add { pattern: String, destination: String },
    /// List rules in evaluation order
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a rule by id
    Remove { id: i64 },
}

fn when(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn run_classify(cfg: AppConfig, file: &str, json: bool) -> Result<()> {
    let registry = build_registry(&cfg);
    let engine = Engine::open(cfg, &registry).await?;
    let event = FileEvent::from_path(Path::new(file))?;
    let proposal = engine.preview(&event, false).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&proposal)?);
    } else {
        println!("file:        {}", proposal.file.name);
        println!("relevant:    {}", proposal.result.is_relevant);
        println!("destination: {}", proposal.result.destination);
        println!(
            "confidence:  {:.2} raw, {:.2} adjusted ({:?})",
            proposal.result.confidence, proposal.final_confidence, proposal.result.source
        );
        println!("decision:    {:?}", proposal.decision);
        println!("rationale:   {}", proposal.result.rationale);
        if let Some(name) = &proposal.result.suggested_rename {
            println!("rename:      {}", name);
        }
    }
    Ok(())
}

async fn run_rules(cfg: AppConfig, action: RuleAction) -> Result<()> {
    let pool = storage::open(&cfg.database.path).await?;
    match action {
        RuleAction::Add {
            pattern,
            destination,
        } => {
            if rules::compile(&pattern).is_none() {
                bail!("invalid pattern: {}", pattern);
            }
            let id = storage::rules::add(&pool, &pattern, &destination, now_millis()).await?;
            println!("added rule {}: {} → {}", id, pattern, destination);
        }
        RuleAction::List { json } => {
            let rules = storage::rules::list(&pool).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                for r in rules {
                    println!("{:>4}  {}  →  {}", r.id.unwrap_or_default(), r.pattern, r.destination);
                }
            }
        }
        RuleAction::Remove { id } => {
            if storage::rules::delete(&pool, id).await? {
                println!("removed rule {}", id);
            } else {
                println!("no rule {}", id);
            }
        }
    }
    Ok(())
}

async fn run_activity(cfg: AppConfig, json: bool) -> Result<()> {
    let pool = storage::open(&cfg.database.path).await?;
    let entries = storage::activity::list(&pool).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for e in entries {
        let renamed = e
            .original_filename
            .as_deref()
            .map(|o| format!(" (was {})", o))
            .unwrap_or_default();
        println!(
            "{:>4}  {}  {}{}  {} → {}{}",
            e.id.unwrap_or_default(),
            when(e.created_at),
            e.filename,
            renamed,
            e.source,
            e.destination,
            if e.undone { "  [undone]" } else { "" }
        );
    }
    Ok(())
}

async fn run_corrections(cfg: AppConfig, clear: bool, json: bool) -> Result<()> {
    let pool = storage::open(&cfg.database.path).await?;
    if clear {
        let n = storage::corrections::clear(&pool).await?;
        println!("cleared {} record(s)", n);
        return Ok(());
    }
    let records = storage::corrections::list(&pool).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for r in records {
            println!(
                "{}  {:<9}  {}  suggested {}  chose {}",
                when(r.created_at),
                r.outcome,
                r.filename,
                r.suggested,
                if r.chosen.is_empty() { "-" } else { r.chosen.as_str() }
            );
        }
    }
    Ok(())
}

async fn run_stats(cfg: AppConfig, limit: usize, json: bool) -> Result<()> {
    let pool = storage::open(&cfg.database.path).await?;
    let history = storage::corrections::list(&pool).await?;
    let insights = learning::insights(&history, limit);
    if json {
        println!("{}", serde_json::to_string_pretty(&insights)?);
        return Ok(());
    }
    println!("most reliable:");
    for s in &insights.top {
        println!(
            "  {:>3.0}%  {} ({} judged)",
            s.accept_rate * 100.0,
            s.destination,
            s.counts.judged()
        );
    }
    println!("most corrected:");
    for s in &insights.problems {
        println!(
            "  {:>3.0}%  {} ({} corrected)",
            s.reject_rate * 100.0,
            s.destination,
            s.counts.corrected
        );
    }
    println!("recent:");
    for r in &insights.recent {
        println!("  {}  {}  {}", when(r.created_at), r.outcome, r.filename);
    }
    Ok(())
}
