//! intelfeed CLI
//!
//! Collects threat-intelligence articles from feeds, Reddit and Telegram,
//! deduplicated at the incident level.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use intelfeed_core::{extract_cves, extract_indicators, IndicatorMode, IndicatorSet};
use intelfeed_runtime::{
    ArticleSink, DedupBackend, DedupStore, JsonFileDedupStore, JsonFileSink, Pipeline,
    PipelineConfig, PipelineSession, RunReport,
};

const DEFAULT_CONFIG: &str = "intelfeed.toml";

#[derive(Parser)]
#[command(name = "intelfeed")]
#[command(author, version, about = "Threat-intelligence news collector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./intelfeed.toml when present)
    #[arg(short, long, global = true, env = "INTELFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collection pass
    Run {
        /// Override the workspace directory
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Overall run deadline in seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Keep dedup state in memory only
        #[arg(long)]
        dry_run: bool,

        /// Print the indicators of each accepted article
        #[arg(long)]
        iocs: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract indicators and CVEs from a file or stdin
    Iocs {
        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Only domains and URLs flagged as suspicious
        #[arg(long)]
        suspicious_only: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show dedup store and article counts
    Status {
        /// Number of recent articles to list
        #[arg(short, long, default_value = "10")]
        recent: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            workspace,
            deadline,
            dry_run,
            iocs,
            json,
        } => {
            let mut config = config;
            if let Some(workspace) = workspace {
                config.workspace = workspace;
            }
            if deadline.is_some() {
                config.limits.run_deadline_secs = deadline;
            }
            if dry_run {
                config.dedup.backend = DedupBackend::Memory;
            }
            run_collection(config, iocs, json).await?;
        }
        Commands::Iocs {
            input,
            suspicious_only,
            json,
        } => {
            extract_from_input(&config, input.as_deref(), suspicious_only, json)?;
        }
        Commands::Status { recent } => {
            show_status(&config, recent).await?;
        }
    }

    Ok(())
}

/// Explicit path must exist; the implicit default may be absent
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            PipelineConfig::load(DEFAULT_CONFIG).context("loading ./intelfeed.toml")
        }
        None => {
            info!("No {} found, using defaults", DEFAULT_CONFIG);
            Ok(PipelineConfig::default())
        }
    }
}

async fn run_collection(config: PipelineConfig, print_iocs: bool, json: bool) -> Result<()> {
    if config.source_count() == 0 {
        anyhow::bail!("No sources configured. Add feeds, subreddits or channels under [sources]");
    }

    if !json {
        println!("📰 intelfeed - threat-intelligence collector\n");
        println!(
            "📡 Sources: {} feeds, {} subreddits, {} channels",
            config.sources.feeds.len(),
            config.sources.subreddits.len(),
            config.sources.channels.len()
        );
        println!("📁 Workspace: {}", config.workspace.display());
        if let Some(secs) = config.limits.run_deadline_secs {
            println!("⏱️  Deadline: {}s", secs);
        }
        println!();
    }

    let session = PipelineSession::open(config).await?;
    let pipeline = Pipeline::new(session);
    let report = pipeline.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    if print_iocs {
        print_indicator_report(&report);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n✅ Run {} complete", report.run_id);
    println!(
        "   Sources: {} ok, {} failed",
        report.sources_ok, report.sources_failed
    );
    println!("   Discovered: {}", report.discovered);
    println!("   Filtered out: {}", report.filtered_out);
    println!("   Fetch failed: {}", report.fetch_failed);
    println!("   Duplicates: {}", report.duplicates);
    println!("   Accepted: {}", report.accepted.len());
    if report.deadline_hit {
        println!("⚠️  Deadline reached, {} entries abandoned", report.abandoned);
    }

    if report.accepted.is_empty() {
        return;
    }

    println!("\n{}", "=".repeat(60));
    for accepted in &report.accepted {
        let article = &accepted.article;
        let marker = if accepted.replaced { "♻️ " } else { "🆕" };
        println!("{} [{:.1}] {}", marker, accepted.score, article.title);
        println!("   {}", article.article_url);
        if !article.cves.is_empty() {
            println!("   CVEs: {}", article.cves.join(", "));
        }
    }
}

fn print_indicator_report(report: &RunReport) {
    let with_iocs: Vec<_> = report
        .accepted
        .iter()
        .filter(|a| !a.indicators.is_empty())
        .collect();

    println!("\n🔎 Indicators ({} articles)", with_iocs.len());
    for accepted in with_iocs {
        println!("\n{}", accepted.article.title);
        print_indicators(&accepted.indicators);
    }
}

fn print_indicators(indicators: &IndicatorSet) {
    for (indicator_type, values) in indicators.grouped() {
        println!("   {} ({})", indicator_type, values.len());
        for value in values {
            let flag = indicators
                .get(indicator_type, &value)
                .is_some_and(|i| i.suspicious);
            println!("     {}{}", value, if flag { "  ⚠️" } else { "" });
        }
    }
}

fn extract_from_input(
    config: &PipelineConfig,
    input: Option<&Path>,
    suspicious_only: bool,
    json: bool,
) -> Result<()> {
    let text = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        }
    };

    let rules = config.rule_table()?;
    let mode = if suspicious_only {
        IndicatorMode::SuspiciousOnly
    } else {
        config.indicators.harvest.mode
    };

    let cves = extract_cves(&text, &rules);
    let indicators = extract_indicators(&text, &rules, mode);

    if json {
        let out = serde_json::json!({
            "cves": cves,
            "indicators": indicators.iter().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if cves.is_empty() && indicators.is_empty() {
        println!("No CVEs or indicators found");
        return Ok(());
    }

    if !cves.is_empty() {
        println!("🛡️  CVEs ({})", cves.len());
        for cve in &cves {
            println!("     {}", cve);
        }
    }
    if !indicators.is_empty() {
        println!("🔎 Indicators ({})", indicators.len());
        print_indicators(&indicators);
    }

    Ok(())
}

async fn show_status(config: &PipelineConfig, recent: usize) -> Result<()> {
    let store_path = config.store_path();
    let articles_path = config.articles_path();

    println!("📁 Workspace: {}\n", config.workspace.display());

    let store = JsonFileDedupStore::open(&store_path, config.dedup.material_growth).await?;
    let counts = store.counts().await?;
    println!("🗄️  Dedup store: {}", store_path.display());
    println!("   URLs: {}", counts.urls);
    println!("   Incidents: {}", counts.incidents);
    println!("   Content fingerprints: {}", counts.content);

    let sink = JsonFileSink::open(&articles_path).await?;
    let articles = sink.articles().await?;
    println!("\n📰 Articles: {} in {}", articles.len(), articles_path.display());

    for article in articles.iter().take(recent) {
        println!(
            "   {} | {} | {}",
            article.published.format("%Y-%m-%d %H:%M"),
            article.source,
            article.title
        );
    }

    Ok(())
}
