use anyhow::{Context, Result};
use bioharvest::config::{find_config_file, load_config, load_env_config, Config};
use bioharvest::models::{
    CanonicalRecord, FullTextResult, Query, QueryKind, ResultLimits, SearchResult,
};
use bioharvest::{FullTextManager, SearchOrchestrator, SourceRegistry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// bioharvest - Search biomedical datasets and publications, and acquire full text
#[derive(Parser, Debug)]
#[command(name = "bioharvest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search biomedical datasets and publications, and acquire full text", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search datasets and publications
    #[command(alias = "s")]
    Search {
        /// Keywords, an identifier (GSE…, PMID, DOI, PMC…) or both
        query: String,

        /// Organism filter (e.g. "Homo sapiens")
        #[arg(long)]
        organism: Option<String>,

        /// Record type filter (e.g. "expression profiling by high throughput sequencing")
        #[arg(long = "type")]
        record_type: Option<String>,

        /// Minimum number of samples for datasets
        #[arg(long)]
        min_samples: Option<u32>,

        /// Maximum datasets and publications to return
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },

    /// Acquire the full text of a publication
    #[command(alias = "ft")]
    Fulltext {
        /// DOI, PMID or PMC id
        identifier: String,
    },
}

fn load(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => match find_config_file() {
            Some(path) => load_config(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => load_env_config()?,
        },
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(verbose: u8, config: &Config) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("bioharvest={}", level)),
    );

    // Logs go to stderr so stdout stays parseable
    let json = config.logging.is_json();
    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load(&cli)?;
    init_tracing(cli.verbose, &config);

    let registry = SourceRegistry::from_config(&config);
    tracing::debug!("Registered sources: {:?}", registry.ids().collect::<Vec<_>>());

    match &cli.command {
        Commands::Search {
            query,
            organism,
            record_type,
            min_samples,
            limit,
        } => {
            let mut q = Query::new(query);
            if let Some(organism) = organism {
                q = q.organism(organism);
            }
            if let Some(record_type) = record_type {
                q = q.record_type(record_type);
            }
            if let Some(min) = min_samples {
                q = q.min_samples(*min);
            }

            let orchestrator = SearchOrchestrator::new(Arc::new(registry), &config)?;
            let result = orchestrator.search(&q, ResultLimits::new(*limit)).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_search(&result);
            }
            if !result.success() {
                anyhow::bail!("every source failed");
            }
        }
        Commands::Fulltext { identifier } => {
            let manager = FullTextManager::new(&registry, &config)?;
            let result = manager.acquire_by_identifier(identifier).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_fulltext(&result);
            }
            if !result.success {
                anyhow::bail!("no full text found for {}", identifier);
            }
        }
    }

    Ok(())
}

fn kind_label(kind: &QueryKind) -> String {
    match kind {
        QueryKind::IdentifierLookup { identifier } => format!("lookup {}", identifier),
        QueryKind::Keyword => "keyword".to_string(),
        QueryKind::Hybrid { identifiers, .. } => format!("hybrid ({} identifiers)", identifiers.len()),
    }
}

fn print_records(heading: &str, records: &[CanonicalRecord]) {
    println!("\n{} ({})", heading, records.len());
    for (i, record) in records.iter().enumerate() {
        let id = record
            .primary_identifier()
            .map(|id| id.to_string())
            .unwrap_or_default();
        println!("{:>3}. {}  {}", i + 1, id, record.title);
        let mut details = vec![record.sources.join(", ")];
        if let Some(year) = record.year {
            details.push(year.to_string());
        }
        if let Some(organism) = &record.organism {
            details.push(organism.clone());
        }
        if let Some(samples) = record.sample_count {
            details.push(format!("{} samples", samples));
        }
        println!("     {}", details.join(" | "));
        println!("     score {}", record.explain());
    }
}

fn print_search(result: &SearchResult) {
    println!("Query: {} [{}]", result.query.text(), kind_label(&result.kind));
    if let Some(opt) = &result.optimization {
        if opt.primary_query != result.query.text() {
            println!("Optimized: {}", opt.primary_query);
        }
    }
    print_records("Datasets", &result.datasets);
    print_records("Publications", &result.publications);

    let failed: Vec<String> = result
        .failed_attempts()
        .map(|a| format!("{} ({})", a.source, a.reason.map(|r| r.to_string()).unwrap_or_default()))
        .collect();
    if !failed.is_empty() {
        println!("\nFailed sources: {}", failed.join(", "));
    }
}

fn print_fulltext(result: &FullTextResult) {
    if result.success {
        println!(
            "Found via {} ({}) quality {:.2}",
            result.source_provider.as_deref().unwrap_or("?"),
            result.source_tier.map(|t| t.to_string()).unwrap_or_default(),
            result.quality_score
        );
        if let Some(url) = &result.source_url {
            println!("Source: {}", url);
        }
        if let Some(content) = &result.content {
            println!("Title: {}", content.title);
            println!(
                "{} sections, {} words, {} figures, {} references",
                content.sections.len(),
                content.word_count,
                content.figures.len(),
                content.references.len()
            );
        }
        if let Some(path) = &result.pdf_path {
            println!("PDF: {}", path.display());
        } else if let Some(artifact) = &result.artifact {
            println!("Saved: {}", artifact.path.display());
        }
    } else {
        println!("No full text found");
    }

    println!("\nAttempts:");
    for attempt in &result.attempts {
        let tier = attempt.tier.map(|t| t.number().to_string()).unwrap_or_default();
        let outcome = if attempt.success {
            "ok".to_string()
        } else {
            attempt.reason.map(|r| r.to_string()).unwrap_or_default()
        };
        println!(
            "  T{} {:<14} {:<10} {:<18} {}ms",
            tier,
            attempt.source,
            attempt
                .format
                .map(|f| format!("{:?}", f).to_lowercase())
                .unwrap_or_default(),
            outcome,
            attempt.latency_ms
        );
    }
}
