use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cache;
mod db;
mod insight;
mod models;
mod pipeline;
mod report;
mod source;

use crate::cache::CachedSource;
use crate::models::SourceType;
use crate::source::{FetchParams, SimulatedSource};

#[derive(Parser)]
#[command(name = "insight-pipeline")]
#[command(about = "Batch insight generation over ingested raw records", long_about = None)]
struct Cli {
    /// SQLite database location
    #[arg(long, global = true, env = "DATABASE_URL", default_value = "sqlite://insights.db")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load one realistic raw record per source type
    Seed,
    /// Fetch payloads from the simulated data source and store them
    Ingest {
        /// Source type to fetch (repeatable); all types when omitted
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Fetch parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Seed for the simulator, for reproducible payloads
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = cache::DEFAULT_TTL_SECS)]
        cache_ttl_secs: i64,
        #[arg(long, default_value_t = cache::DEFAULT_CAPACITY)]
        cache_capacity: usize,
    },
    /// Import raw records from a CSV file (source_type,content)
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run one insight generation pass over unprocessed records
    Generate,
    /// Show record and insight counts
    Stats,
    /// List the most recent insights
    Insights {
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    /// List the known data sources
    Sources,
    /// Show one raw record and its insight
    Show {
        #[arg(long)]
        id: i64,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn parse_sources(values: &[String]) -> anyhow::Result<Vec<SourceType>> {
    if values.is_empty() {
        return Ok(SourceType::ALL.to_vec());
    }
    values.iter().map(|value| value.parse()).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let pool = db::connect(&cli.database_url)
        .await
        .with_context(|| format!("failed to connect to {}", cli.database_url))?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} seed records.");
        }
        Commands::Ingest {
            sources,
            params,
            seed,
            cache_ttl_secs,
            cache_capacity,
        } => {
            let source_types = parse_sources(&sources)?;
            let params = FetchParams::parse_pairs(&params)?;
            let source = CachedSource::new(
                SimulatedSource::new(seed),
                chrono::Duration::seconds(cache_ttl_secs),
                cache_capacity,
            );

            let ids = pipeline::ingest(&pool, &source, &source_types, &params).await?;
            let cached = source.cached_entries()?;
            tracing::debug!(cached, "payload cache size");
            println!("Stored {} raw records.", ids.len());
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} raw records from {}.", csv.display());
        }
        Commands::Generate => {
            let report = pipeline::run_insight_pass(&pool).await?;
            println!(
                "Generated {} insights (run {}).",
                report.insights_generated, report.run_id
            );
            if report.skipped_unrecognized > 0 {
                println!(
                    "Left {} records with unrecognized source types unprocessed.",
                    report.skipped_unrecognized
                );
            }
            if report.failed > 0 {
                println!("Skipped {} malformed records.", report.failed);
            }
            if report.already_processed > 0 {
                println!(
                    "{} records were processed concurrently by another run.",
                    report.already_processed
                );
            }
        }
        Commands::Stats => {
            let stats = db::data_stats(&pool).await?;
            println!("Raw records: {}", stats.total_records);
            println!("Processed: {}", stats.processed_records);
            println!("Pending: {}", stats.pending_records());
            println!("Insights: {}", stats.total_insights);
            for entry in stats.by_source_type.iter() {
                println!("- {}: {}", entry.source_type, entry.count);
            }
        }
        Commands::Insights { limit } => {
            let insights = db::recent_insights(&pool, limit).await?;
            if insights.is_empty() {
                println!("No insights generated yet.");
                return Ok(());
            }

            for (index, insight) in insights.iter().enumerate() {
                println!("{}. [{}] {}", index + 1, insight.source_type, insight.text);
                println!(
                    "   confidence {:.2} | {} | {}",
                    insight.confidence,
                    insight.category_label,
                    insight.generated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Sources => {
            for entry in source::catalog() {
                println!(
                    "- {} ({}) [{}]: {}",
                    entry.source_type,
                    entry.name,
                    entry.status,
                    entry.endpoints.join(", ")
                );
            }
        }
        Commands::Show { id } => {
            let record = db::fetch_raw_record(&pool, id)
                .await?
                .with_context(|| format!("no raw record with id {id}"))?;
            println!(
                "Record {} ({}, created {}, processed: {})",
                record.id, record.source_type, record.created_at, record.processed
            );
            println!("{}", record.content);

            for insight in db::fetch_insights_for(&pool, id).await? {
                println!(
                    "Insight {} for record {} from run {} at {}:",
                    insight.id, insight.raw_record_id, insight.run_id, insight.generated_at
                );
                println!(
                    "   {} (confidence {:.2}, {})",
                    insight.text, insight.confidence, insight.category_label
                );
            }
        }
        Commands::Report { limit, out } => {
            let stats = db::data_stats(&pool).await?;
            let recent = db::recent_insights(&pool, limit).await?;
            let report = report::build_report(&stats, &recent, chrono::Utc::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_apply() {
        let cli = Cli::try_parse_from(["insight-pipeline", "insights"]).unwrap();
        assert!(matches!(cli.command, Commands::Insights { limit: 5 }));
    }

    #[test]
    fn negative_limits_are_rejected() {
        for command in ["insights", "report"] {
            let parsed = Cli::try_parse_from(["insight-pipeline", command, "--limit", "-1"]);
            assert!(parsed.is_err(), "{command} accepted a negative limit");
        }
    }

    #[test]
    fn parse_sources_defaults_to_every_type() {
        assert_eq!(parse_sources(&[]).unwrap(), SourceType::ALL.to_vec());
        assert!(parse_sources(&["weather".to_string()]).is_err());
    }
}
