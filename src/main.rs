use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::{info, warn};

use schoolchecker::config::Config;
use schoolchecker::db::Store;
use schoolchecker::report::ReportInput;
use schoolchecker::{ranking, rating, report, telemetry};

#[derive(Parser)]
#[command(name = "schoolchecker")]
#[command(about = "Ofsted ratings and KS2 league tables for SchoolChecker.io", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import KS2 results or Ofsted inspections from a CSV file
    #[command(group(
        ArgGroup::new("source")
            .args(["results", "inspections"])
            .required(true)
            .multiple(false)
    ))]
    Import {
        #[arg(long)]
        results: Option<PathBuf>,
        #[arg(long)]
        inspections: Option<PathBuf>,
    },
    /// Show the composite Ofsted rating for a school's latest inspection
    Rate {
        #[arg(long)]
        urn: i64,
    },
    /// Rank the primary schools of a local authority
    Rank {
        #[arg(long)]
        la: i32,
        #[arg(long, default_value_t = 2024)]
        year: i32,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Emit the full ranking as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show where one school sits within its local authority
    Position {
        #[arg(long)]
        urn: i64,
        #[arg(long, default_value_t = 2024)]
        year: i32,
    },
    /// Recalculate and store the national league table for a year
    RefreshRankings {
        #[arg(long)]
        year: i32,
    },
    /// Generate a markdown report for a local authority
    Report {
        #[arg(long)]
        la: i32,
        #[arg(long, default_value_t = 2024)]
        year: i32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    telemetry::init(&config.log_level)?;

    let store = Store::connect(&config).await?;
    run(cli.command, &store).await
}

async fn run(command: Commands, store: &Store) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            store.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.seed().await?;
            println!("Seed data inserted.");
        }
        Commands::Import {
            results,
            inspections,
        } => {
            if let Some(path) = results {
                let imported = store.import_results_csv(&path).await?;
                println!("Imported {imported} result rows from {}.", path.display());
            }
            if let Some(path) = inspections {
                let summary = store.import_inspections_csv(&path).await?;
                println!(
                    "Inserted {} inspections from {} ({} already present, {} for unknown schools).",
                    summary.inserted,
                    path.display(),
                    summary.duplicates,
                    summary.unknown_schools
                );
            }
        }
        Commands::Rate { urn } => {
            let inspection = store.latest_inspection(urn).await?;
            match rating::calculate_rating(inspection.as_ref()) {
                Some(composite) if composite.is_calculated => println!(
                    "{}: {} ({} of {} categories judged)",
                    composite.source.display_label(),
                    rating::rating_label(composite.rating),
                    composite.categories_used,
                    composite.total_categories
                ),
                Some(composite) => println!(
                    "{}: {}",
                    composite.source.display_label(),
                    rating::rating_label(composite.rating)
                ),
                None => println!("No rating available for URN {urn}."),
            }
        }
        Commands::Rank {
            la,
            year,
            limit,
            json,
        } => {
            let cohort = store.fetch_cohort(la, year).await?;
            let ranked = ranking::rank_cohort(&cohort);

            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
                return Ok(());
            }

            if ranked.is_empty() {
                println!("No KS2 results for local authority {la} in {year}.");
                return Ok(());
            }

            let urns: Vec<i64> = ranked.iter().map(|entry| entry.urn).collect();
            let names = store.school_names(&urns).await?;
            println!("Top schools in local authority {la} ({year}):");
            for entry in ranked.iter().take(limit) {
                let name = names
                    .get(&entry.urn)
                    .map(String::as_str)
                    .unwrap_or("Unknown school");
                println!("- #{} {} (URN {})", entry.rank, name, entry.urn);
            }
        }
        Commands::Position { urn, year } => {
            let school = store
                .school(urn)
                .await?
                .with_context(|| format!("no school with URN {urn}"))?;
            let cohort = store.fetch_cohort(school.la_code, year).await?;

            match ranking::cohort_position(&cohort, urn) {
                Some(position) => println!(
                    "{} is ranked {} of {} in {} ({year}).",
                    school.name, position.rank, position.total, school.la_name
                ),
                None => println!("{} has no KS2 results for {year}.", school.name),
            }
        }
        Commands::RefreshRankings { year } => {
            let rows = store.fetch_national(year).await?;
            if rows.is_empty() {
                warn!(year, "no primary results to rank");
                println!("No primary results found for {year}.");
                return Ok(());
            }

            let rankings = ranking::rank_national(year, &rows);
            let stored = store.upsert_rankings(&rankings).await?;
            info!(year, stored, "national rankings refreshed");
            println!("Stored {stored} rankings for {year}.");
        }
        Commands::Report { la, year, out } => {
            let results = store.fetch_cohort(la, year).await?;
            let urns: Vec<i64> = results.iter().map(|row| row.urn).collect();
            let names = store.school_names(&urns).await?;
            let inspections = store.latest_inspections_for_la(la).await?;
            let la_name = match urns.first() {
                Some(urn) => store
                    .school(*urn)
                    .await?
                    .map(|school| school.la_name)
                    .unwrap_or_else(|| format!("LA {la}")),
                None => format!("LA {la}"),
            };

            let report = report::build_report(&ReportInput {
                la_name: &la_name,
                data_year: year,
                generated_on: Utc::now().date_naive(),
                results: &results,
                names: &names,
                inspections: &inspections,
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
