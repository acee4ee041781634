mod config;
mod engine;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::Config;
use engine::spawn_engine;
use serde::Serialize;
use snapattend_core::{
    hydrate_roster, open_image, AttendanceOutcome, AttendancePipeline, EnrollmentStore, ScrfdDetector,
};
use snapattend_store::{AttendanceSummary, SqliteStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snapattend", about = "Classroom attendance from a single photo")]
struct Cli {
    /// TOML config file (defaults plus SNAPATTEND_* variables otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student
    Add {
        #[arg(short, long)]
        name: String,
        /// Unique roll number (e.g., "F001")
        #[arg(short, long)]
        roll: String,
    },
    /// Store a reference descriptor from a portrait
    Enroll {
        #[arg(short, long)]
        roll: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Mark attendance from a class photo
    Mark {
        #[arg(short, long)]
        image: PathBuf,
        /// Session date, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Show attendance for a date
    Report {
        /// YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List registered students
    List,
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    name: &'a str,
    roll_number: &'a str,
    #[serde(flatten)]
    outcome: &'a AttendanceOutcome,
}

#[derive(Serialize)]
struct StudentView<'a> {
    id: &'a str,
    name: &'a str,
    roll_number: &'a str,
    enrolled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let mut store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    match cli.command {
        Commands::Add { name, roll } => {
            let person = store.add_student(&name, &roll)?;
            println!("Registered {} ({}) as {}", person.name, person.roll_number, person.id);
        }
        Commands::Enroll { roll, image } => {
            let person = store
                .find_by_roll(&roll)?
                .with_context(|| format!("no student with roll number {roll}"))?;
            let image = open_image(&image)?;
            let engine = spawn_engine(load_pipeline(&config)?)?;

            let result = engine.enroll(image).await?;
            store.set_descriptor(&person.id, result.descriptor)?;
            println!(
                "Enrolled {} ({}) from {} face(s), confidence {:.3}",
                person.name, person.roll_number, result.faces, result.confidence
            );
        }
        Commands::Mark { image, date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let roster = hydrate_roster(store.students()?, &store)?;
            if roster.iter().all(|p| !p.is_enrolled()) {
                tracing::warn!("no student has a reference descriptor, everyone will be absent");
            }
            let image = open_image(&image)?;
            let engine = spawn_engine(load_pipeline(&config)?)?;

            let assignment = engine.submit(image, roster.clone()).await?.wait().await?;
            let session = store.record_attendance(date, &assignment.outcomes)?;

            let outcomes: Vec<OutcomeView> = roster
                .iter()
                .zip(&assignment.outcomes)
                .map(|(person, outcome)| OutcomeView {
                    name: &person.name,
                    roll_number: &person.roll_number,
                    outcome,
                })
                .collect();
            let report = serde_json::json!({
                "session": session,
                "date": date,
                "faces": assignment.matches.len(),
                "outcomes": outcomes,
                "summary": AttendanceSummary::from_outcomes(&assignment.outcomes),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Report { date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let records = store.attendance_on(date)?;
            if records.is_empty() {
                tracing::info!(%date, "no attendance recorded");
            }
            let report = serde_json::json!({
                "date": date,
                "summary": AttendanceSummary::from_records(&records),
                "records": records,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::List => {
            let roster = store.students()?;
            if roster.is_empty() {
                println!("No students registered");
            } else {
                let students: Vec<StudentView> = roster
                    .iter()
                    .map(|p| StudentView {
                        id: &p.id,
                        name: &p.name,
                        roll_number: &p.roll_number,
                        enrolled: p.is_enrolled(),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&students)?);
            }
        }
    }

    Ok(())
}

fn load_pipeline(config: &Config) -> Result<AttendancePipeline<ScrfdDetector>> {
    let detector = ScrfdDetector::load(&config.model_path, config.detector_options())
        .with_context(|| format!("failed to load detector model {}", config.model_path.display()))?;
    Ok(AttendancePipeline::new(detector, config.pipeline_options()))
}
