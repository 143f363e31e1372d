//! veriface — administration CLI.
//!
//! Operates directly on the attendance database and model artifact, the
//! same way the daemon does; mutations retrain the model in-process, and
//! a running daemon picks the changes up through its periodic consistency
//! check.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use verifaced::{Config, Engine, EngineConfig, LogNotifier};
use veriface_core::Embedding;
use veriface_store::{AttendanceTracker, Contact, Store};

#[derive(Parser)]
#[command(name = "veriface", about = "VeriFace attendance administration CLI")]
struct Cli {
    /// Acceptance threshold override for match/observe operations.
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from an embedding file (JSON array of numbers)
    Enroll {
        #[arg(short, long)]
        name: String,
        /// Path to the probe embedding (JSON array, e.g. from the extractor)
        #[arg(short, long)]
        embedding: PathBuf,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Re-enroll or update contact details for an existing identity
    Update {
        #[arg(long)]
        id: i64,
        #[arg(short, long)]
        embedding: Option<PathBuf>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Remove an identity (attendance history is retained for audit)
    Remove {
        #[arg(long)]
        id: i64,
    },
    /// List enrolled identities
    List {
        #[arg(long)]
        json: bool,
    },
    /// Resolve an embedding against the trained model
    Match {
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Record a confident sighting of an identity right now
    Record {
        #[arg(long)]
        id: i64,
    },
    /// Rebuild the identity model from the store
    Retrain,
    /// Check model/store consistency (self-heals on drift)
    Verify,
    /// Attendance report over a date range
    Report {
        /// Start date (YYYY-MM-DD), default 30 days ago
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End date (YYYY-MM-DD), default today
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Restrict to one identity id
        #[arg(long)]
        identity: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Delete ALL attendance history and the model artifact
    Purge {
        /// Required confirmation flag
        #[arg(long)]
        yes: bool,
    },
}

fn load_embedding(path: &PathBuf) -> Result<Embedding> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read embedding file {}", path.display()))?;
    let values: Vec<f32> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    Ok(Embedding::new(values))
}

fn open_engine(config: &Config, threshold: Option<f32>) -> Result<Engine> {
    let store = Store::open(&config.db_path, config.embedding_dim)?;
    let mut engine_cfg = EngineConfig::from(config);
    if let Some(t) = threshold {
        engine_cfg.threshold = t;
    }
    Ok(Engine::new(store, engine_cfg, Box::new(LogNotifier))?)
}

fn contact(phone: Option<String>, email: Option<String>) -> Contact {
    Contact { phone, email }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll {
            name,
            embedding,
            phone,
            email,
        } => {
            let engine = open_engine(&config, cli.threshold)?;
            let identity = engine.enroll(&name, load_embedding(&embedding)?, contact(phone, email))?;
            println!("enrolled '{}' with id {}", identity.name, identity.id);
        }
        Commands::Update {
            id,
            embedding,
            phone,
            email,
        } => {
            let engine = open_engine(&config, cli.threshold)?;
            let embedding = embedding.as_ref().map(load_embedding).transpose()?;
            let contact = if phone.is_some() || email.is_some() {
                Some(contact(phone, email))
            } else {
                None
            };
            let identity = engine.update(id, embedding, contact)?;
            println!("updated '{}' (id {})", identity.name, identity.id);
        }
        Commands::Remove { id } => {
            let engine = open_engine(&config, cli.threshold)?;
            engine.remove(id)?;
            println!("removed identity {id} (attendance history retained)");
        }
        Commands::List { json } => {
            let store = Store::open(&config.db_path, config.embedding_dim)?;
            let identities = store.get_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&identities)?);
            } else if identities.is_empty() {
                println!("no identities enrolled");
            } else {
                for i in &identities {
                    println!(
                        "{:>4}  {:<24} {:<16} {}",
                        i.id,
                        i.name,
                        i.phone.as_deref().unwrap_or("-"),
                        i.email.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Commands::Match { embedding } => {
            let engine = open_engine(&config, cli.threshold)?;
            let m = engine.match_embedding(&load_embedding(&embedding)?)?;
            match m.identity_id {
                Some(id) => println!(
                    "matched '{}' (id {}) with confidence {:.3}",
                    m.name.as_deref().unwrap_or("?"),
                    id,
                    m.confidence
                ),
                None => println!("unrecognized (best confidence {:.3})", m.confidence),
            }
        }
        Commands::Record { id } => {
            let mut store = Store::open(&config.db_path, config.embedding_dim)?;
            let mut tracker =
                AttendanceTracker::new(std::time::Duration::from_secs(config.cooldown_secs));
            let outcome = tracker.record(&mut store, id, Local::now().naive_local())?;
            println!("attendance for identity {id}: {outcome:?}");
        }
        Commands::Retrain => {
            let engine = open_engine(&config, cli.threshold)?;
            let model = engine.retrain()?;
            println!(
                "trained model {} over {} identities",
                model.model_id,
                model.index.len()
            );
        }
        Commands::Verify => {
            let engine = open_engine(&config, cli.threshold)?;
            match engine.consistency_check()? {
                None => println!("no model is live"),
                Some(report) if report.is_consistent() => {
                    println!("model {} is consistent with the store", report.model_id)
                }
                Some(report) => {
                    println!(
                        "drift detected and healed: stale={:?} unindexed={:?}",
                        report.stale, report.unindexed
                    );
                }
            }
        }
        Commands::Report {
            from,
            to,
            identity,
            json,
        } => {
            let today = Local::now().date_naive();
            let from = from.unwrap_or(today - chrono::Duration::days(30));
            let to = to.unwrap_or(today);
            let store = Store::open(&config.db_path, config.embedding_dim)?;
            let rows = store.attendance_report(from, to, identity)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("no attendance between {from} and {to}");
            } else {
                for r in &rows {
                    println!(
                        "{}  {:>4}  {:<24} {} .. {}  ({:.1} min)",
                        r.day, r.identity_id, r.name, r.first_seen, r.last_seen, r.duration_minutes
                    );
                }
            }
        }
        Commands::Purge { yes } => {
            if !yes {
                bail!("refusing to purge without --yes");
            }
            let mut store = Store::open(&config.db_path, config.embedding_dim)?;
            let rows = store.purge_attendance()?;
            if config.model_path.exists() {
                std::fs::remove_file(&config.model_path)
                    .with_context(|| format!("removing {}", config.model_path.display()))?;
                println!("purged {rows} attendance rows; model artifact discarded");
            } else {
                println!("purged {rows} attendance rows");
            }
        }
    }

    Ok(())
}
