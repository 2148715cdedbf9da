use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod db;
mod error;
mod http;
mod models;
mod shape;
mod store;
mod validate;

use crate::config::{ServerConfig, DEFAULT_MAX_UPLOAD_BYTES};
use crate::models::{Professor, ProfessorInput};

#[derive(Parser)]
#[command(name = "faculty-portal")]
#[command(about = "Faculty data portal: aggregate statistics and professor records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the portal HTTP API
    Serve {
        #[arg(long, env = "PORTAL_BIND", default_value = "0.0.0.0:3001")]
        bind: SocketAddr,
        #[arg(long, env = "PORTAL_IMAGES_DIR", default_value = "public/images")]
        images_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
        max_upload_bytes: usize,
        #[arg(long, default_value_t = 5)]
        max_connections: u32,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import general statistics (category,metric,value) from a CSV file
    ImportStats {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print a summary fetched from a running portal
    Summary {
        #[arg(long, default_value = "http://localhost:3001")]
        url: String,
    },
    /// Read or edit professor records on a running portal
    Professor {
        #[arg(long, default_value = "http://localhost:3001")]
        url: String,
        #[command(subcommand)]
        action: ProfessorAction,
    },
}

#[derive(Subcommand)]
enum ProfessorAction {
    /// Show one professor
    Get { id: i64 },
    /// Create a professor
    Create(ProfessorArgs),
    /// Replace a professor's scalar fields
    Update {
        id: i64,
        #[command(flatten)]
        fields: ProfessorArgs,
    },
    /// Delete a professor
    Delete { id: i64 },
}

#[derive(Args)]
struct ProfessorArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    nuptk: String,
    #[arg(long)]
    position: String,
    /// YYYY-MM-DD
    #[arg(long)]
    start_date: String,
    #[arg(long)]
    photo_url: Option<String>,
    #[arg(long)]
    faculty: Option<String>,
    #[arg(long)]
    homebase: Option<String>,
    #[arg(long)]
    verified: bool,
}

impl From<ProfessorArgs> for ProfessorInput {
    fn from(args: ProfessorArgs) -> Self {
        ProfessorInput {
            name: Some(args.name),
            nuptk: Some(args.nuptk),
            position: Some(args.position),
            start_date: Some(args.start_date),
            photo_url: args.photo_url,
            faculty: args.faculty,
            homebase: args.homebase,
            verified: Some(args.verified),
            ..ProfessorInput::default()
        }
    }
}

fn print_professor(professor: &Professor) {
    println!("#{} {} ({})", professor.id, professor.name, professor.nuptk);
    println!("  position: {}", professor.position);
    if let Some(start_date) = professor.start_date {
        println!("  start date: {start_date}");
    }
    println!("  verified: {}", professor.verified);
}

async fn connect(max_connections: u32) -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the portal's Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("faculty_portal=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            images_dir,
            max_upload_bytes,
            max_connections,
        } => {
            let pool = connect(max_connections).await?;
            let store = Arc::new(db::PgStore::new(pool));
            let config = ServerConfig {
                bind,
                images_dir,
                max_upload_bytes,
            };
            http::serve(config, store).await?;
        }
        Commands::InitDb => {
            let pool = connect(5).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(5).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportStats { csv } => {
            let pool = connect(5).await?;
            let imported = db::import_stats_csv(&pool, &csv).await?;
            println!("Imported {imported} stats from {}.", csv.display());
        }
        Commands::Summary { url } => {
            let client = client::PortalClient::new(url);
            let data = client.all_data().await?;

            println!("Last updated: {}", data.last_updated);
            if data.last_updated_recorded.is_none() {
                println!("  (no update recorded by the portal)");
            }
            println!(
                "Professors: {} profiles, {} positions",
                data.professors.profiles.len(),
                data.professors.by_position.len()
            );
            if let Some(total) = data.stats.get("students", "total") {
                println!("Students total: {total}");
            }
            for year in &data.students.by_year {
                println!("- students {}: {}", year.year, year.count);
            }
            for category in data.stats.category_names() {
                println!("{category}:");
                let Some(metrics) = data.stats.category(category) else {
                    continue;
                };
                for (metric, value) in metrics {
                    match value {
                        serde_json::Value::Null => println!("  {metric}: n/a"),
                        value => println!("  {metric}: {value}"),
                    }
                }
            }
            for warning in &data.warnings {
                println!(
                    "warning: professor {} field {}: {}",
                    warning.professor_id, warning.field, warning.message
                );
            }
        }
        Commands::Professor { url, action } => {
            let client = client::PortalClient::new(url);
            match action {
                ProfessorAction::Get { id } => print_professor(&client.professor(id).await?),
                ProfessorAction::Create(fields) => {
                    let created = client.create_professor(&fields.into()).await?;
                    print_professor(&created);
                }
                ProfessorAction::Update { id, fields } => {
                    let updated = client.update_professor(id, &fields.into()).await?;
                    print_professor(&updated);
                }
                ProfessorAction::Delete { id } => {
                    client.delete_professor(id).await?;
                    println!("Professor {id} deleted.");
                }
            }
            let data = client.all_data().await?;
            println!("Portal now lists {} profiles.", data.professors.profiles.len());
        }
    }

    Ok(())
}
