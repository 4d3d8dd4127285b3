use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use log::info;
use std::path::PathBuf;

use productreel::access::AccessGate;
use productreel::config::Config;
use productreel::database::Database;
use productreel::image_gen::ImageSize;
use productreel::jobs::{JobOptions, JobStage};
use productreel::styles::Style;
use productreel::upload::ProductImage;
use productreel::video_gen::VideoProviderKind;
use productreel::workflow::Pipeline;

/// Turn a product photo into marketing stills and short videos
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole pipeline for one photo and print the job as JSON
    Run {
        /// Product photo (PNG, JPEG, WebP or GIF)
        image: PathBuf,
        /// Product name used in the prompts
        #[arg(short, long)]
        name: String,
        /// Style id; derived from the analysis when omitted
        #[arg(short, long)]
        style: Option<String>,
        /// Number of clips to generate (0 for a still only)
        #[arg(short, long, default_value_t = 1)]
        videos: usize,
        /// Video provider: kie or runway
        #[arg(short, long, default_value = "kie")]
        provider: String,
        /// Still size: square, portrait or landscape
        #[arg(long, default_value = "portrait")]
        size: String,
        /// User the job is recorded against
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// List categories and styles
    Styles {
        /// Only show styles of this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Store a style from a JSON file, replacing any style with the same id
    StyleSet { file: PathBuf },

    /// Remove a stored style
    StyleDelete { id: String },

    /// Give a user access to job creation
    Grant { user: String },

    /// Take access away from a user
    Revoke { user: String },

    /// Show a user's recent jobs
    Jobs {
        #[arg(short, long, default_value = "cli")]
        user: String,
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let database = Database::new(&config.database_path).await?;

    match cli.command {
        Commands::Run {
            image,
            name,
            style,
            videos,
            provider,
            size,
            user,
        } => {
            let options = JobOptions {
                style,
                video_count: videos,
                provider: VideoProviderKind::from_str(&provider)
                    .ok_or_else(|| anyhow!("unknown provider '{}'", provider))?,
                size: ImageSize::from_str(&size).ok_or_else(|| anyhow!("unknown size '{}'", size))?,
            };

            let bytes = tokio::fs::read(&image).await?;
            let upload = ProductImage::from_bytes(&image.to_string_lossy(), bytes, config.max_upload_bytes)?;

            let pipeline = Pipeline::from_config(&config, database)?;
            let job = pipeline.create_job(&user, &name, options).await?;
            info!("🎬 Running job {}", job.id);
            let job = pipeline.run(job, upload).await;

            println!("{}", serde_json::to_string_pretty(&job)?);
            if job.stage == JobStage::Failed {
                return Err(anyhow!("job {} failed: {}", job.id, job.error.unwrap_or_default()));
            }
        }
        Commands::Styles { category } => {
            let pipeline = Pipeline::from_config(&config, database)?;
            let catalog = pipeline.catalog().await?;
            for cat in catalog.categories() {
                if category.as_deref().map_or(false, |c| c != cat.id) {
                    continue;
                }
                println!("{} ({})", cat.name, cat.id);
                for style in catalog.styles_for(&cat.id) {
                    println!("  {:<20} {}", style.id, style.name);
                }
            }
        }
        Commands::StyleSet { file } => {
            let style: Style = serde_json::from_str(&tokio::fs::read_to_string(&file).await?)?;
            database.upsert_style(&style).await?;
            println!("Stored style {}", style.id);
        }
        Commands::StyleDelete { id } => {
            database.delete_style(&id).await?;
            println!("Removed style {}", id);
        }
        Commands::Grant { user } => {
            let gate = AccessGate::new(database, config.require_access);
            gate.grant(&user).await?;
            println!("Granted access to {}", user.trim());
            if !gate.is_enforced() {
                println!("Note: REQUIRE_ACCESS is off, so access is not checked yet");
            }
        }
        Commands::Revoke { user } => {
            AccessGate::new(database, config.require_access).revoke(&user).await?;
            println!("Revoked access from {}", user.trim());
        }
        Commands::Jobs { user, limit } => {
            for job in database.list_jobs(&user, limit).await? {
                println!(
                    "{}  {:<18} {}  {}",
                    job.id,
                    job.stage.as_str(),
                    job.created_at.to_rfc3339(),
                    job.product_name
                );
            }
            let total = database.usage_count(&user, "create_job").await?;
            println!("{} job(s) created by {} in total", total, user);
        }
    }

    Ok(())
}
