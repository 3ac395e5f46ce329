use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use exr_core::FieldRole;
use exr_pipeline::{build_review_export, export_review, open_store, ResolveConfig, ResolvePipeline};
use exr_review::{DecisionFile, DecisionSource, LineDecisionSource};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "exr-cli")]
#[command(about = "Group duplicate executive records and review uncertain matches")]
struct Cli {
    #[command(flatten)]
    opts: RunOpts,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve, export uncertain groups, review them, persist approved people.
    Resolve {
        /// JSON file mapping group id to yes/no/skip instead of prompting.
        #[arg(long)]
        decisions: Option<PathBuf>,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show which columns were chosen for each role.
    Roles,
    /// Write the uncertain-group review file without starting a review.
    Export,
}

#[derive(Debug, Args)]
struct RunOpts {
    #[arg(long, global = true)]
    input: Option<PathBuf>,
    #[arg(long, global = true)]
    grouping_threshold: Option<f64>,
    #[arg(long, global = true)]
    uncertainty_threshold: Option<f64>,
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    store_url: Option<String>,
}

impl RunOpts {
    fn config(&self) -> Result<ResolveConfig> {
        let mut config = ResolveConfig::from_env();
        if let Ok(path) = std::env::var("EXR_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        if let Some(v) = self.grouping_threshold {
            config.thresholds.grouping_threshold = v;
        }
        if let Some(v) = self.uncertainty_threshold {
            config.thresholds.uncertainty_threshold = v;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(input) = &self.input {
            config.input = Some(input.clone());
        }
        if let Some(dir) = &self.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(url) = &self.store_url {
            config.store_url = Some(url.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

fn input_path(config: &ResolveConfig) -> Result<PathBuf> {
    match &config.input {
        Some(path) => Ok(path.clone()),
        None => bail!("no input file; pass --input or set EXR_INPUT"),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.opts.config()?;
    let input = input_path(&config)?;
    let source = exr_adapters::source_for_path(&input)?;

    match cli.command.unwrap_or(Commands::Resolve {
        decisions: None,
        json: false,
    }) {
        Commands::Resolve { decisions, json } => {
            let store = open_store(&config)?;
            let pipeline = ResolvePipeline::new(config, store)?;
            let mut decider: Box<dyn DecisionSource> = match decisions {
                Some(path) => Box::new(
                    DecisionFile::load(&path)
                        .with_context(|| format!("loading decisions from {}", path.display()))?,
                ),
                None => Box::new(LineDecisionSource::stdio()),
            };
            let summary = pipeline.run_once(source.as_ref(), decider.as_mut()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "resolve complete: run_id={} records={} groups={} uncertain={} approved={} rejected={} skipped={} persisted={}{}",
                    summary.run_id,
                    summary.total_records,
                    summary.groups,
                    summary.uncertain,
                    summary.review.approved.len(),
                    summary.review.rejected.len(),
                    summary.review.skipped.len(),
                    summary.persisted.len(),
                    if summary.review.interrupted { " (interrupted)" } else { "" },
                );
                if let Some(file) = &summary.review_file {
                    println!("review file: {file}");
                }
                if let Some(err) = &summary.review_export_error {
                    eprintln!("review export failed: {err}");
                }
            }
        }
        Commands::Roles => {
            let batch = source.load().await?;
            let roles = exr_adapters::identify_field_roles(&batch.columns, &config.columns)?;
            println!("records: {}", batch.len());
            for role in FieldRole::ALL {
                println!(
                    "{:<8} {}",
                    role.as_str(),
                    roles.column(role).unwrap_or("(unresolved)")
                );
            }
        }
        Commands::Export => {
            let output_dir = config.output_dir.clone();
            let store = open_store(&config)?;
            let pipeline = ResolvePipeline::new(config, store)?;
            let prepared = pipeline.prepare(source.as_ref()).await?;
            let export = build_review_export(
                uuid::Uuid::new_v4(),
                chrono::Utc::now(),
                &prepared.resolution,
                &prepared.batch.records,
                &prepared.roles,
            );
            let path = export_review(&output_dir, &export).await?;
            info!(groups = export.groups.len(), "review export written");
            println!("{}", path.display());
        }
    }

    Ok(())
}
