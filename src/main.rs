//! Dice Trainer CLI
//!
//! Downloads the dice dataset, trains the binary classifier and uploads the
//! resulting model. `dice-trainer` with no arguments runs the full pipeline
//! with the default configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use dice_trainer::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use dice_trainer::config::{ConfigOverrides, RunConfig};
use dice_trainer::dataset::loader::is_image_file;
use dice_trainer::dataset::{provision, HttpFetcher};
use dice_trainer::inference::{Predictor, DEFAULT_PREDICT_BATCH};
use dice_trainer::pipeline::run_pipeline;
use dice_trainer::utils::format_duration;
use dice_trainer::utils::logging::{init_logging, LogConfig};

/// Dice image classifier training pipeline
#[derive(Parser, Debug)]
#[command(name = "dice-trainer")]
#[command(version)]
#[command(about = "Train and publish a binary dice classifier with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Log level for this crate (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// TOML configuration file; built-in defaults are used without one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding `data/` and the downloaded archive
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Subcommand to execute (defaults to `train`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision the dataset, train, save and upload the model
    Train(TrainArgs),

    /// Only download and extract the dataset
    Fetch,

    /// Score images with a saved model bundle
    Predict {
        /// Path to a `model_<version>.tar` bundle
        #[arg(short, long)]
        model: PathBuf,

        /// Images decoded and scored per forward pass
        #[arg(short, long, default_value_t = DEFAULT_PREDICT_BATCH)]
        batch_size: usize,

        /// Image files or directories of images
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct TrainArgs {
    /// Number of training epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size for training and validation
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// RMSprop learning rate
    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// Random seed for shuffling and augmentation
    #[arg(long)]
    seed: Option<u64>,

    /// Version string embedded in artifact names
    #[arg(long = "version-tag")]
    version_tag: Option<String>,

    /// Keep the artifacts local
    #[arg(long, default_value = "false")]
    no_upload: bool,

    /// Hide the per-epoch progress bars
    #[arg(long, default_value = "false")]
    no_progress: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        cli.log_level
            .as_deref()
            .and_then(LogConfig::from_level_name)
            .unwrap_or_default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RunConfig::default(),
    };

    match cli.command.unwrap_or(Commands::Train(TrainArgs::default())) {
        Commands::Train(args) => {
            config.apply_overrides(&ConfigOverrides {
                workspace_dir: cli.workspace,
                epochs: args.epochs,
                batch_size: args.batch_size,
                learning_rate: args.learning_rate,
                seed: args.seed,
                version: args.version_tag,
                no_upload: args.no_upload,
                no_progress: args.no_progress,
            });
            cmd_train(&config)?;
        }

        Commands::Fetch => {
            config.apply_overrides(&ConfigOverrides {
                workspace_dir: cli.workspace,
                ..Default::default()
            });
            cmd_fetch(&config)?;
        }

        Commands::Predict {
            model,
            batch_size,
            inputs,
        } => {
            cmd_predict(&model, batch_size, &inputs)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================
   Dice Trainer
   Binary dice classifier with Burn + Rust
 ==============================================
  "#
        .green()
    );
}

fn cmd_train(config: &RunConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Workspace:   {}", config.dataset.workspace_dir.display());
    println!("  Image size:  {}x{} ({})", config.image.width, config.image.height, config.image.channel_order);
    println!("  Epochs:      {}", config.training.epochs);
    println!("  Batch size:  {}", config.training.batch_size);
    println!("  Steps/epoch: {} train, {} validation", config.training.steps_per_epoch(), config.training.validation_steps());
    println!("  Version:     {}", config.artifacts.version);
    println!("  Backend:     {}", backend_name());
    println!();

    let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
    let report = run_pipeline::<TrainingBackend>(config, &fetcher, None, &default_device())
        .context("Training pipeline failed")?;

    println!();
    println!("{}", "Training complete".green().bold());
    if let Some((epoch, acc)) = report.history.best_val_accuracy() {
        println!("  Best val accuracy: {:.2}% (epoch {})", acc * 100.0, epoch + 1);
    }
    let total: std::time::Duration = report.epoch_times.iter().sum();
    println!("  Training time:     {}", format_duration(total.as_secs_f64()));
    println!("  Weights:           {}", report.saved.weights_path.display());
    println!("  Model:             {}", report.saved.model_path.display());
    match &report.published {
        Some(published) => {
            println!("  Uploaded:          {}", published.weights.uri);
            println!("                     {}", published.model.uri);
        }
        None => println!("  Upload:            {}", "skipped".yellow()),
    }

    Ok(())
}

fn cmd_fetch(config: &RunConfig) -> Result<()> {
    let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
    let outcome = provision(&config.dataset, &fetcher).context("Failed to provision dataset")?;
    info!("Provisioning finished: {:?}", outcome);
    println!(
        "{} dataset ready at {}",
        "Done:".green().bold(),
        config.dataset.data_dir().display()
    );
    Ok(())
}

fn cmd_predict(model: &Path, batch_size: usize, inputs: &[PathBuf]) -> Result<()> {
    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::from_bundle(model, &device)
        .with_context(|| format!("Failed to load model bundle {}", model.display()))?
        .with_batch_size(batch_size);

    let manifest = predictor.manifest();
    println!("{}", "Model:".cyan().bold());
    println!("  Version: {}", manifest.version);
    println!("  Classes: {}", manifest.class_names.join(", "));
    println!();

    let files = collect_images(inputs)?;
    if files.is_empty() {
        println!("{} no images found", "Warning:".yellow());
        return Ok(());
    }

    for prediction in predictor.predict_batch(&files)? {
        print!("{}", prediction.display());
        println!();
    }
    Ok(())
}

fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read {}", input.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_image_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}
