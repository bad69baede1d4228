//! Plant disease CNN command line
//!
//! Train, evaluate and inspect the leaf disease classifier.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use plant_disease_cnn::backend::{backend_name, default_device, DefaultBackend};
use plant_disease_cnn::config::{ExperimentConfig, OutputConfig};
use plant_disease_cnn::dataset::{ImageFolder, PixelScaling};
use plant_disease_cnn::model::{ModelSummary, PlantDiseaseCnnConfig};
use plant_disease_cnn::persistence;
use plant_disease_cnn::pipeline;
use plant_disease_cnn::training::TrainingHistory;
use plant_disease_cnn::utils::charts::write_accuracy_chart;
use plant_disease_cnn::utils::logging::{init_logging, LogConfig};
use plant_disease_cnn::utils::{format_duration, format_number};

/// Plant disease classification from leaf images
#[derive(Parser, Debug)]
#[command(name = "plant_disease_cnn")]
#[command(version)]
#[command(about = "Train and evaluate a plant disease CNN with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false")]
    quiet: bool,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, save, evaluate and plot in one run
    Train {
        /// Experiment TOML file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Root the split directories are resolved against
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(long)]
        train_dir: Option<PathBuf>,

        #[arg(long)]
        valid_dir: Option<PathBuf>,

        /// Held-out tree (defaults to the validation tree)
        #[arg(long)]
        test_dir: Option<PathBuf>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Adam learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Output directory for the model and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Seed for shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Pixel scaling: raw, unit or imagenet
        #[arg(long)]
        scaling: Option<PixelScaling>,

        /// Fail unless the data has exactly this many classes
        #[arg(long)]
        expected_classes: Option<usize>,

        /// Decode all images into memory before training
        #[arg(long, default_value = "false")]
        cache: bool,

        /// Do not render SVG charts
        #[arg(long, default_value = "false")]
        skip_charts: bool,
    },

    /// Evaluate a saved model on a held-out tree
    Evaluate {
        /// Directory holding the saved model
        #[arg(short, long, default_value = "output")]
        model_dir: PathBuf,

        /// File stem of the saved model
        #[arg(long, default_value = "trained_plant_disease_model")]
        model_name: String,

        /// Held-out tree to evaluate on
        #[arg(short, long, default_value = "valid")]
        test_dir: PathBuf,

        /// Batch size for evaluation
        #[arg(short, long, default_value = "1")]
        batch_size: usize,

        /// Directory for the reports (defaults to the model directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Do not render SVG charts
        #[arg(long, default_value = "false")]
        skip_charts: bool,
    },

    /// Print the layer table of the network
    Summary {
        /// Number of output classes
        #[arg(short, long, default_value_t = plant_disease_cnn::DEFAULT_NUM_CLASSES)]
        num_classes: usize,

        /// Input image side length
        #[arg(short, long, default_value_t = plant_disease_cnn::IMAGE_SIZE)]
        image_size: usize,
    },

    /// Show class vocabulary and image counts of a tree
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "train")]
        data_dir: PathBuf,
    },

    /// Render the accuracy chart from a saved history
    Plot {
        /// History JSON written by `train`
        #[arg(long, default_value = "output/training_hist.json")]
        history: PathBuf,

        /// Output SVG (defaults to accuracy.svg next to the history)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_flags(cli.verbose, cli.quiet, cli.log_level.as_deref());
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            train_dir,
            valid_dir,
            test_dir,
            epochs,
            batch_size,
            learning_rate,
            output_dir,
            seed,
            scaling,
            expected_classes,
            cache,
            skip_charts,
        } => {
            let mut experiment = match config {
                Some(path) => ExperimentConfig::from_toml_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ExperimentConfig::default(),
            };

            if let Some(dir) = data_dir {
                experiment.data.data_dir = dir;
            }
            if let Some(dir) = train_dir {
                experiment.data.train_dir = dir;
            }
            if let Some(dir) = valid_dir {
                // Keep the test tree on the validation tree unless given
                if experiment.data.test_dir == experiment.data.valid_dir && test_dir.is_none() {
                    experiment.data.test_dir = dir.clone();
                }
                experiment.data.valid_dir = dir;
            }
            if let Some(dir) = test_dir {
                experiment.data.test_dir = dir;
            }
            if let Some(n) = epochs {
                experiment.training.epochs = n;
            }
            if let Some(n) = batch_size {
                experiment.data.batch_size = n;
            }
            if let Some(lr) = learning_rate {
                experiment.training.learning_rate = lr;
            }
            if let Some(dir) = output_dir {
                experiment.output.output_dir = dir;
            }
            if let Some(s) = seed {
                experiment.training.seed = s;
            }
            if let Some(s) = scaling {
                experiment.data.scaling = s;
            }
            if expected_classes.is_some() {
                experiment.model.expected_classes = expected_classes;
            }
            experiment.data.cache |= cache;
            experiment.output.skip_charts |= skip_charts;

            cmd_train(&experiment)?;
        }
        Commands::Evaluate {
            model_dir,
            model_name,
            test_dir,
            batch_size,
            output_dir,
            skip_charts,
        } => {
            let output = OutputConfig {
                output_dir: output_dir.unwrap_or_else(|| model_dir.clone()),
                model_name: model_name.clone(),
                skip_charts,
            };
            cmd_evaluate(&model_dir, &model_name, &test_dir, batch_size, &output)?;
        }
        Commands::Summary {
            num_classes,
            image_size,
        } => {
            cmd_summary(num_classes, image_size)?;
        }
        Commands::Stats { data_dir } => {
            cmd_stats(&data_dir)?;
        }
        Commands::Plot { history, output } => {
            cmd_plot(&history, output.as_deref())?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════╗
 ║   🌱 Plant Disease CNN                               ║
 ║   Leaf Disease Classification with Burn + Rust       ║
 ╚══════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_train(config: &ExperimentConfig) -> Result<()> {
    config.validate()?;

    println!("{}", "Initializing Training...".green().bold());
    println!("  Backend: {}", backend_name());
    println!("  Train:   {}", config.data.train_path().display());
    println!("  Valid:   {}", config.data.valid_path().display());
    println!("  Test:    {}", config.data.test_path().display());
    println!(
        "  Epochs: {}, batch size: {}, learning rate: {}",
        config.training.epochs, config.data.batch_size, config.training.learning_rate
    );
    println!();

    let start = std::time::Instant::now();
    let device = default_device();
    let outcome = pipeline::run::<DefaultBackend>(config, &device).context("training run failed")?;

    println!();
    println!("{}", "Training Complete".green().bold());
    println!("  Duration:            {}", format_duration(start.elapsed().as_secs_f64()));
    println!("  Training accuracy:   {:.4}", outcome.evaluation.train.accuracy);
    println!("  Validation accuracy: {:.4}", outcome.evaluation.valid.accuracy);
    println!("  Test accuracy:       {:.4}", outcome.evaluation.held_out.summary.accuracy);
    println!("  Model:               {}", outcome.artifact.weights_path.display());
    for path in &outcome.reports {
        println!("  Report:              {}", path.display());
    }

    Ok(())
}

fn cmd_evaluate(
    model_dir: &Path,
    model_name: &str,
    test_dir: &Path,
    batch_size: usize,
    output: &OutputConfig,
) -> Result<()> {
    info!("Evaluating {:?} on {:?}", model_dir.join(model_name), test_dir);
    println!("{}", "Evaluating Saved Model...".cyan());

    let device = default_device();
    let report = pipeline::evaluate_saved::<DefaultBackend>(
        model_dir,
        model_name,
        test_dir,
        output,
        batch_size,
        &device,
    )
    .with_context(|| format!("evaluating {} on {}", model_dir.display(), test_dir.display()))?;

    println!(
        "  Loss: {:.4}, accuracy: {:.4} over {} images",
        report.summary.loss, report.summary.accuracy, report.summary.num_samples
    );
    println!("  Reports written to {}", output.output_dir.display());

    Ok(())
}

fn cmd_summary(num_classes: usize, image_size: usize) -> Result<()> {
    let config = PlantDiseaseCnnConfig::new(num_classes).with_input_size(image_size);
    let summary = ModelSummary::from_config(&config)?;

    println!("{}", summary);
    println!(
        "  Trainable params: {}",
        format_number(summary.total_params())
    );

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    let folder = ImageFolder::new(data_dir)
        .with_context(|| format!("indexing {}", data_dir.display()))?;
    folder.get_stats().print();
    Ok(())
}

fn cmd_plot(history_path: &Path, output: Option<&Path>) -> Result<()> {
    let history = TrainingHistory::load_json(history_path)
        .with_context(|| format!("reading {}", history_path.display()))?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => history_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(persistence::ACCURACY_CHART_FILE),
    };

    write_accuracy_chart(&history.accuracy, &history.val_accuracy, &output)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "{} Accuracy chart for {} epochs written to {}",
        "✓".green(),
        history.epochs(),
        output.display()
    );
    Ok(())
}
