//! pleth-batch CLI
//!
//! Batch feature extraction from plethysmography recordings.

use clap::{Parser, Subcommand};
use pleth_batch::{pipeline, Config, Recording, FEATURE_GLOSSARY, VERSION};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pleth-batch")]
#[command(version = VERSION)]
#[command(about = "Batch feature extraction from plethysmography recordings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every recording and write the feature workbook
    Run {
        /// Configuration file (defaults to the per-user location)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Render a signal plot per recording
        #[arg(long)]
        plot: bool,
    },

    /// Decode a single recording and print what it contains
    Probe {
        /// Path to a .smr recording
        file: PathBuf,
    },

    /// Display the feature glossary
    Features,

    /// Show the resolved configuration
    Config {
        /// Configuration file (defaults to the per-user location)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, plot } => cmd_run(config, plot),
        Commands::Probe { file } => cmd_probe(&file),
        Commands::Features => println!("{FEATURE_GLOSSARY}"),
        Commands::Config { config } => cmd_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Config {
    let result = match &path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_run(config_path: Option<PathBuf>, plot: bool) {
    let mut config = load_config(config_path);
    if plot {
        config.plot.enabled = true;
    }

    println!("pleth-batch v{VERSION}");
    println!();
    println!("  Metadata: {}", config.info_path.display());
    println!("  Recordings: {}", config.recordings_dir.display());
    println!("  Output: {}", config.output_dir.display());
    let event_names: Vec<String> = config
        .events
        .iter()
        .map(|e| {
            if e.challenge {
                format!("{} (challenge)", e.name)
            } else {
                e.name.clone()
            }
        })
        .collect();
    println!("  Events: {}", event_names.join(", "));
    println!(
        "  Pre/post intervals: {} / {} min",
        config.pre_interval_min, config.post_interval_min
    );
    println!(
        "  Plots: {}",
        if config.plot.enabled { "enabled" } else { "disabled" }
    );
    println!();

    match pipeline::run(&config) {
        Ok(summary) => {
            println!(
                "Processed {} recording(s) into {} sheet(s).",
                summary.files_processed, summary.sheets_written
            );
            if summary.plots_rendered > 0 {
                println!("Rendered {} plot(s).", summary.plots_rendered);
            }
            println!("Workbook saved to {}", summary.workbook_path.display());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_probe(file: &PathBuf) {
    match Recording::open(file) {
        Ok(recording) => {
            println!("{}", file.display());
            println!("  Channel: {}", recording.channel_title);
            println!("  Sampling rate: {:.2} Hz", recording.sample_rate);
            println!("  Samples: {}", recording.signal.len());
            println!("  Duration: {:.1} s", recording.duration_secs());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_config(config_path: Option<PathBuf>) {
    let config = load_config(config_path.clone());

    println!("Configuration");
    println!("=============");
    println!();
    match config_path {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: {}", Config::config_path().display()),
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
