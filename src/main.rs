//! modshard CLI - test module index and shard planner.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use modshard::config::{self, Config};
use modshard::discovery;
use modshard::index::ModuleIndex;
use modshard::report::{self, ConsoleReporter, JsonReporter, MultiReporter};
use modshard::sink::{FsResultSink, NullSink, ResultSink};

#[derive(Parser)]
#[command(name = "modshard")]
#[command(about = "Test module index and shard planner", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "modshard.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index modules and assign them to shards
    Plan {
        /// Override the shard count
        #[arg(short, long)]
        shards: Option<usize>,

        /// Plan for this shard's result directory
        #[arg(long)]
        shard_index: Option<usize>,

        /// Write the plan as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,

        /// Do not create the result directory
        #[arg(long)]
        dry_run: bool,
    },

    /// List accepted module ids
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print module names containing a pattern
    Match {
        pattern: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Plan {
            shards,
            shard_index,
            json,
            dry_run,
        } => plan(&cli.config, shards, shard_index, json, dry_run, cli.verbose).await,
        Commands::List { format } => list_modules(&cli.config, &format),
        Commands::Match { pattern } => match_modules(&cli.config, &pattern),
        Commands::Validate => validate_config(&cli.config),
    }
}

fn load(config_path: &Path) -> Result<Config> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());
    Ok(config)
}

fn build_index(config: &Config, sink: &dyn ResultSink) -> Result<ModuleIndex> {
    let checkers = config
        .checkers
        .active()
        .context("Invalid system status checker configuration")?;
    info!("{} system status checkers active", checkers.len());

    let opts = config.init_options()?;
    let mut index = ModuleIndex::new();
    index
        .initialize(opts, &config.class_registry(), sink)
        .context("Failed to index modules")?;
    Ok(index)
}

async fn plan(
    config_path: &Path,
    shards_override: Option<usize>,
    shard_index: Option<usize>,
    json_path: Option<PathBuf>,
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = load(config_path)?;

    // Apply overrides
    if let Some(shards) = shards_override {
        config.suite.shards = shards;
    }
    if shard_index.is_some() {
        config.suite.shard_index = shard_index;
    }

    let index = if dry_run {
        build_index(&config, &NullSink)?
    } else {
        build_index(&config, &FsResultSink)?
    };
    if let Some(dir) = index.result_dir().filter(|d| !d.as_os_str().is_empty()) {
        info!("Results will be written to {}", dir.display());
    }

    let reporter = create_reporter(&config, json_path, verbose);
    report::report_plan(&reporter, &index).await;
    Ok(())
}

fn list_modules(config_path: &Path, format: &str) -> Result<()> {
    let config = load(config_path)?;
    let index = build_index(&config, &NullSink)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(index.module_ids())?;
            println!("{}", json);
        }
        _ => {
            println!("Indexed {} modules:", index.module_ids().len());
            for id in index.module_ids() {
                println!("  {}", id);
            }
        }
    }

    Ok(())
}

fn match_modules(config_path: &Path, pattern: &str) -> Result<()> {
    let config = load(config_path)?;
    let tests_dir = &config.suite.tests_dir;
    let names = discovery::module_names_matching(tests_dir, pattern)
        .with_context(|| format!("Failed to read {}", tests_dir.display()))?;
    if names.is_empty() {
        anyhow::bail!("No module matches '{}'", pattern);
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let checks = config
        .checkers
        .active()
        .map_err(anyhow::Error::from)
        .and_then(|_| config.init_options());
    let opts = match checks {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let configs = discovery::config_files(&config.suite.tests_dir)
        .with_context(|| format!("Failed to read {}", config.suite.tests_dir.display()))?;

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Tests dir: {}", config.suite.tests_dir.display());
    println!("  Module configs: {}", configs.len());
    println!("  Shards: {}", config.suite.shards);
    let abis: Vec<&str> = opts.abis.iter().map(|a| a.name.as_str()).collect();
    println!("  ABIs: {}", abis.join(", "));
    println!("  Test classes: {}", config.classes.len());
    println!("  Device tokens: {}", config.device_tokens.len());

    Ok(())
}

fn create_reporter(config: &Config, json_override: Option<PathBuf>, verbose: bool) -> MultiReporter {
    let mut multi = MultiReporter::new();

    if config.report.console {
        multi = multi.with_reporter(ConsoleReporter::new(verbose));
    }

    if let Some(path) = json_override.or_else(|| config.report.plan_file.clone()) {
        multi = multi.with_reporter(JsonReporter::new(path));
    }

    multi
}
