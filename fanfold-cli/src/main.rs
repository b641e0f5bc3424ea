use anyhow::{Context, Result};
use clap::Parser;
use fanfold_config::{ConfigLoader, DispatchPolicy, FanfoldConfig, LogLevel};
use fanfold_logging::{init_logging_from_config, init_simple_tracing};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

mod cli;
mod jobs;
use cli::{Cli, Commands, ConfigCommands};
use jobs::Job;

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<FanfoldConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            loader
                .from_file(path)
                .context(format!("Failed to load configuration from {:?}", path))
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

fn init_logging(config: &FanfoldConfig, log_level: Option<&String>) -> Result<()> {
    match log_level {
        Some(level) => {
            let mut logging = config.logging.clone();
            match level.parse::<LogLevel>() {
                Ok(parsed) => logging.level = parsed,
                Err(_) => return init_simple_tracing(level),
            }
            init_logging_from_config(&logging)
        }
        None => init_logging_from_config(&config.logging),
    }
}

/// Run a job on the blocking pool, cancelling it on Ctrl-C
async fn run_job<R: Send + 'static>(job: Job<R>) -> Result<R> {
    let Job { cancel, body } = job;
    let mut task = tokio::task::spawn_blocking(body);

    tokio::select! {
        result = &mut task => result.context("Engine task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
            task.await.context("Engine task panicked")?
        }
    }
}

async fn handle_sum(mut config: FanfoldConfig, tasks: u64, workers: Option<usize>) -> Result<()> {
    if let Some(workers) = workers {
        config.map_reduce.worker_count = workers;
    }
    info!(tasks, workers = config.map_reduce.worker_count, "Summing with map-reduce");

    let (value, stats) = run_job(jobs::sum_job(&config, tasks)?).await?;
    match value {
        Some(sum) => println!("{}", sum),
        None => println!("no input"),
    }
    info!(
        halving_rounds = stats.halving_rounds,
        halving_kills = stats.halving_kills,
        "Sum complete"
    );
    Ok(())
}

async fn handle_word_count(
    mut config: FanfoldConfig,
    files: Vec<PathBuf>,
    workers: Option<usize>,
    top: usize,
) -> Result<()> {
    if let Some(workers) = workers {
        config.map_reduce.worker_count = workers;
    }

    let (counts, stats) = run_job(jobs::word_count_job(&config, files)?).await?;
    let Some(counts) = counts else {
        println!("no words found");
        return Ok(());
    };
    for (word, count) in jobs::top_words(&counts, top) {
        println!("{:>8}  {}", count, word);
    }
    info!(
        lines = stats.tasks_added,
        distinct = counts.len(),
        "Word count complete"
    );
    Ok(())
}

async fn handle_square(
    mut config: FanfoldConfig,
    tasks: u64,
    batch_size: Option<usize>,
    workers: Option<usize>,
    per_worker_queues: bool,
) -> Result<()> {
    if let Some(batch_size) = batch_size {
        config.pool.batch_size = batch_size;
    }
    if let Some(workers) = workers {
        config.pool.worker_count = workers;
    }
    config.pool.dispatch = if per_worker_queues {
        DispatchPolicy::PerWorker
    } else {
        DispatchPolicy::SharedQueue
    };

    let (sum, stats) = run_job(jobs::square_job(&config, tasks)?).await?;
    println!("{}", sum);
    info!(
        processed = stats.tasks_processed,
        collected = stats.results_collected,
        "Squares complete"
    );
    Ok(())
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match load_config(Some(config_file)) {
        Ok(_config) => {
            println!("Configuration file is valid");
            info!("Configuration validation passed");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {:#}", e);
            error!("Configuration validation failed: {:#}", e);
            Err(e)
        }
    }
}

/// Handle configuration display
fn handle_config_show(config: &FanfoldConfig, format: &str) -> Result<()> {
    match format.to_lowercase().as_str() {
        "yaml" | "yml" => {
            let yaml_output =
                serde_yaml::to_string(config).context("Failed to serialize to YAML")?;
            println!("{}", yaml_output);
        }
        "json" => {
            let json_output =
                serde_json::to_string_pretty(config).context("Failed to serialize to JSON")?;
            println!("{}", json_output);
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config, cli.log_level.as_ref())?;

    match cli.command {
        Some(Commands::Sum { tasks, workers }) => handle_sum(config, tasks, workers).await,
        Some(Commands::WordCount {
            files,
            workers,
            top,
        }) => handle_word_count(config, files, workers, top).await,
        Some(Commands::Square {
            tasks,
            batch_size,
            workers,
            per_worker_queues,
        }) => handle_square(config, tasks, batch_size, workers, per_worker_queues).await,
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Sample => {
                print!("{}", FanfoldConfig::generate_sample());
                Ok(())
            }
            ConfigCommands::Validate { config_file } => handle_config_validate(&config_file),
            ConfigCommands::Show { format } => handle_config_show(&config, &format),
        },
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
