// Main entry point
mod interfaces;

use clap::Parser;
use colored::Colorize;
use fetchgate::domain::model::{Connectivity, OptimizerStats};
use fetchgate::infrastructure::config::{self, load_config, Config};
use fetchgate::state::AppState;
use fetchgate::RequestOptions;
use interfaces::cli::{parse_param, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to listen for shutdown signal: {}", e);
        } else {
            eprintln!("\nInterrupted, shutting down...");
            let _ = shutdown_tx.send(());
        }
    });

    let cli = Cli::parse();
    let config = load_config()?;

    if config.logging.enable {
        init_logging(&config.logging)?;
    }

    if let Command::GenerateConfig = cli.command {
        config::generate_config_sample()?;
        return Ok(());
    }

    let state = AppState::new(config)?;

    tokio::select! {
        result = run(&state, cli.command) => result,
        _ = shutdown_rx => {
            eprintln!("Operation interrupted");
            Ok(())
        }
    }
}

async fn run(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get {
            endpoint,
            params,
            bypass_cache,
            priority,
            repeat,
        } => {
            let mut options = RequestOptions::new()
                .bypass_cache(bypass_cache)
                .priority(priority);
            for raw in &params {
                let (key, value) = parse_param(raw);
                options = options.param(key, value);
            }

            for i in 0..repeat.max(1) {
                match state.optimizer.request(&endpoint, options.clone()).await {
                    Ok(body) => {
                        if i + 1 == repeat.max(1) {
                            println!("{}", serde_json::to_string_pretty(&body)?);
                        }
                    }
                    Err(e) => eprintln!("{} {}", "Request failed:".red(), e),
                }
            }
            print_stats(&state.optimizer.stats());
        }
        Command::Batch { endpoints } => {
            let requests = endpoints
                .iter()
                .map(|e| (e.clone(), RequestOptions::new()))
                .collect();
            let results = state.optimizer.batch(requests).await;
            for (endpoint, result) in endpoints.iter().zip(results) {
                match result {
                    Ok(body) => println!("{} {}", endpoint.green(), body),
                    Err(e) => println!("{} {}", endpoint.red(), e),
                }
            }
            print_stats(&state.optimizer.stats());
        }
        Command::Probe { force } => {
            if state.prober.check_connection(force).await {
                println!("{}", "Connected".green().bold());
            } else {
                println!("{}", "Disconnected".red().bold());
            }
        }
        Command::Status => {
            state.prober.check_connection(false).await;
            let config = state.config.read().await;
            print_status(state, &config);
        }
        Command::GenerateConfig => config::generate_config_sample()?,
    }
    Ok(())
}

/// Initialize logging with path and level configuration
fn init_logging(logging: &config::Logging) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    if let Some(path) = &logging.path {
        if !path.is_empty() {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .init();
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn print_stats(stats: &OptimizerStats) {
    eprintln!(
        "{} requests={} network={} cache_hits={} stale={} deduplicated={} retries={} throttled={}",
        "stats".cyan(),
        stats.requests,
        stats.network_calls,
        stats.cache_hits,
        stats.stale_hits,
        stats.deduplicated,
        stats.retries,
        stats.throttled_rejections
    );
}

fn print_status(state: &AppState, config: &Config) {
    println!("{}", "fetchgate Status".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config: {}",
        config::get_config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "Not found".to_string())
    );
    println!("Backend: {}", config.backend.url);
    if config.backend.api_key.is_some() {
        println!("API key: Configured");
    } else {
        println!("API key: Not configured");
    }

    let status = state.prober.status();
    let connectivity = match status.connectivity {
        Connectivity::Unknown => "unknown".yellow(),
        Connectivity::Connected => "connected".green(),
        Connectivity::Disconnected => "disconnected".red(),
    };
    println!("Connection: {}", connectivity);
    if let Some(checked) = status.last_checked {
        println!("Last checked: {}", checked.to_rfc3339());
    }

    let stats = state.optimizer.stats();
    println!(
        "Cache: {} entries, {} in flight",
        stats.cached_entries, stats.pending
    );
}
