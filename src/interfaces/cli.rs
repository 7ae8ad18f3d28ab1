use clap::{Parser, Subcommand};
use fetchgate::Priority;

#[derive(Parser)]
#[command(name = "fetchgate")]
#[command(about = "Cached, deduplicated and throttled requests against an HTTP backend.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch an endpoint through the optimizer
    Get {
        /// Endpoint path (relative to backend.url) or absolute URL
        endpoint: String,

        /// Query parameter, repeatable
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Skip the response cache
        #[arg(short = 'n', long)]
        bypass_cache: bool,

        /// Priority used while the endpoint is throttled
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Send the same request this many times
        #[arg(short = 'r', long, default_value_t = 1)]
        repeat: u32,
    },

    /// Fetch several endpoints concurrently
    Batch {
        #[arg(num_args = 1..)]
        endpoints: Vec<String>,
    },

    /// Check backend connectivity
    Probe {
        /// Ignore the cached result
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Show configuration and connection status
    Status,

    /// Generate config sample
    GenerateConfig,
}

/// Split `key=value`; a bare key becomes an empty value.
pub fn parse_param(raw: &str) -> (String, String) {
    match raw.split_once('=') {
        Some((key, value)) => (key.trim().to_string(), value.to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}
