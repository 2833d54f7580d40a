use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taskd::{Config, MemoryTaskStore, Server, api, cache};

#[derive(Debug, Parser)]
#[command(name = "taskd", version, about = "Task-management HTTP service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "TASKD_CONFIG", default_value = "configs/taskd.toml")]
    config_path: PathBuf,

    /// Overrides `cache.enabled` from the config file.
    #[arg(long, value_name = "BOOL")]
    caching: Option<bool>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("taskd: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(enabled) = cli.caching {
        config.cache.enabled = enabled;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    info!(config = %cli.config_path.display(), caching = config.cache.enabled, "starting taskd");

    let cache = cache::connect(&config.cache).await;
    let service = api::service(&config, Arc::new(MemoryTaskStore::new()), cache);

    match Server::bind(config.bind_addr).serve(service).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}
