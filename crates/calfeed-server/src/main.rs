//! calfeed daemon entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use calfeed_core::{TracingConfig, TracingOutputFormat, init_tracing};
use calfeed_server::{DEFAULT_PORT, ServerConfig, default_db_path};

/// calfeed - publish Outlook calendars as private iCal feeds
#[derive(Debug, Parser)]
#[command(name = "calfeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "CALFEED_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "CALFEED_BIND")]
    bind: Option<SocketAddr>,

    /// Seconds between refresh scheduler ticks
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    tick_secs: u64,

    /// Timeout for outbound identity and calendar requests, in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    fetch_timeout_secs: u64,

    /// Log output format: pretty, compact or json
    #[arg(long, env = "CALFEED_LOG_FORMAT")]
    log_format: Option<TracingOutputFormat>,

    /// Log filter directive, e.g. "calfeed_server=debug,reqwest=info"
    #[arg(long, env = "CALFEED_LOG")]
    log_filter: Option<String>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    debug: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        let fetch_timeout = Duration::from_secs(self.fetch_timeout_secs);
        ServerConfig::new(self.db_path.clone().unwrap_or_else(default_db_path))
            .with_bind(
                self.bind
                    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))),
            )
            .with_tick_interval(Duration::from_secs(self.tick_secs))
            .with_fetch_timeout(fetch_timeout)
            .with_refresh_timeout(fetch_timeout)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing_config = if cli.debug {
        TracingConfig::debug()
    } else {
        TracingConfig::daemon()
    };
    if let Some(format) = cli.log_format {
        tracing_config = tracing_config.with_format(format);
    }
    if let Some(filter) = &cli.log_filter {
        tracing_config = tracing_config.with_env_filter(filter.clone());
    }
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    match calfeed_server::run(cli.server_config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "calfeed exited with an error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
