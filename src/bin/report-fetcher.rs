//! Command-line entry point
//!
//! Loads configuration (JSON file, then flags and environment), installs
//! logging and runs the fetcher until SIGINT/SIGTERM or the cycle limit.

use clap::{Parser, ValueEnum};
use report_fetcher::{Config, ReportFetcher, run_with_shutdown};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Fetch report metadata and payloads for every URL in a growing list
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON configuration file; flags override its values
    #[arg(long, env = "REPORT_FETCHER_CONFIG")]
    config: Option<PathBuf>,

    /// File of report URLs, one row per report
    #[arg(long, env = "REPORT_FETCHER_URL_LIST")]
    url_list: Option<PathBuf>,

    /// Zero-based column holding the URL
    #[arg(long, env = "REPORT_FETCHER_URL_COLUMN")]
    url_column: Option<usize>,

    /// Metadata endpoint prefix; the job id is appended
    #[arg(long, env = "REPORT_FETCHER_BASE_URL")]
    base_url: Option<String>,

    /// Output root for reports, failure records and the ledger
    #[arg(long, env = "REPORT_FETCHER_OUT")]
    out: Option<PathBuf>,

    /// File holding the bearer token
    #[arg(long, env = "REPORT_FETCHER_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Maximum concurrent fetches
    #[arg(long, env = "REPORT_FETCHER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Stop after this many claim cycles instead of running until interrupted
    #[arg(long, env = "REPORT_FETCHER_CYCLES")]
    cycles: Option<u64>,

    /// Log output format
    #[arg(long, env = "REPORT_FETCHER_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

impl Args {
    fn into_config(self) -> report_fetcher::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(url_list) = self.url_list {
            config.ingest.url_list = url_list;
        }
        if let Some(column) = self.url_column {
            config.ingest.url_column = column;
        }
        if let Some(base_url) = self.base_url {
            config.fetch.metadata_base_url = base_url;
        }
        if let Some(out) = self.out {
            config.storage.output_root = out;
        }
        if let Some(token_file) = self.token_file {
            config.credentials.token_file = token_file;
        }
        if let Some(concurrency) = self.concurrency {
            config.worker.concurrency = concurrency;
        }
        if let Some(cycles) = self.cycles {
            config.worker.max_cycles = Some(cycles);
        }

        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("report_fetcher=info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.into_config()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.fetch.metadata_base_url,
        url_list = %config.ingest.url_list.display(),
        output_root = %config.storage.output_root.display(),
        concurrency = config.worker.concurrency,
        "Starting report-fetcher"
    );

    let fetcher = ReportFetcher::new(config).await?;
    let counts = run_with_shutdown(fetcher).await?;

    println!("{counts}");
    Ok(())
}
