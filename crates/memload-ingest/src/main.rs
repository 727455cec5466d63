//! memload - load installed-apps batches into memcached

use anyhow::{Context, Result};
use clap::Parser;
use memload_common::logging::{init_logging, LogConfig, LogLevel};
use memload_ingest::config::{
    IngestConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PATTERN, DEFAULT_RETRY_COUNT,
    DEFAULT_WRITE_TIMEOUT_MS,
};
use memload_ingest::record::DeviceType;
use memload_ingest::{discovery, pipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "memload")]
#[command(author, version, about = "Load installed-apps batches into memcached")]
struct Cli {
    /// memcached address for iOS idfa records
    #[arg(long, env = "MEMLOAD_IDFA", default_value = "127.0.0.1:33013")]
    idfa: String,

    /// memcached address for Android gaid records
    #[arg(long, env = "MEMLOAD_GAID", default_value = "127.0.0.1:33014")]
    gaid: String,

    /// memcached address for Android adid records
    #[arg(long, env = "MEMLOAD_ADID", default_value = "127.0.0.1:33015")]
    adid: String,

    /// memcached address for Android dvid records
    #[arg(long, env = "MEMLOAD_DVID", default_value = "127.0.0.1:33016")]
    dvid: String,

    /// Log keys instead of writing them
    #[arg(long, env = "MEMLOAD_DRY")]
    dry: bool,

    /// Extra attempts for a failed write
    #[arg(long, env = "MEMLOAD_RETRY_COUNT", default_value_t = DEFAULT_RETRY_COUNT)]
    retry_count: u32,

    /// Batch file pattern; wildcards only in the file name
    #[arg(long, env = "MEMLOAD_PATTERN", default_value = DEFAULT_PATTERN)]
    pattern: String,

    /// Capacity of each device type queue
    #[arg(long, env = "MEMLOAD_QUEUE_CAPACITY", default_value_t = 200)]
    queue_capacity: usize,

    /// Error rate below which a batch counts as loaded
    #[arg(long, env = "MEMLOAD_NORMAL_ERROR_RATE", default_value_t = 0.01)]
    normal_error_rate: f64,

    /// Store connect timeout in milliseconds
    #[arg(long, env = "MEMLOAD_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    /// Timeout of a single write attempt in milliseconds
    #[arg(long, env = "MEMLOAD_WRITE_TIMEOUT_MS", default_value_t = DEFAULT_WRITE_TIMEOUT_MS)]
    write_timeout_ms: u64,

    /// Write a JSON run summary to this file
    #[arg(long, env = "MEMLOAD_REPORT")]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn ingest_config(&self) -> IngestConfig {
        let addresses = [
            (DeviceType::Idfa, &self.idfa),
            (DeviceType::Gaid, &self.gaid),
            (DeviceType::Adid, &self.adid),
            (DeviceType::Dvid, &self.dvid),
        ]
        .into_iter()
        .map(|(device_type, addr)| (device_type, addr.clone()))
        .collect();

        IngestConfig {
            addresses,
            dry_run: self.dry,
            retry_count: self.retry_count,
            pattern: self.pattern.clone(),
            queue_capacity: self.queue_capacity,
            normal_error_rate: self.normal_error_rate,
            connect_timeout_ms: self.connect_timeout_ms,
            write_timeout_ms: self.write_timeout_ms,
        }
    }
}

/// How a run ended
#[derive(Debug)]
enum Outcome {
    /// Nothing matched the batch pattern; no worker was started
    NoBatches,
    Finished,
}

async fn execute(cli: &Cli) -> Result<Outcome> {
    let config = cli.ingest_config();
    config.validate()?;
    info!(pattern = %config.pattern, dry_run = config.dry_run, "Program start");

    let batches = discovery::discover(&config.pattern)
        .with_context(|| format!("Failed to list batches for '{}'", config.pattern))?;
    if batches.is_empty() {
        error!(pattern = %config.pattern, "No batches found");
        return Ok(Outcome::NoBatches);
    }
    for batch in &batches {
        info!(batch = %batch.display(), "Queued batch");
    }

    let stores = pipeline::memcache_stores(&config);
    let summary = pipeline::run(&config, stores, batches).await?;

    if let Some(path) = &cli.report {
        summary
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(report = %path.display(), "Run summary written");
    }

    info!(
        batches = summary.batches.len(),
        accepted = summary.accepted(),
        "Program exit"
    );
    Ok(Outcome::Finished)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("memload")
        .build()
        .merge_env()?;
    // Dropped on every return path so buffered file output is flushed.
    let _log_guard = init_logging(&log_config)?;

    match execute(&cli).await? {
        Outcome::NoBatches => Ok(ExitCode::FAILURE),
        Outcome::Finished => Ok(ExitCode::SUCCESS),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use memload_common::logging::LogOutput;

    fn read_logs(dir: &std::path::Path) -> String {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect()
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["memload"]).unwrap();
        let config = cli.ingest_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.addresses[&DeviceType::Dvid], "127.0.0.1:33016");
        assert_eq!(config.pattern, DEFAULT_PATTERN);
        assert!(!config.dry_run);
    }

    #[tokio::test]
    async fn test_no_batches_is_logged_to_file_before_exit() {
        let batches = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.tsv.gz", batches.path().display());
        let cli = Cli::try_parse_from(["memload", "--pattern", pattern.as_str()]).unwrap();

        let config = LogConfig::builder()
            .output(LogOutput::File)
            .log_dir(log_dir.path())
            .log_file_prefix("memload")
            .build();
        let guard = init_logging(&config).unwrap();

        let outcome = execute(&cli).await.unwrap();
        assert!(matches!(outcome, Outcome::NoBatches));

        drop(guard);
        assert!(read_logs(log_dir.path()).contains("No batches found"));
    }
}
