//! backup command - Reconcile the configured roots with the bucket
//!
//! Uploads new and changed files, and with `--delete` removes remote objects
//! whose local file is gone.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use clonus_core::{Config, Failure, SyncOptions, SyncReport, SyncSession};
use clonus_s3::S3Client;
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{ConsoleObserver, Formatter, OutputConfig};

/// Back up local roots to a bucket
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Path to the backup configuration (TOML)
    pub config: PathBuf,

    /// Delete remote objects that have no local counterpart
    #[arg(short, long)]
    pub delete: bool,

    /// Dry run (report what would be done without changing the bucket)
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Use the cache as-is instead of rebuilding it from a bucket listing
    #[arg(short = 'r', long = "no-rebuild-cache")]
    pub no_rebuild_cache: bool,
}

impl BackupArgs {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            delete: self.delete,
            dry_run: self.dry_run,
            rebuild_cache: !self.no_rebuild_cache,
        }
    }
}

#[derive(Debug, Serialize)]
struct BackupOutput<'a> {
    bucket: &'a str,
    uploaded: usize,
    updated: usize,
    deleted: usize,
    unchanged: usize,
    errors: usize,
    bytes_uploaded: u64,
    dry_run: bool,
    consistency_warnings: &'a [String],
    failures: &'a [Failure],
}

impl<'a> BackupOutput<'a> {
    fn new(bucket: &'a str, report: &'a SyncReport) -> Self {
        Self {
            bucket,
            uploaded: report.uploaded,
            updated: report.updated,
            deleted: report.deleted,
            unchanged: report.unchanged,
            errors: report.failures.len(),
            bytes_uploaded: report.bytes_uploaded,
            dry_run: report.dry_run,
            consistency_warnings: &report.consistency_warnings,
            failures: &report.failures,
        }
    }
}

/// Execute the backup command
pub async fn execute(args: BackupArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    match run(&args, &formatter).await {
        Ok((config, report)) => {
            let output = BackupOutput::new(&config.bucket, &report);
            formatter.summary(&output, &summary_line(&report));
            if report.is_clean() {
                ExitCode::Success
            } else {
                ExitCode::GeneralError
            }
        }
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            ExitCode::from_anyhow(&e)
        }
    }
}

async fn run(args: &BackupArgs, formatter: &Formatter) -> anyhow::Result<(Config, SyncReport)> {
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    tracing::debug!(?config, "Loaded configuration");

    let client = S3Client::new(&config)
        .await
        .context("Failed to create S3 client")?;

    let observer = ConsoleObserver::new(formatter.clone(), &config.bucket);
    let result = {
        let mut session = SyncSession::new(&client, &config, args.options(), &observer)
            .context("Failed to open metadata cache")?;
        session.run().await
    };
    observer.finish();

    let report = result.with_context(|| format!("Backup to {} aborted", config.bucket))?;
    Ok((config, report))
}

/// Final line of human-readable output
fn summary_line(report: &SyncReport) -> String {
    let mut line = format!(
        "Backup complete: {} uploaded, {} updated, {} deleted, {} unchanged, {} errors",
        report.uploaded,
        report.updated,
        report.deleted,
        report.unchanged,
        report.failures.len()
    );
    if report.dry_run {
        line.push_str(" (dry run)");
    }
    line
}
