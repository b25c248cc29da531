//! clonus - Incremental backup of local directories to S3
//!
//! Reads a TOML configuration naming a bucket and a set of local roots, then
//! uploads every new or changed file, optionally deleting remote objects whose
//! local file is gone.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_code;
mod output;

use commands::backup::BackupArgs;
use output::OutputConfig;

#[derive(Debug, Parser)]
#[command(
    name = "clonus",
    version,
    about = "Incremental backup of local directories to an S3 bucket"
)]
struct Cli {
    #[command(flatten)]
    backup: BackupArgs,

    /// Only print errors and the final summary
    #[arg(short, long)]
    quiet: bool,

    /// Output in JSON format
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR")]
    no_color: bool,

    /// Verbose logging (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    let code = commands::backup::execute(cli.backup, output_config).await;
    std::process::exit(code.as_i32());
}
