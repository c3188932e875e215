// diskwatch command-line entry point

use anyhow::Context;
use clap::Parser;
use diskwatch::models::VolumeMode;
use diskwatch::utils::log::init_logger;
use diskwatch::{wait_for_disk_event, watch_disk_events, ResolvedDiskRecord, WatchOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::error;

/// Wait for a physical disk to be attached or detached and print what it is.
#[derive(Debug, Parser)]
#[command(name = "diskwatch", version, about)]
struct Cli {
    /// JSON file with watch options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds to wait for an event (-1 waits forever)
    #[arg(long, allow_negative_numbers = true)]
    timeout_ms: Option<i64>,

    /// How long to wait for a drive letter after attach
    #[arg(long, allow_negative_numbers = true)]
    poll_ceiling_ms: Option<i64>,

    /// Milliseconds between drive-letter checks while polling
    #[arg(long, allow_negative_numbers = true)]
    poll_interval_ms: Option<i64>,

    /// Provider sampling interval (max 2000)
    #[arg(long)]
    sampling_ms: Option<i64>,

    /// Report only the first discovered volume
    #[arg(long)]
    first_volume_only: bool,

    /// Keep watching and print every event
    #[arg(long)]
    follow: bool,

    /// Directory for log files (defaults to ./logs next to the executable)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn options(&self) -> anyhow::Result<WatchOptions> {
        let mut options = match &self.config {
            Some(path) => WatchOptions::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => WatchOptions::default(),
        };
        if let Some(v) = self.timeout_ms {
            options.timeout_ms = v;
        }
        if let Some(v) = self.poll_ceiling_ms {
            options.poll_ceiling_ms = v;
        }
        if let Some(v) = self.poll_interval_ms {
            options.poll_interval_ms = v;
        }
        if let Some(v) = self.sampling_ms {
            options.sampling_interval_ms = v;
        }
        if self.first_volume_only {
            options.volume_mode = VolumeMode::First;
        }
        if let Some(dir) = &self.log_dir {
            options.log_dir = Some(dir.display().to_string());
        }
        if let Some(level) = &self.log_level {
            options.log_level = level.clone();
        }
        Ok(options)
    }
}

/// Exit status when no event arrived before the timeout
const EXIT_TIMED_OUT: u8 = 2;
/// Exit status for invalid options and provider failures
const EXIT_FAILED: u8 = 1;

fn write_record(out: &mut impl Write, record: &ResolvedDiskRecord) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(record)?)?;
    Ok(())
}

/// Print the outcome of a single wait. A timeout prints `null`.
fn write_outcome(out: &mut impl Write, outcome: Option<&ResolvedDiskRecord>) -> anyhow::Result<u8> {
    match outcome {
        Some(record) => {
            write_record(out, record)?;
            Ok(0)
        }
        None => {
            writeln!(out, "null")?;
            Ok(EXIT_TIMED_OUT)
        }
    }
}

fn exit_status(result: anyhow::Result<u8>) -> u8 {
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("diskwatch failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            EXIT_FAILED
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<u8> {
    let options = cli.options()?;
    options.validate()?;

    if let Err(e) = init_logger(options.log_dir.as_deref().map(Path::new), &options.log_level) {
        eprintln!("Logging disabled: {e}");
    }

    let stdout = io::stdout();
    if cli.follow {
        let mut write_error = None;
        watch_disk_events(&options, |record| match write_record(&mut stdout.lock(), record) {
            Ok(()) => true,
            Err(e) => {
                write_error = Some(e);
                false
            }
        })?;
        return match write_error {
            Some(e) => Err(e),
            None => Ok(0),
        };
    }

    let outcome = wait_for_disk_event(&options)?;
    write_outcome(&mut stdout.lock(), outcome.as_ref())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    ExitCode::from(exit_status(run(&cli)))
}
