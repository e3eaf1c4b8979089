use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};
use memstrings_bin::{EXIT_SUCCESS, EXIT_USAGE, exit_code, init_logging, init_logging_with_progress};
use memstrings_core::attach::Pid;
use memstrings_core::maps::MalformedLinePolicy;
use memstrings_core::output::{MatchWriter, OutputFormat};
use memstrings_core::{Scan, ScanConfig, ScanError, ScanReport};

/// Output format of the matches.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// `0x<address>: <text>`
    Text,
    /// One JSON object per line
    Json,
}

impl From<Format> for OutputFormat {
    fn from(value: Format) -> Self {
        match value {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        }
    }
}

/// Print the printable strings found in the memory of a running process.
#[derive(Debug, Parser, Clone)]
#[clap(version)]
struct CliArgs {
    /// Process id of the target process.
    pid: Pid,
    /// JSON scan configuration file. Flags override its values.
    #[clap(long = "config")]
    config: Option<PathBuf>,
    /// Minimum length of a reported string.
    #[clap(long = "min-len")]
    min_len: Option<usize>,
    /// Abort the scan on a malformed maps line instead of skipping it.
    #[clap(long = "strict-maps")]
    strict_maps: bool,
    /// Skip regions larger than this many bytes.
    #[clap(long = "max-region-size")]
    max_region_size: Option<u64>,
    /// Output format.
    #[clap(long = "format", value_enum, default_value = "text")]
    format: Format,
    /// Write a JSON summary of the scan to this file.
    #[clap(long = "summary")]
    summary: Option<PathBuf>,
    /// Show a progress spinner on stderr.
    #[clap(long = "progress")]
    progress: bool,
}

impl CliArgs {
    fn scan_config(&self) -> Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_jsonfile(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ScanConfig::default(),
        };
        if let Some(min_len) = self.min_len {
            config.min_len = min_len;
        }
        if self.strict_maps {
            config.malformed_lines = MalformedLinePolicy::Abort;
        }
        if self.max_region_size.is_some() {
            config.max_region_size = self.max_region_size;
        }
        Ok(config)
    }
}

fn run(args: &CliArgs) -> Result<()> {
    let mut scan = Scan::new(args.scan_config()?);
    if args.progress {
        scan = scan.with_progress(init_logging_with_progress()?);
    } else {
        init_logging()?;
    }
    info!("CLI args: {:?}", args);

    let stdout = std::io::stdout();
    let mut writer = MatchWriter::new(BufWriter::new(stdout.lock()), args.format.into());
    let summary = scan.run(args.pid, |m| writer.write_match(m))?;
    writer.flush().map_err(ScanError::Output)?;

    if let Some(path) = &args.summary {
        ScanReport::new(args.pid, scan.config().clone(), summary)
            .save_to_file(path)
            .with_context(|| format!("failed to write summary {}", path.display()))?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::from(EXIT_SUCCESS)
            };
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            let code = exit_code(&e);
            if code != EXIT_SUCCESS {
                if log::log_enabled!(log::Level::Error) {
                    error!("{:#}", e);
                } else {
                    eprintln!("memstrings: {:#}", e);
                }
            }
            ExitCode::from(code)
        }
    }
}
