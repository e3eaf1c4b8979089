//! # Memstrings binary support
//!
//! Logging setup and exit-code mapping for the `memstrings` binary.
//!
//! ## Exit codes
//!
//! - `0`: scan completed (including zero matches, skipped regions, or a closed stdout)
//! - `1`: usage error (wrong argument count, invalid pid, unknown flag)
//! - `2`: attaching to the target failed
//! - `3`: any other fatal error (descriptor open, aborted maps parsing, config or output I/O)

#[macro_use]
extern crate log;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use memstrings_core::ScanError;

/// Exit code for a completed scan.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for a usage error.
pub const EXIT_USAGE: u8 = 1;
/// Exit code for a failed attach.
pub const EXIT_ATTACH: u8 = 2;
/// Exit code for other fatal errors.
pub const EXIT_FAILURE: u8 = 3;

fn logger_builder() -> env_logger::Builder {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
}

pub fn init_logging() -> anyhow::Result<()> {
    logger_builder().try_init()?;
    Ok(())
}

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger = logger_builder().build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Maps a fatal error to the process exit code.
///
/// A closed stdout ends the scan early but is not a failure.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::Attach(_)) => EXIT_ATTACH,
        Some(ScanError::Output(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!("Output closed, stopping");
            EXIT_SUCCESS
        }
        _ => EXIT_FAILURE,
    }
}
