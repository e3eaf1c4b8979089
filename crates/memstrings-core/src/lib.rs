//! # Memstrings Core
//!
//! `memstrings-core` extracts printable ASCII strings from the live memory of a running
//! process. A scan is a one-shot pipeline of three stages:
//!
//! - [`attach`] - Gains debug-trace access to the target and keeps its leader thread
//!   stopped for the duration of the scan ([`attach::AttachedSession`]). The grant is released on every
//!   exit path.
//!
//! - [`maps`] - Enumerates the target's mapped regions from `/proc/<pid>/maps`
//!   ([`maps::Regions`]), with an explicit policy for malformed lines.
//!
//! - [`scanner`] - Reads each region with a single positioned read from
//!   `/proc/<pid>/mem` ([`memory::ProcessMemory`]) and reports printable runs
//!   ([`scanner::StringMatch`]).
//!
//! [`Scan`] wires the stages together and streams every match to a caller-provided
//! sink. Regions are independent: a string is never joined across two regions, and a
//! region that cannot be read is skipped without affecting the others.
//!
//! ## Platform Support
//!
//! Linux only. Attaching requires `ptrace` permission on the target (same user and a
//! permissive `kernel.yama.ptrace_scope`, or `CAP_SYS_PTRACE`).

#![warn(missing_docs)]

pub mod attach;
pub mod maps;
pub mod memory;
pub mod output;
mod scan;
pub mod scanner;
pub mod util;

pub use scan::{
    ConfigError, Scan, ScanConfig, ScanError, ScanReport, ScanSummary, scan_process, scan_regions,
};
