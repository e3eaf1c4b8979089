//! # Memstrings
//!
//! Memstrings lists the printable strings found in the memory of a running process,
//! together with the virtual address of each string. It is the process-memory
//! counterpart of running `strings` on a file.
//!
//! ## Quickstart guide
//!
//! ```sh
//! cargo build --release
//! # scan a process you own (or run as root)
//! target/release/memstrings <pid>
//! ```
//!
//! Each line of output is `0x<address>: <text>`. Use `memstrings --help` to see the
//! available options, e.g. `--format json` for one JSON object per match.
//!
//! ## Library use
//!
//! ```no_run
//! use memstrings::{ScanConfig, scan_process};
//!
//! let pid = "1234".parse().unwrap();
//! let summary = scan_process(pid, &ScanConfig::default(), |m| {
//!     println!("0x{:x}: {}", m.address, m.text);
//!     Ok(())
//! })
//! .unwrap();
//! println!("{} strings", summary.matches);
//! ```
//!
//! ## Modules
//!
//! - `attach`: Debug-trace attachment with guaranteed release.
//! - `maps`: Parsing of `/proc/<pid>/maps` into regions.
//! - `memory`: Positioned reads from `/proc/<pid>/mem`.
//! - `scanner`: Printable-run extraction.
//! - `output`: Text and JSON formatting of matches.
//!
//! ## External Crates
//!
//! - `log`: Used for logging throughout the crate.

pub use memstrings_core::*;
