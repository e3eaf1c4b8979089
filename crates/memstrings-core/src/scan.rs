use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attach::{AttachError, AttachedSession, Pid, Ptrace, Tracer};
use crate::maps::{MalformedLinePolicy, MapsError, MemoryRegion, list_regions};
use crate::memory::{MemoryOpenError, MemorySource, ProcessMemory};
use crate::scanner::{DEFAULT_MIN_LEN, RegionRead, StringMatch, scan_region};
use crate::util::NamedProgress;

/// Configuration of a scan.
///
/// Missing fields take their default when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Minimum length of a reported string (at least 1)
    pub min_len: usize,
    /// Handling of malformed maps lines
    pub malformed_lines: MalformedLinePolicy,
    /// Regions larger than this many bytes are skipped without reading (None = no limit)
    pub max_region_size: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_LEN,
            malformed_lines: MalformedLinePolicy::Skip,
            max_region_size: None,
        }
    }
}

/// Errors that can occur when loading a [`ScanConfig`].
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl ScanConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> Result<ScanConfig, ConfigError> {
        let mut file = File::open(filepath)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: ScanConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

/// Counters describing a finished scan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Regions produced by the enumerator
    pub regions: usize,
    /// Regions that were read (fully or partially)
    pub scanned_regions: usize,
    /// Regions with zero size
    pub empty_regions: usize,
    /// Regions above `max_region_size`
    pub oversized_regions: usize,
    /// Regions whose read failed
    pub unreadable_regions: usize,
    /// Malformed maps lines that were skipped
    pub malformed_lines: usize,
    /// Reported strings
    pub matches: usize,
    /// Bytes returned by all reads
    pub bytes_read: u64,
}

/// Errors that abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Attaching to the target failed. No session was created.
    #[error(transparent)]
    Attach(#[from] AttachError),
    /// The memory descriptor could not be opened.
    #[error(transparent)]
    MemoryOpen(#[from] MemoryOpenError),
    /// The maps descriptor could not be opened or read, or a line was malformed
    /// under [`MalformedLinePolicy::Abort`].
    #[error(transparent)]
    Maps(#[from] MapsError),
    /// The match sink failed.
    #[error("failed to emit match: {0}")]
    Output(#[source] std::io::Error),
}

/// One-shot string scan over a target's address space.
///
/// Attaches, enumerates regions, scans each region and detaches. Every match is
/// handed to the sink as soon as it is found.
pub struct Scan {
    config: ScanConfig,
    progress: Option<MultiProgress>,
}

impl Scan {
    /// Creates a scan with the given configuration.
    pub fn new(config: ScanConfig) -> Self {
        Scan {
            config,
            progress: None,
        }
    }

    /// Reports progress through a spinner on `progress`.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The effective configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans the process `pid` using [`Ptrace`].
    ///
    /// # Errors
    ///
    /// See [`Scan::run_with`].
    pub fn run<F>(&self, pid: Pid, sink: F) -> Result<ScanSummary, ScanError>
    where
        F: FnMut(&StringMatch) -> std::io::Result<()>,
    {
        self.run_with(Ptrace, pid, sink)
    }

    /// Scans the process `pid`, attaching through `tracer`.
    ///
    /// The session is released on every path once the attach succeeded, and the
    /// memory descriptor is closed before that.
    ///
    /// # Errors
    ///
    /// Returns a [`ScanError`] if attaching fails, a descriptor cannot be opened,
    /// region enumeration aborts or the sink fails. Unreadable regions are skipped
    /// and never reported as errors.
    pub fn run_with<T, F>(&self, tracer: T, pid: Pid, sink: F) -> Result<ScanSummary, ScanError>
    where
        T: Tracer,
        F: FnMut(&StringMatch) -> std::io::Result<()>,
    {
        let session = AttachedSession::attach_with(tracer, pid)?;
        let memory = ProcessMemory::open(&session)?;
        let mut regions = list_regions(&session, self.config.malformed_lines)?;

        let result = self.run_regions(&memory, regions.by_ref(), sink);
        drop(memory);
        session.detach();

        let mut summary = result?;
        summary.malformed_lines = regions.skipped_lines();
        summary.empty_regions += regions.empty_regions();
        info!(
            "Scanned {} of {} regions ({}), found {} strings",
            summary.scanned_regions,
            summary.regions,
            HumanBytes(summary.bytes_read),
            summary.matches
        );
        Ok(summary)
    }

    /// Scans already enumerated regions of `source`.
    ///
    /// Regions are processed in iteration order; matches within a region are
    /// emitted in ascending address order.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Maps`] on the first enumeration error and
    /// [`ScanError::Output`] if the sink fails.
    pub fn run_regions<M, I, F>(
        &self,
        source: &M,
        regions: I,
        mut sink: F,
    ) -> Result<ScanSummary, ScanError>
    where
        M: MemorySource,
        I: Iterator<Item = Result<MemoryRegion, MapsError>>,
        F: FnMut(&StringMatch) -> std::io::Result<()>,
    {
        let p = self.progress.as_ref().map(|p| {
            let p = p.add(ProgressBar::new_spinner());
            p.set_style(ProgressStyle::named_spinner("Scanning regions"));
            p.enable_steady_tick(Duration::from_millis(100));
            p
        });

        let mut summary = ScanSummary::default();
        for region in regions {
            let region = region?;
            summary.regions += 1;
            if let Some(p) = &p {
                p.inc(1);
            }
            if self
                .config
                .max_region_size
                .is_some_and(|max| region.size() > max)
            {
                debug!(
                    "Skipping region {:?} of {}",
                    region,
                    HumanBytes(region.size())
                );
                summary.oversized_regions += 1;
                continue;
            }

            let mut strings = scan_region(source, &region, self.config.min_len);
            match strings.read() {
                RegionRead::Read(n) => {
                    summary.scanned_regions += 1;
                    summary.bytes_read += n as u64;
                }
                RegionRead::Empty => summary.empty_regions += 1,
                RegionRead::Unreadable => summary.unreadable_regions += 1,
            }
            for m in strings.by_ref() {
                sink(&m).map_err(ScanError::Output)?;
                summary.matches += 1;
            }
            if let Some(p) = &p {
                p.set_message(format!(
                    "{} read, {} strings",
                    HumanBytes(summary.bytes_read),
                    summary.matches
                ));
            }
        }
        if let Some(p) = &p {
            p.finish_and_clear();
        }
        Ok(summary)
    }
}

/// Scans the process `pid` with `config`, streaming matches to `sink`.
///
/// # Errors
///
/// See [`Scan::run_with`].
pub fn scan_process<F>(pid: Pid, config: &ScanConfig, sink: F) -> Result<ScanSummary, ScanError>
where
    F: FnMut(&StringMatch) -> std::io::Result<()>,
{
    Scan::new(config.clone()).run(pid, sink)
}

/// Scans `regions` of `source` with `config`, streaming matches to `sink`.
///
/// # Errors
///
/// See [`Scan::run_regions`].
pub fn scan_regions<M, I, F>(
    source: &M,
    regions: I,
    config: &ScanConfig,
    sink: F,
) -> Result<ScanSummary, ScanError>
where
    M: MemorySource,
    I: Iterator<Item = Result<MemoryRegion, MapsError>>,
    F: FnMut(&StringMatch) -> std::io::Result<()>,
{
    Scan::new(config.clone()).run_regions(source, regions, sink)
}

/// Persisted record of a scan.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    /// ISO 8601 timestamp of when the scan finished
    date: String,
    /// Target process
    pid: Pid,
    /// Effective configuration
    config: ScanConfig,
    /// Scan counters
    summary: ScanSummary,
}

impl ScanReport {
    /// Creates a report timestamped now.
    pub fn new(pid: Pid, config: ScanConfig, summary: ScanSummary) -> Self {
        Self {
            date: chrono::Local::now().to_rfc3339(),
            pid,
            config,
            summary,
        }
    }

    /// Writes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn save_to_file<P: AsRef<Path>>(&self, filename: P) -> Result<(), ConfigError> {
        let file = File::create(filename.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Summary saved to {}", filename.as_ref().display());
        Ok(())
    }
}
