//! Region enumeration from `/proc/<pid>/maps`.
//!
//! Every line of the maps descriptor starts with an address range token
//! `<hexStart>-<hexEnd>`, followed by permissions, offset, device, inode and an
//! optional pathname. Only the range is needed for scanning; permissions and
//! pathname are kept for diagnostics.
//!
//! [`Regions`] is a lazy, single-pass iterator. Re-enumerating means re-reading the
//! live descriptor, which may have changed in between.

use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::num::ParseIntError;
use std::path::PathBuf;

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attach::{AttachedSession, Tracer};
use crate::util::PROC_ROOT;

/// A contiguous address range `[start, end)` of the target's address space.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    /// First address of the region
    pub start: u64,
    /// One past the last address of the region
    pub end: u64,
    /// Permission string, e.g. `r-xp`
    pub perms: String,
    /// Backing pathname or pseudo-path such as `[stack]`
    pub path: Option<String>,
}

impl MemoryRegion {
    /// Creates a region without permission or path information.
    pub fn new(start: u64, end: u64) -> Self {
        MemoryRegion {
            start,
            end,
            perms: String::new(),
            path: None,
        }
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if the region spans zero bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns `false` if the permission string marks the region as not readable.
    ///
    /// Regions without permission information count as readable.
    pub fn is_readable(&self) -> bool {
        !self.perms.starts_with('-')
    }

    /// Returns `true` if `addr` lies within the region.
    pub fn contains(&self, addr: u64) -> bool {
        (self.start..self.end).contains(&addr)
    }
}

impl Debug for MemoryRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}-0x{:x}", self.start, self.end)?;
        if !self.perms.is_empty() {
            write!(f, " {}", self.perms)?;
        }
        if let Some(path) = &self.path {
            write!(f, " {}", path)?;
        }
        Ok(())
    }
}

/// Errors for a single malformed maps line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapsParseError {
    /// The line has no address range token.
    #[error("missing address range")]
    MissingRange,
    /// The address range token has no `-` separator.
    #[error("address range {0:?} has no '-' separator")]
    MissingSeparator(String),
    /// One side of the address range is not a hexadecimal integer.
    #[error("invalid address {token:?}: {source}")]
    InvalidAddress {
        /// The offending token
        token: String,
        /// Underlying parse error
        #[source]
        source: ParseIntError,
    },
    /// The range ends before it starts.
    #[error("address range ends before it starts: 0x{start:x}-0x{end:x}")]
    InvertedRange {
        /// Parsed start address
        start: u64,
        /// Parsed end address
        end: u64,
    },
}

/// Errors that can occur while enumerating regions.
#[derive(Debug, Error)]
pub enum MapsError {
    /// The maps descriptor could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path of the maps descriptor
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Reading from the maps descriptor failed.
    #[error(transparent)]
    Read(#[from] std::io::Error),
    /// A line was malformed and the policy is [`MalformedLinePolicy::Abort`].
    #[error("malformed maps line {line_no} ({line:?}): {source}")]
    Malformed {
        /// 1-based line number
        line_no: usize,
        /// The raw line
        line: String,
        /// Parse failure
        #[source]
        source: MapsParseError,
    },
}

/// What to do with a maps line whose address range does not parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Log a warning, skip the line and keep scanning.
    #[default]
    Skip,
    /// Stop the enumeration with [`MapsError::Malformed`].
    Abort,
}

/// Parses one line of a maps descriptor.
///
/// # Errors
///
/// Returns a [`MapsParseError`] if the address range token is missing or malformed.
///
/// # Examples
///
/// ```
/// use memstrings_core::maps::parse_maps_line;
///
/// let region = parse_maps_line("7ffd1000-7ffd3000 rw-p 00000000 00:00 0 [stack]").unwrap();
/// assert_eq!(region.start, 0x7ffd1000);
/// assert_eq!(region.size(), 0x2000);
/// assert_eq!(region.path.as_deref(), Some("[stack]"));
/// ```
pub fn parse_maps_line(line: &str) -> Result<MemoryRegion, MapsParseError> {
    let mut fields = line.split_whitespace();
    let range = fields.next().ok_or(MapsParseError::MissingRange)?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| MapsParseError::MissingSeparator(range.to_string()))?;
    let start = parse_hex(start)?;
    let end = parse_hex(end)?;
    if end < start {
        return Err(MapsParseError::InvertedRange { start, end });
    }

    let perms = fields.next().unwrap_or_default().to_string();
    // offset, device, inode
    let path = fields.nth(3).map(|first| {
        // pathnames may contain spaces, e.g. "/tmp/a b (deleted)"
        let rest: Vec<&str> = std::iter::once(first).chain(fields).collect();
        rest.join(" ")
    });

    Ok(MemoryRegion {
        start,
        end,
        perms,
        path,
    })
}

fn parse_hex(token: &str) -> Result<u64, MapsParseError> {
    u64::from_str_radix(token, 16).map_err(|source| MapsParseError::InvalidAddress {
        token: token.to_string(),
        source,
    })
}

/// Lazy iterator over the regions of a maps descriptor.
///
/// Empty regions are skipped. Malformed lines are handled according to the
/// [`MalformedLinePolicy`]. After the first error the iterator is exhausted.
pub struct Regions<R: BufRead> {
    lines: std::io::Lines<R>,
    policy: MalformedLinePolicy,
    line_no: usize,
    skipped_lines: usize,
    empty_regions: usize,
    done: bool,
}

impl<R: BufRead> Regions<R> {
    /// Creates a region iterator over a maps descriptor reader.
    pub fn new(reader: R, policy: MalformedLinePolicy) -> Self {
        Regions {
            lines: reader.lines(),
            policy,
            line_no: 0,
            skipped_lines: 0,
            empty_regions: 0,
            done: false,
        }
    }

    /// Number of malformed lines skipped so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Number of zero-sized regions skipped so far.
    pub fn empty_regions(&self) -> usize {
        self.empty_regions
    }
}

impl<R: BufRead> Iterator for Regions<R> {
    type Item = Result<MemoryRegion, MapsError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match parse_maps_line(&line) {
                Ok(region) if region.is_empty() => {
                    trace!("Skipping empty region {:?}", region);
                    self.empty_regions += 1;
                }
                Ok(region) => return Some(Ok(region)),
                Err(source) => match self.policy {
                    MalformedLinePolicy::Skip => {
                        warn!(
                            "Skipping malformed maps line {} ({:?}): {}",
                            self.line_no, line, source
                        );
                        self.skipped_lines += 1;
                    }
                    MalformedLinePolicy::Abort => {
                        self.done = true;
                        return Some(Err(MapsError::Malformed {
                            line_no: self.line_no,
                            line,
                            source,
                        }));
                    }
                },
            }
        }
        None
    }
}

/// Opens the maps descriptor of an attached process.
///
/// # Errors
///
/// Returns [`MapsError::Open`] if `/proc/<pid>/maps` cannot be opened.
pub fn list_regions<T: Tracer>(
    session: &AttachedSession<T>,
    policy: MalformedLinePolicy,
) -> Result<Regions<BufReader<File>>, MapsError> {
    let path = PathBuf::from(format!("{}/{}/maps", PROC_ROOT, session.pid()));
    let file = File::open(&path).map_err(|source| MapsError::Open { path, source })?;
    Ok(Regions::new(BufReader::new(file), policy))
}
