//! Printable-run extraction.
//!
//! A byte is printable iff it lies in `[32, 126]`. A maximal run of printable bytes
//! is reported as a [`StringMatch`] when it is at least `min_len` bytes long. Runs
//! are bounded by non-printable bytes and by the edges of the scanned buffer; a
//! run is never continued into the next region.

use log::debug;
use serde::Serialize;

use crate::maps::MemoryRegion;
use crate::memory::MemorySource;

/// Default minimum length of a reported string.
pub const DEFAULT_MIN_LEN: usize = 4;

/// A printable run found in the target's memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StringMatch {
    /// Absolute address of the first byte of the run
    pub address: u64,
    /// The run itself
    pub text: String,
}

/// Returns `true` if `b` is printable ASCII (space through `~`).
#[inline]
pub fn is_printable(b: u8) -> bool {
    (32..=126).contains(&b)
}

/// Iterator over the printable runs of one buffer.
///
/// Created by [`extract_strings`].
pub struct Strings<'a> {
    bytes: &'a [u8],
    base: u64,
    pos: usize,
    min_len: usize,
}

/// Lazily extracts printable runs of at least `min_len` bytes from `bytes`.
///
/// `base` is the absolute address of `bytes[0]`. A `min_len` of 0 is treated as 1.
///
/// # Examples
///
/// ```
/// use memstrings_core::scanner::extract_strings;
///
/// let bytes = b"\x00HELLO\x01\x00hi\x00";
/// let found: Vec<_> = extract_strings(0x1000, bytes, 4).collect();
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0].address, 0x1001);
/// assert_eq!(found[0].text, "HELLO");
/// ```
pub fn extract_strings(base: u64, bytes: &[u8], min_len: usize) -> Strings<'_> {
    Strings {
        bytes,
        base,
        pos: 0,
        min_len: min_len.max(1),
    }
}

impl Iterator for Strings<'_> {
    type Item = StringMatch;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.bytes.len() {
            let rest = &self.bytes[self.pos..];
            let start = match rest.iter().position(|&b| is_printable(b)) {
                Some(i) => self.pos + i,
                None => {
                    self.pos = self.bytes.len();
                    break;
                }
            };
            let end = self.bytes[start..]
                .iter()
                .position(|&b| !is_printable(b))
                .map_or(self.bytes.len(), |i| start + i);
            self.pos = end;
            if end - start >= self.min_len {
                // printable ASCII is always valid UTF-8
                let text = self.bytes[start..end].iter().map(|&b| b as char).collect();
                return Some(StringMatch {
                    address: self.base + start as u64,
                    text,
                });
            }
        }
        None
    }
}

/// Outcome of reading one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionRead {
    /// The region was read; holds the number of bytes returned.
    Read(usize),
    /// The region has no bytes.
    Empty,
    /// The read failed and the region was skipped.
    Unreadable,
}

/// Printable runs of one region, owning the region's buffer.
///
/// The buffer is released when this iterator is dropped.
pub struct RegionStrings {
    buffer: Vec<u8>,
    base: u64,
    pos: usize,
    min_len: usize,
    read: RegionRead,
}

impl RegionStrings {
    fn empty(base: u64, read: RegionRead) -> Self {
        RegionStrings {
            buffer: Vec::new(),
            base,
            pos: 0,
            min_len: 1,
            read,
        }
    }

    /// How the region read went.
    pub fn read(&self) -> RegionRead {
        self.read
    }
}

impl Iterator for RegionStrings {
    type Item = StringMatch;

    fn next(&mut self) -> Option<Self::Item> {
        let mut strings = extract_strings(self.base, &self.buffer, self.min_len);
        strings.pos = self.pos;
        let next = strings.next();
        self.pos = strings.pos;
        next
    }
}

/// Reads `region` from `source` and returns its printable runs.
///
/// Performs exactly one positioned read of `region.size()` bytes at `region.start`.
/// A partial read is scanned up to the bytes returned. A failed read, a region
/// without read permission and a region whose buffer cannot be allocated all
/// yield an empty iterator with [`RegionRead::Unreadable`].
pub fn scan_region<M: MemorySource>(
    source: &M,
    region: &MemoryRegion,
    min_len: usize,
) -> RegionStrings {
    if region.is_empty() {
        return RegionStrings::empty(region.start, RegionRead::Empty);
    }
    if !region.is_readable() {
        debug!("Skipping region {:?} without read permission", region);
        return RegionStrings::empty(region.start, RegionRead::Unreadable);
    }
    let Some(mut buffer) = region_buffer(region.size()) else {
        debug!("Region {:?} does not fit in memory, skipping", region);
        return RegionStrings::empty(region.start, RegionRead::Unreadable);
    };

    match source.read_at(region.start, &mut buffer) {
        Ok(n) => {
            buffer.truncate(n);
            RegionStrings {
                buffer,
                base: region.start,
                pos: 0,
                min_len: min_len.max(1),
                read: RegionRead::Read(n),
            }
        }
        Err(e) => {
            debug!("Skipping unreadable region {:?}: {}", region, e);
            RegionStrings::empty(region.start, RegionRead::Unreadable)
        }
    }
}

/// Allocates a zeroed buffer of `size` bytes, or `None` if the allocation fails.
fn region_buffer(size: u64) -> Option<Vec<u8>> {
    let size = usize::try_from(size).ok()?;
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(size).ok()?;
    buffer.resize(size, 0);
    Some(buffer)
}
