//! Formatting of string matches.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::scanner::StringMatch;

/// How matches are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `0x<address>: <text>` per line
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Streams matches to a writer, one line per match.
pub struct MatchWriter<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> MatchWriter<W> {
    /// Creates a writer emitting `format` to `out`.
    pub fn new(out: W, format: OutputFormat) -> Self {
        MatchWriter { out, format }
    }

    /// Writes one match.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing fails.
    pub fn write_match(&mut self, m: &StringMatch) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "0x{:x}: {}", m.address, m.text),
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, m)?;
                self.out.write_all(b"\n")
            }
        }
    }

    /// Flushes the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if flushing fails.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}
