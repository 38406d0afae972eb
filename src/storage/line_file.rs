//! Append-only line-delimited files
//!
//! A [`LineFile`] stores one encoded item per line. Writes only ever append;
//! reads are lazy forward scans that can be cancelled and restarted by
//! calling [`LineFile::all`] again.

use super::scan::{CancelToken, ScanError};
use crate::{RelayError, Result};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Encoding of one item to and from one line
pub trait LineCodec {
    type Item;
    type Error: fmt::Display;

    /// Encode an item, including the trailing newline
    fn encode(&self, item: &Self::Item) -> std::result::Result<String, Self::Error>;

    /// Decode a single line
    fn decode(&self, line: &str) -> std::result::Result<Self::Item, Self::Error>;
}

/// Append-only file of encoded lines
///
/// Clones share the same append lock, so appends through any clone never
/// interleave within this process.
#[derive(Debug, Clone)]
pub struct LineFile<C> {
    path: PathBuf,
    codec: C,
    append_lock: Arc<Mutex<()>>,
}

impl<C> LineFile<C>
where
    C: LineCodec + Clone,
    RelayError: From<C::Error>,
{
    /// Handle to a file at `path`; the file is created on first use
    pub fn new(path: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            path: path.into(),
            codec,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one item
    ///
    /// Encoding happens before the file is touched, so an unencodable item
    /// leaves the file unchanged.
    pub fn store(&self, item: &C::Item) -> Result<()> {
        let line = self.codec.encode(item)?;

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| RelayError::Storage(format!("append lock poisoned: {}", self.path.display())))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Append items in order, stopping at the first failure
    pub fn store_all<'a, I>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a C::Item>,
        C::Item: 'a,
    {
        let mut stored = 0;
        for item in items {
            self.store(item)?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Lazily scan every line, creating the file if it does not exist
    pub fn all(&self, cancel: CancelToken) -> std::result::Result<Lines<C>, ScanError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                File::open(&self.path)?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Lines {
            reader: BufReader::new(file),
            codec: self.codec.clone(),
            path: self.path.clone(),
            line: 0,
            buf: Vec::new(),
            cancel,
            done: false,
        })
    }
}

/// Forward scan over a [`LineFile`]
///
/// Yields one result per non-blank line. A line that fails to decode yields
/// [`ScanError::Malformed`] and the scan continues; a read error ends it.
/// The file handle is closed when the iterator is dropped.
pub struct Lines<C> {
    reader: BufReader<File>,
    codec: C,
    path: PathBuf,
    line: usize,
    buf: Vec<u8>,
    cancel: CancelToken,
    done: bool,
}

impl<C: LineCodec> Lines<C> {
    fn malformed(&self, reason: impl Into<String>) -> ScanError {
        let reason = reason.into();
        tracing::warn!(
            path = %self.path.display(),
            line = self.line,
            error = %reason,
            "Skipping malformed record"
        );
        ScanError::Malformed {
            path: self.path.clone(),
            line: self.line,
            reason,
        }
    }
}

impl<C: LineCodec> Iterator for Lines<C> {
    type Item = std::result::Result<C::Item, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                tracing::trace!(path = %self.path.display(), line = self.line, "Scan cancelled");
                self.done = true;
                return None;
            }

            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {
                    self.line += 1;
                    let text = match std::str::from_utf8(&self.buf) {
                        Ok(text) => text,
                        Err(e) => return Some(Err(self.malformed(e.to_string()))),
                    };
                    if text.trim().is_empty() {
                        continue;
                    }
                    return match self.codec.decode(text) {
                        Ok(item) => Some(Ok(item)),
                        Err(e) => Some(Err(self.malformed(e.to_string()))),
                    };
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ScanError::Io(e)));
                }
            }
        }
    }
}
