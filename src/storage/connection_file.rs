//! Connection logs
//!
//! A [`ConnectionFile`] is a [`LineFile`] of hex-encoded connection records,
//! plus point lookups built on the scan combinators.

use super::line_file::{LineFile, Lines};
use super::scan::{detect, select, CancelToken, ScanError};
use crate::connection::{Connection, ConnectionCodec, ConnectionIdentity};
use crate::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Lazy scan over every record in a connection log
pub type ConnectionScan = Lines<ConnectionCodec>;

/// Append-only log of connections
#[derive(Debug, Clone)]
pub struct ConnectionFile {
    file: LineFile<ConnectionCodec>,
}

impl ConnectionFile {
    /// Handle to the log at `path`; the file is created on first read or write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: LineFile::new(path, ConnectionCodec),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Append one connection
    pub fn store(&self, connection: &Connection) -> Result<()> {
        self.file.store(connection)
    }

    /// Append connections in order, stopping at the first failure
    pub fn store_all(&self, connections: &[Connection]) -> Result<usize> {
        self.file.store_all(connections)
    }

    /// Every record with its decode error, if any
    pub fn all(&self, cancel: CancelToken) -> std::result::Result<ConnectionScan, ScanError> {
        self.file.all(cancel)
    }

    /// Every decodable connection
    ///
    /// Malformed records are skipped. A read error ends the iteration early
    /// and is logged.
    pub fn each(&self, cancel: CancelToken) -> std::result::Result<Each, ScanError> {
        Ok(Each {
            scan: self.all(cancel)?,
            path: self.path().to_path_buf(),
        })
    }

    /// Whether a connection equal to `connection` has been stored
    pub fn find_connection(&self, connection: &Connection) -> std::result::Result<bool, ScanError> {
        let found = detect(
            |cancel: CancelToken| self.all(cancel),
            |item: &Connection| Ok(item == connection),
        )?;
        Ok(found.is_some())
    }

    /// All stored connections equal to any of `connections`
    ///
    /// Per-record decode errors are collected in the second list without
    /// stopping the search. Every stored match is returned, so a connection
    /// stored twice appears twice.
    pub fn find_connections(&self, connections: &[Connection]) -> (Vec<Connection>, Vec<ScanError>) {
        let wanted: HashSet<ConnectionIdentity> =
            connections.iter().map(Connection::identity).collect();

        let mut found = Vec::new();
        let mut errs = Vec::new();

        let selected = match select(
            |cancel: CancelToken| self.all(cancel),
            |item: &Connection| Ok(wanted.contains(&item.identity())),
        ) {
            Ok(selected) => selected,
            Err(e) => {
                errs.push(e);
                return (found, errs);
            }
        };

        for item in selected {
            match item {
                Ok(connection) => found.push(connection),
                Err(e) => errs.push(e),
            }
        }

        (found, errs)
    }
}

/// Iterator returned by [`ConnectionFile::each`]
pub struct Each {
    scan: ConnectionScan,
    path: PathBuf,
}

impl Iterator for Each {
    type Item = Connection;

    fn next(&mut self) -> Option<Connection> {
        loop {
            match self.scan.next()? {
                Ok(connection) => return Some(connection),
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %e,
                        "Connection scan ended early"
                    );
                    return None;
                }
                Err(_) => continue,
            }
        }
    }
}
