//! Communicator
//!
//! Owns the two connection logs and drives delivery between them.
//!
//! # Logs
//!
//! - **desired**: every connection ever requested, appended by [`Communicator::record`]
//! - **current**: every connection whose delivery was confirmed, appended by
//!   [`Communicator::link`] with `receive_epoch` stamped
//!
//! A connection is *unsent* while its 4-tuple identity appears in desired but
//! not in current. [`Communicator::reconcile`] computes that set and tries to
//! link each member; failures stay unsent and are retried on the next pass.
//! A connection is never delivered by two tasks at once: every link started
//! by `submit` or `reconcile` holds a claim on its identity until it finishes.
//!
//! # Example
//!
//! ```ignore
//! use linkrelay::communicator::Communicator;
//!
//! let communicator = Communicator::new("desired.log", "current.log", translator);
//! communicator.record(&Connection::now("a@b.com", "home@example.com", "hi"))?;
//! let linked = communicator.reconcile().await?;
//! ```

pub mod retry;

use crate::connection::{Connection, ConnectionIdentity};
use crate::dispatch::{Sender, Translator};
use crate::storage::{CancelToken, ConnectionFile, Each, ScanError};
use crate::sweeper::metrics;
use crate::{RelayError, Result};
use retry::{with_retry, RetryConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

/// Default cap on concurrent deliveries during a reconcile pass
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Record and deliver connections
#[derive(Debug, Clone)]
pub struct Communicator {
    desired: ConnectionFile,
    current: ConnectionFile,
    translator: Translator,
    max_in_flight: usize,
    retry: RetryConfig,
    in_flight: Arc<Mutex<HashSet<ConnectionIdentity>>>,
}

/// Claim on a connection being delivered; released on drop
struct InFlight {
    identity: ConnectionIdentity,
    claims: Arc<Mutex<HashSet<ConnectionIdentity>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims.remove(&self.identity);
    }
}

/// Counts over both logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Records in the desired log
    pub desired: usize,
    /// Records in the current log
    pub linked: usize,
    /// Distinct desired connections with no linked twin
    pub unsent: usize,
    /// Lines in either log that failed to decode
    pub malformed: usize,
}

impl Communicator {
    pub fn new(
        desired_path: impl Into<PathBuf>,
        current_path: impl Into<PathBuf>,
        translator: Translator,
    ) -> Self {
        Self {
            desired: ConnectionFile::new(desired_path),
            current: ConnectionFile::new(current_path),
            translator,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retry: RetryConfig::none(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Cap concurrent deliveries during reconcile (at least one)
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Retry transient failures within a single link
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn desired(&self) -> &ConnectionFile {
        &self.desired
    }

    pub fn current(&self) -> &ConnectionFile {
        &self.current
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Claim `connection` for delivery, or `None` if another task holds it
    fn claim(&self, connection: &Connection) -> Option<InFlight> {
        let identity = connection.identity();
        let mut claims = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !claims.insert(identity) {
            return None;
        }
        Some(InFlight {
            identity,
            claims: Arc::clone(&self.in_flight),
        })
    }

    /// Persist the intent to deliver `connection`
    ///
    /// No deduplication: recording the same connection twice appends twice.
    pub fn record(&self, connection: &Connection) -> Result<()> {
        self.desired.store(connection)?;
        tracing::debug!(connection = %connection, "Recorded connection");
        Ok(())
    }

    /// Deliver `connection` through `sender` and confirm it in the current log
    ///
    /// On failure nothing is written; the connection stays unsent and the
    /// caller still holds the original. On success the stamped copy is
    /// appended to the current log and returned. If that append fails the
    /// message went out but is not confirmed, and the storage error is returned.
    pub async fn link(&self, connection: &Connection, sender: &dyn Sender) -> Result<Connection> {
        let kind = sender.kind().to_string();

        if let Err(e) = with_retry(&self.retry, "link", || sender.send()).await {
            metrics::record_link(&kind, "failure");
            tracing::error!(
                connection = %connection,
                receiver = %connection.receiver,
                %kind,
                error = %e,
                "Link failed"
            );
            return Err(e.into());
        }

        let linked = connection.linked_at(chrono::Utc::now().timestamp());
        if let Err(e) = self.current.store(&linked) {
            metrics::record_link(&kind, "unconfirmed");
            tracing::error!(
                connection = %linked,
                path = %self.current.path().display(),
                %kind,
                error = %e,
                "Delivered but not confirmed; the next pass will send it again"
            );
            return Err(e);
        }
        metrics::record_link(&kind, "success");
        tracing::info!(connection = %linked, %kind, "Linked connection");
        Ok(linked)
    }

    /// Delivered connections, in the order they were confirmed
    ///
    /// Malformed lines are skipped. A read error partway through is logged
    /// and ends the iteration, so a short result does not prove the log is
    /// short; scan [`ConnectionFile::all`] on [`Communicator::current`] to see
    /// every error.
    pub fn sent(&self, cancel: CancelToken) -> std::result::Result<Each, ScanError> {
        self.current.each(cancel)
    }

    /// Every requested connection, delivered or not, in the order recorded
    ///
    /// Same error handling as [`Communicator::sent`]; use
    /// [`ConnectionFile::all`] on [`Communicator::desired`] to see every error.
    pub fn received(&self, cancel: CancelToken) -> std::result::Result<Each, ScanError> {
        self.desired.each(cancel)
    }

    /// Requested connections with no delivered twin, in the order recorded
    ///
    /// Connections with the same identity are returned once. Malformed lines
    /// are skipped; a read error on either log is returned.
    pub fn unsent(&self) -> Result<Vec<Connection>> {
        let mut seen = self.linked_identities()?;

        let mut pending = Vec::new();
        for item in self.desired.all(CancelToken::new())? {
            match item {
                Ok(connection) => {
                    if seen.insert(connection.identity()) {
                        pending.push(connection);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => {}
            }
        }

        Ok(pending)
    }

    fn linked_identities(&self) -> Result<HashSet<ConnectionIdentity>> {
        let mut linked = HashSet::new();
        for item in self.current.all(CancelToken::new())? {
            match item {
                Ok(connection) => {
                    linked.insert(connection.identity());
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => {}
            }
        }
        Ok(linked)
    }

    /// Try to link every unsent connection
    ///
    /// Each delivery runs in its own task, at most `max_in_flight` at a time.
    /// Connections already being delivered by another task are skipped.
    /// A connection that fails to translate or send is logged and left
    /// unsent; it never aborts the pass. A failure to append to the current
    /// log is returned once every task has finished. Otherwise returns the
    /// connections linked by this pass, in the order they were recorded.
    pub async fn reconcile(&self) -> Result<Vec<Connection>> {
        let unsent = self.unsent()?;
        if unsent.is_empty() {
            tracing::debug!("Nothing to reconcile");
            return Ok(Vec::new());
        }

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for (index, connection) in unsent.into_iter().enumerate() {
            let Some(claim) = self.claim(&connection) else {
                tracing::debug!(connection = %connection, "Already being delivered");
                continue;
            };
            let sender = match self.translator.translate(&connection) {
                Ok(sender) => sender,
                Err(e) => {
                    metrics::record_link("invalid", "failure");
                    tracing::warn!(connection = %connection, error = %e, "Cannot translate connection");
                    continue;
                }
            };

            let this = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _claim = claim;
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| RelayError::Other(format!("delivery pool closed: {}", e)))?;
                let linked = this.link(&connection, sender.as_ref()).await?;
                Ok::<_, RelayError>((index, linked))
            });
        }

        let mut linked = Vec::new();
        let mut failed = 0usize;
        let mut storage_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(done)) => linked.push(done),
                Ok(Err(e @ (RelayError::Io(_) | RelayError::Storage(_)))) => {
                    failed += 1;
                    storage_error.get_or_insert(e);
                }
                // Logged by link
                Ok(Err(_)) => failed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "Delivery task aborted");
                }
            }
        }

        tracing::info!(linked = linked.len(), failed, "Reconcile pass complete");
        if let Some(e) = storage_error {
            return Err(e);
        }

        linked.sort_by_key(|(index, _)| *index);
        Ok(linked.into_iter().map(|(_, connection)| connection).collect())
    }

    /// Validate, record, and start delivering `connection` in the background
    ///
    /// Validation errors are returned before anything is written. The link
    /// attempt runs on the current tokio runtime; calling this outside one is
    /// an error and records nothing. A failed attempt leaves the connection
    /// for the next reconcile pass. If the same connection is already being
    /// delivered, the returned task resolves to [`RelayError::InFlight`].
    pub fn submit(&self, connection: Connection) -> Result<JoinHandle<Result<Connection>>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RelayError::Other(format!("submit needs a tokio runtime: {}", e)))?;
        let sender = self.translator.translate(&connection)?;
        self.record(&connection)?;

        let claim = self.claim(&connection);
        let this = self.clone();
        Ok(runtime.spawn(async move {
            let Some(_claim) = claim else {
                return Err(RelayError::InFlight(connection.to_string()));
            };
            this.link(&connection, sender.as_ref()).await
        }))
    }

    /// Record counts and the size of the unsent set
    pub fn stats(&self) -> Result<Stats> {
        let mut stats = Stats::default();
        let mut seen: HashSet<ConnectionIdentity> = HashSet::new();

        for item in self.current.all(CancelToken::new())? {
            match item {
                Ok(connection) => {
                    stats.linked += 1;
                    seen.insert(connection.identity());
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => stats.malformed += 1,
            }
        }

        for item in self.desired.all(CancelToken::new())? {
            match item {
                Ok(connection) => {
                    stats.desired += 1;
                    if seen.insert(connection.identity()) {
                        stats.unsent += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => stats.malformed += 1,
            }
        }

        Ok(stats)
    }
}
