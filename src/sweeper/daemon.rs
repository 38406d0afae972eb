//! Sweeper daemon implementation
//!
//! Runs a reconcile pass at boot and then on every tick, accepting commands
//! in between. Runs as a tokio event loop; stops on a shutdown command or on
//! SIGTERM/SIGINT.

use super::metrics;
use crate::communicator::Communicator;
use crate::connection::Connection;
use crate::{RelayError, Result};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Default time between reconcile passes (60 seconds)
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default event channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between reconcile passes
    pub interval: Duration,

    /// Reconcile once before the first tick
    pub reconcile_on_start: bool,

    pub event_channel_capacity: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            reconcile_on_start: true,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_reconcile_on_start(mut self, enabled: bool) -> Self {
        self.reconcile_on_start = enabled;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

/// Events emitted by the sweeper
#[derive(Debug, Clone)]
pub enum SweeperEvent {
    Started,

    Stopped,

    ReconcileStarted,

    ReconcileCompleted {
        /// Connections linked by this pass
        linked: usize,
        /// Connections still waiting afterwards
        unsent: usize,
    },

    /// A connection was delivered and confirmed
    Linked(Connection),

    /// A submitted connection was recorded and its link attempt started
    Submitted(Connection),

    Error { message: String },
}

/// Commands accepted by a running sweeper
#[derive(Debug, Clone)]
pub enum SweeperCommand {
    /// Reconcile immediately
    ReconcileNow,

    /// Record a new connection and try to deliver it
    Submit(Connection),

    /// Change the time between passes
    SetInterval(Duration),

    Shutdown,
}

enum CommandResult {
    Continue,
    Stop,
}

/// Counters kept across the sweeper's lifetime
#[derive(Debug, Clone, Default)]
pub struct SweeperStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub linked_total: u64,
    pub last_unsent: usize,
    pub interval: Duration,
}

/// Background reconcile daemon
pub struct Sweeper {
    communicator: Communicator,
    config: SweeperConfig,
    stats: SweeperStats,
    event_tx: broadcast::Sender<SweeperEvent>,
    command_rx: Option<mpsc::Receiver<SweeperCommand>>,
    command_tx: mpsc::Sender<SweeperCommand>,
    /// Link attempts started by `Submit`, awaited on shutdown
    in_flight: Vec<JoinHandle<()>>,
    running: bool,
}

impl Sweeper {
    pub fn new(communicator: Communicator, config: SweeperConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        Self {
            communicator,
            stats: SweeperStats {
                interval: config.interval,
                ..Default::default()
            },
            config,
            event_tx,
            command_rx: Some(command_rx),
            command_tx,
            in_flight: Vec::new(),
            running: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SweeperEvent> {
        self.event_tx.subscribe()
    }

    pub fn command_sender(&self) -> mpsc::Sender<SweeperCommand> {
        self.command_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> &SweeperStats {
        &self.stats
    }

    fn send_event(&self, event: SweeperEvent) {
        emit(&self.event_tx, self.config.event_channel_capacity, event);
    }

    /// Run until shutdown
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| RelayError::Config("Sweeper already running".to_string()))?;

        self.running = true;
        metrics::set_health_status(true);
        self.send_event(SweeperEvent::Started);
        tracing::info!(interval_secs = self.config.interval.as_secs(), "Sweeper started");

        if self.config.reconcile_on_start {
            self.reconcile_cycle().await;
        }

        let mut interval = ticker(self.config.interval);

        #[cfg(unix)]
        self.run_with_signals(&mut interval, &mut command_rx).await?;

        #[cfg(not(unix))]
        self.run_without_signals(&mut interval, &mut command_rx).await?;

        tracing::info!("Performing shutdown cleanup");
        self.cleanup().await;

        self.running = false;
        metrics::set_health_status(false);
        self.send_event(SweeperEvent::Stopped);
        Ok(())
    }

    #[cfg(unix)]
    async fn run_with_signals(
        &mut self,
        interval: &mut tokio::time::Interval,
        command_rx: &mut mpsc::Receiver<SweeperCommand>,
    ) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| RelayError::Other(format!("Failed to set up SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| RelayError::Other(format!("Failed to set up SIGINT handler: {}", e)))?;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reconcile_cycle().await;
                }
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if let CommandResult::Stop = self.handle_command(cmd, interval).await {
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    break;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn run_without_signals(
        &mut self,
        interval: &mut tokio::time::Interval,
        command_rx: &mut mpsc::Receiver<SweeperCommand>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reconcile_cycle().await;
                }
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if let CommandResult::Stop = self.handle_command(cmd, interval).await {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl-C, initiating graceful shutdown");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_command(
        &mut self,
        cmd: SweeperCommand,
        interval: &mut tokio::time::Interval,
    ) -> CommandResult {
        match cmd {
            SweeperCommand::ReconcileNow => {
                self.reconcile_cycle().await;
            }
            SweeperCommand::Submit(connection) => {
                self.submit(connection);
            }
            SweeperCommand::SetInterval(duration) => {
                *interval = ticker(duration);
                self.config.interval = duration;
                self.stats.interval = duration;
            }
            SweeperCommand::Shutdown => {
                tracing::info!("Received shutdown command");
                return CommandResult::Stop;
            }
        }
        CommandResult::Continue
    }

    fn submit(&mut self, connection: Connection) {
        self.in_flight.retain(|handle| !handle.is_finished());

        let handle = match self.communicator.submit(connection.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.send_event(SweeperEvent::Error {
                    message: format!("Failed to submit {}: {}", connection, e),
                });
                return;
            }
        };
        self.send_event(SweeperEvent::Submitted(connection));

        let event_tx = self.event_tx.clone();
        let capacity = self.config.event_channel_capacity;
        self.in_flight.push(tokio::spawn(async move {
            let event = match handle.await {
                Ok(Ok(linked)) => SweeperEvent::Linked(linked),
                Ok(Err(e)) => SweeperEvent::Error {
                    message: format!("Link failed, left for next pass: {}", e),
                },
                Err(e) => SweeperEvent::Error {
                    message: format!("Link task aborted: {}", e),
                },
            };
            emit(&event_tx, capacity, event);
        }));
    }

    async fn reconcile_cycle(&mut self) {
        self.send_event(SweeperEvent::ReconcileStarted);
        let start = Instant::now();

        let linked = match self.communicator.reconcile().await {
            Ok(linked) => linked,
            Err(e) => {
                metrics::record_reconcile("error", start.elapsed().as_secs_f64());
                self.stats.cycles += 1;
                self.stats.failed_cycles += 1;
                self.send_event(SweeperEvent::Error {
                    message: format!("Reconcile failed: {}", e),
                });
                return;
            }
        };
        metrics::record_reconcile("success", start.elapsed().as_secs_f64());

        let linked_count = linked.len();
        for connection in linked {
            self.send_event(SweeperEvent::Linked(connection));
        }

        let unsent = match self.communicator.stats() {
            Ok(stats) => stats.unsent,
            Err(e) => {
                tracing::warn!(error = %e, "Could not count unsent connections");
                self.stats.last_unsent
            }
        };
        metrics::set_unsent(unsent);

        self.stats.cycles += 1;
        self.stats.linked_total += linked_count as u64;
        self.stats.last_unsent = unsent;

        self.send_event(SweeperEvent::ReconcileCompleted {
            linked: linked_count,
            unsent,
        });
    }

    async fn cleanup(&mut self) {
        for handle in self.in_flight.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Pending link did not finish cleanly");
            }
        }

        tracing::info!(
            cycles = self.stats.cycles,
            linked = self.stats.linked_total,
            unsent = self.stats.last_unsent,
            "Sweeper shutdown complete"
        );
    }
}

/// Interval whose first tick is one full period away
fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

/// Send an event, logging if dropped or if the channel is nearly full
fn emit(tx: &broadcast::Sender<SweeperEvent>, capacity: usize, event: SweeperEvent) {
    match tx.send(event) {
        Ok(_) => {
            let len = tx.len();
            if len > capacity * 80 / 100 {
                tracing::warn!(
                    current = len,
                    capacity,
                    threshold_pct = 80,
                    "Event channel nearing capacity"
                );
            }
        }
        Err(_) => {
            tracing::debug!("Event sent but no receivers subscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{
        DispatchSettings, EmailRequest, EmailTransport, SmsRequest, SmsTransport, Translator,
        TransportError,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Accepting;

    #[async_trait]
    impl EmailTransport for Accepting {
        async fn send_email(&self, _: &EmailRequest) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    #[async_trait]
    impl SmsTransport for Accepting {
        async fn send_sms(&self, _: &SmsRequest) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn communicator(dir: &TempDir) -> Communicator {
        let transport = Arc::new(Accepting);
        Communicator::new(
            dir.path().join("desired.log"),
            dir.path().join("current.log"),
            Translator::new(DispatchSettings::default(), transport.clone(), transport),
        )
    }

    fn drain(events: &mut broadcast::Receiver<SweeperEvent>) -> Vec<SweeperEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn slow() -> SweeperConfig {
        SweeperConfig::default().with_interval(Duration::from_secs(3600))
    }

    #[test]
    fn test_config_builder() {
        let config = SweeperConfig::default()
            .with_interval(Duration::from_secs(10))
            .with_reconcile_on_start(false)
            .with_event_channel_capacity(0);

        assert_eq!(config.interval, Duration::from_secs(10));
        assert!(!config.reconcile_on_start);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn test_boot_reconcile_then_shutdown() {
        let dir = TempDir::new().unwrap();
        let comm = communicator(&dir);
        comm.record(&Connection::new("s", "a@x.com", 1, "hi")).unwrap();

        let mut sweeper = Sweeper::new(comm.clone(), slow());
        let mut events = sweeper.subscribe();
        sweeper
            .command_sender()
            .send(SweeperCommand::Shutdown)
            .await
            .unwrap();

        sweeper.run().await.unwrap();

        let events = drain(&mut events);
        assert!(matches!(events.first(), Some(SweeperEvent::Started)));
        assert!(matches!(events.last(), Some(SweeperEvent::Stopped)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SweeperEvent::ReconcileCompleted { linked: 1, unsent: 0 })));
        assert!(comm.unsent().unwrap().is_empty());
        assert_eq!(sweeper.stats().cycles, 1);
        assert!(!sweeper.is_running());
    }

    #[tokio::test]
    async fn test_commands() {
        let dir = TempDir::new().unwrap();
        let comm = communicator(&dir);

        let mut sweeper = Sweeper::new(comm.clone(), slow().with_reconcile_on_start(false));
        let mut events = sweeper.subscribe();
        let commands = sweeper.command_sender();

        let submitted = Connection::new("s", "+15551234567", 2, "hi");
        commands
            .send(SweeperCommand::Submit(submitted.clone()))
            .await
            .unwrap();
        commands
            .send(SweeperCommand::SetInterval(Duration::from_secs(7200)))
            .await
            .unwrap();
        commands.send(SweeperCommand::ReconcileNow).await.unwrap();
        commands.send(SweeperCommand::Shutdown).await.unwrap();

        sweeper.run().await.unwrap();

        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SweeperEvent::Submitted(c) if *c == submitted)));
        assert_eq!(sweeper.stats().interval, Duration::from_secs(7200));
        assert!(comm.desired().find_connection(&submitted).unwrap());
        assert!(comm.unsent().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_submit_reports_error() {
        let dir = TempDir::new().unwrap();
        let comm = communicator(&dir);

        let mut sweeper = Sweeper::new(comm.clone(), slow().with_reconcile_on_start(false));
        let mut events = sweeper.subscribe();
        let commands = sweeper.command_sender();
        commands
            .send(SweeperCommand::Submit(Connection::new("s", "nowhere", 1, "hi")))
            .await
            .unwrap();
        commands.send(SweeperCommand::Shutdown).await.unwrap();

        sweeper.run().await.unwrap();

        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SweeperEvent::Error { .. })));
        assert_eq!(comm.received(crate::storage::CancelToken::new()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let dir = TempDir::new().unwrap();
        let mut sweeper = Sweeper::new(communicator(&dir), slow().with_reconcile_on_start(false));
        sweeper
            .command_sender()
            .send(SweeperCommand::Shutdown)
            .await
            .unwrap();

        sweeper.run().await.unwrap();
        assert!(matches!(sweeper.run().await, Err(RelayError::Config(_))));
    }
}
