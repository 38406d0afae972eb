//! Sweeper daemon
//!
//! Long-running process that keeps the current log caught up with the
//! desired log.
//!
//! # Event Loop
//!
//! 1. **Boot**: reconcile once, so work left over from a previous run is retried
//! 2. **Tick**: reconcile every `interval`
//! 3. **Commands**: reconcile now, submit a connection, change the interval, shut down
//!
//! Callers observe progress through a broadcast [`SweeperEvent`] stream and
//! drive the daemon through an mpsc [`SweeperCommand`] channel.
//!
//! # Example
//!
//! ```ignore
//! use linkrelay::sweeper::{Sweeper, SweeperConfig};
//!
//! let mut sweeper = Sweeper::new(communicator, SweeperConfig::default());
//! let mut events = sweeper.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//! sweeper.run().await?;
//! ```

mod daemon;
pub mod metrics;

pub use daemon::{
    Sweeper, SweeperCommand, SweeperConfig, SweeperEvent, SweeperStats, DEFAULT_INTERVAL,
};
