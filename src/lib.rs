//! # servicehub
//!
//! Host-resident script supervisor.
//!
//! Runs named groups of start/stop command chains, probes a subset of them
//! for liveness, restarts unhealthy groups, and keeps one guardian copy of
//! its own binary alive, identified by content digest. All components log
//! through a rotating, self-cleaning file sink.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use servicehub::{config, LogSink, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = config::load();
//! let sink = LogSink::new(hub.logging.file.clone());
//! let supervisor = Supervisor::new(hub, sink, false);
//! supervisor.start();
//! tokio::signal::ctrl_c().await.ok();
//! supervisor.stop().await;
//! # }
//! ```

pub mod chain;
pub mod clock;
pub mod config;
pub mod group;
pub mod health;
pub mod sink;
pub mod supervisor;
pub mod watchdog;

pub use config::{CommandSpec, Direction, FileLogConfig, GroupConfig, HubConfig};
pub use group::GroupSupervisor;
pub use health::HealthDaemon;
pub use sink::{LogLevel, LogSink, Logger};
pub use supervisor::Supervisor;
