//! Per-group orchestration: which chain runs, in which order, and whether a
//! health daemon watches the result.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chain;
use crate::config::{Direction, GroupConfig};
use crate::health::HealthDaemon;
use crate::sink::{LogSink, Logger};

pub struct GroupSupervisor {
	pub config: Arc<GroupConfig>,
	pub logger: Logger,
}

impl GroupSupervisor {
	pub fn new(config: GroupConfig, sink: &LogSink) -> Arc<Self> {
		let logger = sink.category(&format!("servicehub.{}", config.name));
		Arc::new(Self {
			config: Arc::new(config),
			logger,
		})
	}

	/// Runs this group's chains for one direction on a dedicated task.
	/// Start fan-out drops the handle; stop fan-out awaits it.
	pub fn launch(self: &Arc<Self>, direction: Direction, cancel: watch::Receiver<bool>) -> JoinHandle<()> {
		let group = Arc::clone(self);
		tokio::spawn(async move {
			group.run(direction, cancel).await;
		})
	}

	async fn run(&self, direction: Direction, cancel: watch::Receiver<bool>) {
		let cfg = &self.config;
		let verb = match direction {
			Direction::Start => "running",
			Direction::Stop => "stopping",
		};
		self.logger.info(1, format!("[{}] {}...", cfg.name, verb));

		// A start without a start chain is a configuration gap, not an error.
		// Stop invocations are not validated.
		if direction == Direction::Start && cfg.start.is_empty() {
			self.logger.info(1, format!("[{}] no start command configured", cfg.name));
			return;
		}

		if direction == Direction::Stop || cfg.stop_before_start {
			// The stop chain's outcome never blocks the start chain.
			let _ = chain::run_chain(
				&cfg.stop,
				&cfg.stop_dir,
				&cfg.name,
				Direction::Stop,
				&self.logger,
				cancel.clone(),
			)
			.await;
		}

		if direction == Direction::Start {
			let _ = chain::run_chain(
				&cfg.start,
				&cfg.start_dir,
				&cfg.name,
				Direction::Start,
				&self.logger,
				cancel,
			)
			.await;
		}
	}

	/// Launches the health daemon when the probe configuration asks for one.
	/// Independent of the chain task; never blocks on chain completion.
	pub fn spawn_health(self: &Arc<Self>, cancel: watch::Receiver<bool>) {
		if !self.config.probe.wants_daemon() {
			return;
		}
		let daemon = HealthDaemon::new(Arc::clone(&self.config), self.logger.clone());
		let group = Arc::clone(self);
		tokio::spawn(async move {
			daemon.run(group, cancel).await;
		});
	}

	/// Full stop-then-start sequence, used by the health daemon's restart
	/// decision. Both chain results are ignored; failures are already on
	/// the log.
	pub async fn restart(&self, cancel: watch::Receiver<bool>) {
		let cfg = &self.config;
		let _ = chain::run_chain(
			&cfg.stop,
			&cfg.stop_dir,
			&cfg.name,
			Direction::Stop,
			&self.logger,
			cancel.clone(),
		)
		.await;
		let _ = chain::run_chain(
			&cfg.start,
			&cfg.start_dir,
			&cfg.name,
			Direction::Start,
			&self.logger,
			cancel,
		)
		.await;
	}
}
