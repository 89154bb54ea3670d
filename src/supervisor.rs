//! Top-level supervisor: fans start/stop out across every enabled group and
//! owns the self-watchdog lifecycle.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{Direction, HubConfig};
use crate::group::GroupSupervisor;
use crate::sink::LogSink;
use crate::watchdog;

pub struct Supervisor {
	pub sink: LogSink,
	pub config: HubConfig,
	groups: Vec<Arc<GroupSupervisor>>,
	is_daemon: bool,
	cancel_tx: watch::Sender<bool>,
	cancel: watch::Receiver<bool>,
}

impl Supervisor {
	/// Must be called from within a tokio runtime; building a group binds
	/// its log category and consumer.
	pub fn new(config: HubConfig, sink: LogSink, is_daemon: bool) -> Self {
		let (cancel_tx, cancel) = watch::channel(false);
		let groups = config
			.groups
			.iter()
			.filter(|g| g.enable)
			.map(|g| GroupSupervisor::new(g.clone(), &sink))
			.collect();
		Self {
			sink,
			config,
			groups,
			is_daemon,
			cancel_tx,
			cancel,
		}
	}

	pub fn cancel_token(&self) -> watch::Receiver<bool> {
		self.cancel.clone()
	}

	/// Fans start out across all enabled groups concurrently and starts the
	/// watchdog loop. A daemon instance skips group duties entirely and
	/// only re-enters the watchdog.
	pub fn start(&self) {
		let hub = self.sink.category("servicehub");

		if !self.is_daemon {
			hub.info(1, format!("Config {}", self.config.groups.len()));
			for group in &self.config.groups {
				if !group.enable {
					self.sink
						.category(&format!("servicehub.{}", group.name))
						.info(1, format!("[{}] disable", group.name));
				}
			}
			for group in &self.groups {
				// Handles are dropped: groups start concurrently and are
				// never awaited on the start path.
				let _ = group.launch(Direction::Start, self.cancel.clone());
				group.spawn_health(self.cancel.clone());
			}
		}

		let watchdog_logger = self.sink.category("servicehub.watchdog");
		let interval = self.config.daemon;
		let cancel = self.cancel.clone();
		tokio::spawn(async move {
			watchdog::service_state_loop(interval, watchdog_logger, cancel).await;
		});
	}

	/// Cancels all daemon loops, cleans up guardian copies, then runs every
	/// group's stop chain concurrently and awaits them collectively.
	pub async fn stop(&self) {
		let _ = self.cancel_tx.send(true);

		if self.is_daemon {
			// Daemon copies do not kill guardians and never ran chains.
			return;
		}

		watchdog::kill_guardians(&self.sink.category("servicehub.watchdog"));

		// Stop chains get a fresh, never-fired token: host shutdown must
		// not cancel its own stop commands.
		let (stop_tx, stop_cancel) = watch::channel(false);
		let handles: Vec<_> = self
			.groups
			.iter()
			.map(|group| group.launch(Direction::Stop, stop_cancel.clone()))
			.collect();
		for handle in handles {
			let _ = handle.await;
		}
		drop(stop_tx);
	}
}
