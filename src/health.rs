//! Per-group health daemon.
//!
//! After a warmup grace period the daemon probes the group on a fixed
//! interval, scanning probe stdout case-insensitively for the expected
//! marker. An unhealthy cycle triggers the group's stop-then-start sequence
//! on its own task, bounded by a wait the daemon does not insist on. No
//! cycle error is fatal; the loop always reaches its next delay.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;

use crate::config::{CommandSpec, GroupConfig};
use crate::group::GroupSupervisor;
use crate::sink::{LogLevel, Logger};

/// Grace period before the first probe, letting a freshly started service
/// settle.
pub const WARMUP: Duration = Duration::from_secs(60);

/// How long a triggered restart is waited on before the daemon moves on.
pub const RESTART_WAIT: Duration = Duration::from_secs(30);

enum CycleFault {
	/// Blank probe command on a platform with no shell fallback. Terminal.
	Unsupported,
	Io(std::io::Error),
}

pub struct HealthDaemon {
	config: Arc<GroupConfig>,
	logger: Logger,
	warmup: Duration,
}

impl HealthDaemon {
	pub fn new(config: Arc<GroupConfig>, logger: Logger) -> Self {
		Self {
			config,
			logger,
			warmup: WARMUP,
		}
	}

	/// Shortened warmup for tests and fast-settling groups.
	pub fn with_warmup(mut self, warmup: Duration) -> Self {
		self.warmup = warmup;
		self
	}

	pub async fn run(self, group: Arc<GroupSupervisor>, mut cancel: watch::Receiver<bool>) {
		let name = &self.config.name;

		tokio::select! {
			_ = tokio::time::sleep(self.warmup) => {}
			_ = cancel.changed() => return,
		}

		let interval = self.config.probe.interval;
		if interval < 1 {
			self.logger.info(1, format!("[{}] health daemon closed", name));
			return;
		}
		let interval = Duration::from_secs(interval as u64);

		loop {
			match self.probe_cycle().await {
				Ok(true) => {
					self.logger.info(1, format!("[{}] Healthy true", name));
				}
				Ok(false) => {
					self.logger.error(1, format!("[{}] Healthy false, Restarting...", name));
					let target = Arc::clone(&group);
					let restart_cancel = cancel.clone();
					let handle = tokio::spawn(async move {
						target.restart(restart_cancel).await;
					});
					// Whether or not the restart lands in time, the next
					// cycle still runs.
					let _ = tokio::time::timeout(RESTART_WAIT, handle).await;
				}
				Err(CycleFault::Unsupported) => {
					self.logger.error(1, format!("[{}] probe shell fallback: platform not supported", name));
					return;
				}
				Err(CycleFault::Io(e)) => {
					self.logger.log_err(LogLevel::Error, 1, format!("[{}] probe cycle failed", name), &e);
				}
			}

			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = cancel.changed() => return,
			}
		}
	}

	/// One pass over the probe commands. The first marker hit
	/// short-circuits the rest of the cycle.
	async fn probe_cycle(&self) -> Result<bool, CycleFault> {
		let probe = &self.config.probe;
		for step in &probe.commands {
			let output = run_probe(step, &probe.dir).await?;
			let text = String::from_utf8_lossy(&output);
			if output_matches(&probe.expect, &text) {
				return Ok(true);
			}
		}
		Ok(false)
	}
}

async fn run_probe(step: &CommandSpec, dir: &Path) -> Result<Vec<u8>, CycleFault> {
	let mut command = if step.command.trim().is_empty() {
		shell_probe(step)?
	} else {
		let mut command = Command::new(dir.join(step.command.trim()));
		command.args(split_probe_args(&step.args));
		command
	};
	let output = command
		.current_dir(dir)
		.stdin(Stdio::null())
		.stderr(Stdio::null())
		.output()
		.await
		.map_err(CycleFault::Io)?;
	Ok(output.stdout)
}

#[cfg(windows)]
fn shell_probe(step: &CommandSpec) -> Result<Command, CycleFault> {
	let mut command = Command::new("cmd");
	command.arg("/c").arg(&step.args);
	Ok(command)
}

#[cfg(not(windows))]
fn shell_probe(_step: &CommandSpec) -> Result<Command, CycleFault> {
	Err(CycleFault::Unsupported)
}

fn split_probe_args(args: &str) -> Vec<String> {
	if args.trim().is_empty() {
		return Vec::new();
	}
	shlex::split(args).unwrap_or_else(|| args.split_whitespace().map(str::to_string).collect())
}

/// Case-insensitive substring scan of probe output for the expected marker.
pub fn output_matches(expect: &str, text: &str) -> bool {
	let expect = expect.trim();
	if expect.is_empty() {
		return false;
	}
	text.to_lowercase().contains(&expect.to_lowercase())
}
