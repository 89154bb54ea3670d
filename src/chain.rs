//! Sequential, fail-fast command-chain execution.
//!
//! Steps run strictly in order; each step is fully resolved, including all
//! streamed output, before the next begins. Any standard-error line marks
//! the step as failed and the chain aborts after it. There is no exit-code
//! validation: success is inferred purely from the absence of stderr output.
//!
//! Cancellation is observed between streamed events only. An already
//! spawned child is deliberately left running; only the guardian-cleanup
//! path ever kills processes.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use crate::config::{CommandSpec, Direction};
use crate::sink::{LogLevel, Logger};

/// Runs every step of `steps` against `dir`, streaming output into
/// `logger`. Returns `Err` as soon as a step fails; later steps are never
/// spawned.
pub async fn run_chain(
	steps: &[CommandSpec],
	dir: &Path,
	group: &str,
	direction: Direction,
	logger: &Logger,
	cancel: watch::Receiver<bool>,
) -> Result<(), String> {
	for step in steps {
		if step.command.trim().is_empty() {
			logger.error(1, format!("[{}-{}] Command is empty", group, direction));
			continue;
		}
		run_step(step, dir, group, direction, logger, cancel.clone()).await?;
	}
	Ok(())
}

async fn run_step(
	step: &CommandSpec,
	dir: &Path,
	group: &str,
	direction: Direction,
	logger: &Logger,
	mut cancel: watch::Receiver<bool>,
) -> Result<(), String> {
	let tag = format!("[{}-{}]", group, direction);
	let exe = dir.join(step.command.trim());

	let mut command = Command::new(&exe);
	command
		.args(split_args(&step.args))
		.current_dir(dir)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped());

	let mut child = match command.spawn() {
		Ok(child) => child,
		Err(e) => {
			logger.log_err(
				LogLevel::Error,
				1,
				format!("{} {}: {}", tag, exe.display(), e),
				&e,
			);
			return Err(format!("{} spawn failed", tag));
		}
	};

	logger.info(1, format!("{} ProcessId: {}", tag, child.id().unwrap_or(0)));

	// stderr drains on its own task so a chatty step can't deadlock the
	// pipes; any line it sees fails the step.
	let stderr_seen = child.stderr.take().map(|stderr| {
		let logger = logger.clone();
		let tag = tag.clone();
		let mut cancel = cancel.clone();
		tokio::spawn(async move {
			let mut lines = BufReader::new(stderr).lines();
			let mut seen = false;
			loop {
				tokio::select! {
					line = lines.next_line() => match line {
						Ok(Some(line)) => {
							logger.error(1, format!("{} Output: {}", tag, line));
							seen = true;
						}
						Ok(None) => break,
						Err(_) => break,
					},
					_ = cancel.changed() => break,
				}
			}
			seen
		})
	});

	let mut cancelled = false;
	if let Some(stdout) = child.stdout.take() {
		let mut lines = BufReader::new(stdout).lines();
		loop {
			tokio::select! {
				line = lines.next_line() => match line {
					Ok(Some(line)) => logger.info(1, format!("{} Output: {}", tag, line)),
					Ok(None) => break,
					Err(e) => {
						logger.error(1, format!("{} stream fault: {}", tag, e));
						return Err(format!("{} stream fault", tag));
					}
				},
				_ = cancel.changed() => {
					cancelled = true;
					break;
				}
			}
		}
	}

	let mut failed = match stderr_seen {
		Some(handle) => handle.await.unwrap_or(false),
		None => false,
	};

	if cancelled {
		// The child stays alive; cancellation only stops the streaming.
		logger.error(1, format!("{} cancelled", tag));
		return Err(format!("{} cancelled", tag));
	}

	match child.wait().await {
		Ok(status) => {
			logger.info(1, format!("{} ExitCode: {}", tag, status.code().unwrap_or(-1)));
		}
		Err(e) => {
			logger.error(1, format!("{} {}", tag, e));
			failed = true;
		}
	}

	if failed {
		Err(format!("{} step reported errors", tag))
	} else {
		Ok(())
	}
}

fn split_args(args: &str) -> Vec<String> {
	if args.trim().is_empty() {
		return Vec::new();
	}
	shlex::split(args).unwrap_or_else(|| args.split_whitespace().map(str::to_string).collect())
}
