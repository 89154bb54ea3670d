//! Self-guarding watchdog.
//!
//! Guardian processes are recognized by binary content, not by pid or name:
//! the whole-file SHA-256 of a candidate's executable image is compared to
//! this process's own digest, computed exactly once at startup. Pid and name
//! are not stable identifiers across restarts; file size or mtime would
//! admit false matches.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use sysinfo::System;
use tokio::sync::watch;

use crate::sink::{LogLevel, Logger};

/// Sole argument marking a spawned copy as a guardian/daemon instance. Any
/// other argv shape means "run as primary".
pub const DAEMON_SENTINEL: &str = "8a9f66d1-4b2e-4f6e-9c3a-2c8d1c5b7e90";

/// Hard ceiling on same-named processes, bounding runaway self-spawning if
/// the digest check ever fails to converge.
pub const MAX_SAME_NAMED: usize = 2;

/// Exit code of the startup self-limit check.
pub const EXIT_TOO_MANY: i32 = 86;

/// Platform service name used by the Windows service-state loop.
pub const SERVICE_NAME: &str = "servicehub";

/// Read-only identity of the running process, computed once at startup.
pub struct SelfIdentity {
	pub pid: u32,
	pub exe: PathBuf,
	pub digest: String,
}

impl SelfIdentity {
	fn current() -> std::io::Result<Self> {
		let exe = std::env::current_exe()?;
		let digest = digest_file(&exe)?;
		Ok(Self {
			pid: std::process::id(),
			exe,
			digest,
		})
	}
}

static IDENTITY: OnceLock<Option<SelfIdentity>> = OnceLock::new();

pub fn identity() -> Option<&'static SelfIdentity> {
	IDENTITY
		.get_or_init(|| SelfIdentity::current().ok())
		.as_ref()
}

/// Whole-file content digest, hex-encoded.
pub fn digest_file(path: &Path) -> std::io::Result<String> {
	use sha2::{Digest, Sha256};
	let mut file = std::fs::File::open(path)?;
	let mut hasher = Sha256::new();
	std::io::copy(&mut file, &mut hasher)?;
	Ok(hasher
		.finalize()
		.iter()
		.map(|b| format!("{:02x}", b))
		.collect())
}

/// Name pattern used for process-table scans. Linux reports process names
/// truncated to 15 bytes, so a longer binary name must be cut down or the
/// scan matches nothing, not even this process.
fn scan_name(me: &SelfIdentity) -> Option<OsString> {
	let name = me.exe.file_name()?;
	#[cfg(target_os = "linux")]
	{
		let text = name.to_string_lossy();
		if text.len() > 15 {
			let cut = (0..=15).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
			return Some(OsString::from(&text[..cut]));
		}
	}
	Some(name.to_os_string())
}

pub fn count_same_named() -> usize {
	let Some(me) = identity() else { return 1 };
	let Some(name) = scan_name(me) else { return 1 };
	let sys = System::new_all();
	sys.processes_by_name(&name).count()
}

/// Terminates the process when more copies of this binary are already
/// running than the ceiling allows. Runs before any other initialization.
pub fn enforce_startup_limit() {
	let running = count_same_named();
	if running > MAX_SAME_NAMED {
		eprintln!(
			"servicehub: {} same-named processes already running (limit {}), exiting",
			running, MAX_SAME_NAMED
		);
		std::process::exit(EXIT_TOO_MANY);
	}
}

/// Pids of running guardian copies: same binary name, same content digest,
/// not this process.
pub fn find_guardians() -> Vec<u32> {
	let Some(me) = identity() else { return Vec::new() };
	let Some(name) = scan_name(me) else { return Vec::new() };
	let sys = System::new_all();
	sys.processes_by_name(&name)
		.filter(|p| p.pid().as_u32() != me.pid)
		.filter(|p| {
			p.exe()
				.map(|exe| digest_file(exe).map(|d| d == me.digest).unwrap_or(false))
				.unwrap_or(false)
		})
		.map(|p| p.pid().as_u32())
		.collect()
}

/// Spawns one extra copy of this binary in daemon mode.
pub fn spawn_guardian(logger: &Logger) {
	let Some(me) = identity() else {
		logger.error(1, "guardian spawn skipped: self identity unavailable");
		return;
	};
	match std::process::Command::new(&me.exe)
		.arg(DAEMON_SENTINEL)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.spawn()
	{
		Ok(child) => logger.info(1, format!("guardian spawned (pid {})", child.id())),
		Err(e) => logger.log_err(LogLevel::Error, 1, "guardian spawn failed", &e),
	}
}

/// Kills every other same-digest process. Called on graceful stop of a
/// primary instance; daemon copies never call this.
pub fn kill_guardians(logger: &Logger) {
	let Some(me) = identity() else { return };
	let Some(name) = scan_name(me) else { return };
	let sys = System::new_all();
	for process in sys.processes_by_name(&name) {
		let pid = process.pid().as_u32();
		if pid == me.pid {
			continue;
		}
		let is_guardian = process
			.exe()
			.map(|exe| digest_file(exe).map(|d| d == me.digest).unwrap_or(false))
			.unwrap_or(false);
		if !is_guardian {
			continue;
		}
		if process.kill() {
			logger.info(1, format!("guardian terminated (pid {})", pid));
		} else {
			logger.error(1, format!("failed to terminate guardian (pid {})", pid));
		}
	}
}

/// Service-state loop: polls the platform service manager and keeps one
/// guardian copy alive while the service runs.
///
/// Only Windows provides the query mechanism used here; on other platforms
/// the loop logs once and disables itself permanently. This is a known
/// coverage gap kept as-is.
pub async fn service_state_loop(interval_secs: i64, logger: Logger, mut cancel: watch::Receiver<bool>) {
	if interval_secs < 1 {
		logger.info(1, "service watchdog disabled (interval < 1)");
		return;
	}

	#[cfg(not(windows))]
	{
		let _ = &mut cancel;
		logger.info(1, "service watchdog: platform not supported");
	}

	#[cfg(windows)]
	{
		let interval = std::time::Duration::from_secs(interval_secs as u64);
		loop {
			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = cancel.changed() => return,
			}
			match service_running() {
				Ok(true) => ensure_guardian(&logger),
				Ok(false) => request_service_start(&logger),
				Err(e) => logger.log_err(LogLevel::Error, 1, "service state query failed", &e),
			}
		}
	}
}

#[cfg(windows)]
fn service_running() -> std::io::Result<bool> {
	let output = std::process::Command::new("sc")
		.args(["query", SERVICE_NAME])
		.output()?;
	Ok(String::from_utf8_lossy(&output.stdout).contains("RUNNING"))
}

#[cfg(windows)]
fn request_service_start(logger: &Logger) {
	// Fire-and-forget; the next poll observes the result.
	match std::process::Command::new("sc")
		.args(["start", SERVICE_NAME])
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.spawn()
	{
		Ok(_) => logger.warn(1, "service not running, start requested"),
		Err(e) => logger.log_err(LogLevel::Error, 1, "service start request failed", &e),
	}
}

#[cfg(windows)]
fn ensure_guardian(logger: &Logger) {
	if find_guardians().is_empty() {
		spawn_guardian(logger);
	}
}
