//! Rotating file log sink.
//!
//! Every category gets its own unbounded queue and a single consumer task,
//! so enqueue order equals write order within a category. The file write
//! itself is additionally serialized by a cross-process lock under the log
//! root, so a primary instance and its guardian copies never interleave
//! writes to the same file.
//!
//! Files live at `<root>/<yyyy>/<MM>/<dd>/<HH>.<Level>.log` and rotate to
//! `<HH>.<Level>.<NN>.log` once they exceed the configured size. A retention
//! sweep runs after every write and deletes anything older than the
//! retention window. Per-record failures are swallowed; a logging fault must
//! never take a producer down.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::sync::mpsc;

use crate::clock::{self, Stamp};
use crate::config::FileLogConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl std::fmt::Display for LogLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			LogLevel::Trace => "Trace",
			LogLevel::Debug => "Debug",
			LogLevel::Info => "Info",
			LogLevel::Warn => "Warn",
			LogLevel::Error => "Error",
		};
		write!(f, "{}", name)
	}
}

/// An error and its `source()` chain, captured as owned text at enqueue
/// time. The outermost message is first; only the outermost type is known,
/// inner frames are reached through `dyn Error` and carry message text only.
#[derive(Debug, Clone)]
pub struct ErrorChain {
	pub type_name: &'static str,
	pub frames: Vec<String>,
}

impl ErrorChain {
	pub fn capture<E: std::error::Error + 'static>(error: &E) -> Self {
		let mut frames = vec![error.to_string()];
		let mut source = error.source();
		while let Some(inner) = source {
			frames.push(inner.to_string());
			source = inner.source();
		}
		Self {
			type_name: std::any::type_name::<E>(),
			frames,
		}
	}

	/// Number of nested inner errors below the outermost one.
	pub fn depth(&self) -> usize {
		self.frames.len().saturating_sub(1)
	}
}

#[derive(Debug, Clone)]
pub struct LogRecord {
	pub level: LogLevel,
	pub event_id: u32,
	pub message: String,
	pub error: Option<ErrorChain>,
	pub stamp: Stamp,
	pub thread: u64,
}

/// Cheap handle for one category. Producers construct and enqueue records;
/// the sink owns them from there to disk.
#[derive(Clone)]
pub struct Logger {
	category: Arc<str>,
	tx: mpsc::UnboundedSender<LogRecord>,
}

impl Logger {
	pub fn category(&self) -> &str {
		&self.category
	}

	pub fn log(&self, level: LogLevel, event_id: u32, message: impl Into<String>) {
		self.send(level, event_id, message.into(), None);
	}

	pub fn log_err<E: std::error::Error + 'static>(
		&self,
		level: LogLevel,
		event_id: u32,
		message: impl Into<String>,
		error: &E,
	) {
		self.send(level, event_id, message.into(), Some(ErrorChain::capture(error)));
	}

	pub fn info(&self, event_id: u32, message: impl Into<String>) {
		self.log(LogLevel::Info, event_id, message);
	}

	pub fn warn(&self, event_id: u32, message: impl Into<String>) {
		self.log(LogLevel::Warn, event_id, message);
	}

	pub fn error(&self, event_id: u32, message: impl Into<String>) {
		self.log(LogLevel::Error, event_id, message);
	}

	fn send(&self, level: LogLevel, event_id: u32, message: String, error: Option<ErrorChain>) {
		let _ = self.tx.send(LogRecord {
			level,
			event_id,
			message,
			error,
			stamp: Stamp::now(),
			thread: thread_ordinal(),
		});
	}
}

/// The sink proper. One configuration shared by all categories; each
/// category gets its own queue and consumer.
#[derive(Clone)]
pub struct LogSink {
	inner: Arc<SinkInner>,
}

struct SinkInner {
	config: Arc<FileLogConfig>,
	format: Arc<TitleFormat>,
	loggers: Mutex<HashMap<String, Logger>>,
}

impl LogSink {
	pub fn new(config: FileLogConfig) -> Self {
		let format = Arc::new(TitleFormat::new(&config.formatter));
		Self {
			inner: Arc::new(SinkInner {
				config: Arc::new(config),
				format,
				loggers: Mutex::new(HashMap::new()),
			}),
		}
	}

	pub fn config(&self) -> &FileLogConfig {
		&self.inner.config
	}

	/// Returns the logger for a category, spawning its consumer task on
	/// first use. Must be called from within a tokio runtime.
	pub fn category(&self, name: &str) -> Logger {
		let mut loggers = self.inner.loggers.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(logger) = loggers.get(name) {
			return logger.clone();
		}

		let (tx, rx) = mpsc::unbounded_channel();
		let logger = Logger { category: Arc::from(name), tx };
		loggers.insert(name.to_string(), logger.clone());

		let config = Arc::clone(&self.inner.config);
		let format = Arc::clone(&self.inner.format);
		let category = name.to_string();
		tokio::spawn(async move {
			drain(config, format, category, rx).await;
		});

		logger
	}
}

async fn drain(
	config: Arc<FileLogConfig>,
	format: Arc<TitleFormat>,
	category: String,
	mut rx: mpsc::UnboundedReceiver<LogRecord>,
) {
	while let Some(record) = rx.recv().await {
		// A failed write drops this record only.
		let _ = write_record(&config, &format, &category, &record);
	}
}

fn write_record(
	config: &FileLogConfig,
	format: &TitleFormat,
	category: &str,
	record: &LogRecord,
) -> std::io::Result<()> {
	if !config.enable {
		return Ok(());
	}

	let root = config.root();
	let dir = root
		.join(format!("{:04}", record.stamp.year))
		.join(format!("{:02}", record.stamp.month))
		.join(format!("{:02}", record.stamp.day));
	fs::create_dir_all(&dir)?;

	let guard = lock_exclusive(&root);

	let file_path = dir.join(format!("{:02}.{}.log", record.stamp.hour, record.level));
	let mut is_new = !file_path.exists();
	if !is_new {
		is_new = rotate_if_oversized(
			&dir,
			&file_path,
			record.stamp.hour,
			record.level,
			config.threshold_bytes(),
		)?;
	}

	let mut file = OpenOptions::new().create(true).append(true).open(&file_path)?;
	if is_new {
		writeln!(file, "{}", format.title())?;
	} else if let Some(split) = &config.split_line {
		writeln!(file, "{}", split)?;
	}
	writeln!(file, "{}", format.header(category, record))?;
	writeln!(file, "{}", record.message)?;
	if let Some(chain) = &record.error {
		write_error_chain(&mut file, chain)?;
	}

	// The lock covers one record's file write only; the sweep is
	// best-effort and runs unlocked.
	drop(file);
	drop(guard);

	if config.auto_recovery {
		retention_sweep(&root, config.retention_days);
	}
	Ok(())
}

/// Renames an oversized hour/level file to the next unused sequence number.
/// Returns true when a fresh file should be started (title-line path).
fn rotate_if_oversized(
	dir: &Path,
	file_path: &Path,
	hour: u32,
	level: LogLevel,
	threshold: u64,
) -> std::io::Result<bool> {
	if fs::metadata(file_path)?.len() <= threshold {
		return Ok(false);
	}
	let seq = next_rotation_seq(dir, hour, level);
	let rotated = dir.join(format!("{:02}.{}.{:02}.log", hour, level, seq));
	fs::rename(file_path, rotated)?;
	Ok(true)
}

pub fn next_rotation_seq(dir: &Path, hour: u32, level: LogLevel) -> u32 {
	let pattern = format!(r"^{:02}\.{}\.(\d+)\.log$", hour, level);
	let re = match Regex::new(&pattern) {
		Ok(re) => re,
		Err(_) => return 1,
	};
	let mut max = 0;
	if let Ok(entries) = fs::read_dir(dir) {
		for entry in entries.flatten() {
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			if let Some(caps) = re.captures(name) {
				if let Ok(n) = caps[1].parse::<u32>() {
					max = max.max(n);
				}
			}
		}
	}
	max + 1
}

fn write_error_chain(file: &mut fs::File, chain: &ErrorChain) -> std::io::Result<()> {
	let mut frames = chain.frames.iter();
	if let Some(outer) = frames.next() {
		writeln!(file, "Type: {}", chain.type_name)?;
		writeln!(file, "Msg: {}", outer)?;
	}
	for (depth, frame) in frames.enumerate() {
		let tabs = "\t".repeat(depth + 1);
		writeln!(file, "{}InnerError:", tabs)?;
		writeln!(file, "{}\tMsg: {}", tabs, frame)?;
	}
	Ok(())
}

/// Best-effort age-based cleanup under the log root. `days == 0` disables it.
pub fn retention_sweep(root: &Path, days: u32) {
	if days == 0 {
		return;
	}
	let cutoff = SystemTime::now() - Duration::from_secs(days as u64 * 86400);
	sweep_older_than(root, cutoff);
}

/// Deletes entries created before `cutoff`. A stale directory is removed
/// with its contents; a fresh one is recursed into regardless of what it
/// holds. Dotfiles (the lock file) are left alone. All failures are ignored.
pub fn sweep_older_than(dir: &Path, cutoff: SystemTime) {
	let Ok(entries) = fs::read_dir(dir) else { return };
	for entry in entries.flatten() {
		let path = entry.path();
		if entry
			.file_name()
			.to_str()
			.map(|n| n.starts_with('.'))
			.unwrap_or(false)
		{
			continue;
		}
		let created = entry
			.metadata()
			.ok()
			.and_then(|m| m.created().or_else(|_| m.modified()).ok());
		let stale = created.map(|t| t < cutoff).unwrap_or(false);
		if path.is_dir() {
			if stale {
				let _ = fs::remove_dir_all(&path);
			} else {
				sweep_older_than(&path, cutoff);
			}
		} else if stale {
			let _ = fs::remove_file(&path);
		}
	}
}

#[cfg(unix)]
fn lock_exclusive(root: &Path) -> Option<nix::fcntl::Flock<fs::File>> {
	use nix::fcntl::{Flock, FlockArg};
	let file = OpenOptions::new()
		.create(true)
		.write(true)
		.open(root.join(".servicehub.lock"))
		.ok()?;
	Flock::lock(file, FlockArg::LockExclusive).ok()
}

#[cfg(not(unix))]
fn lock_exclusive(_root: &Path) -> Option<()> {
	// The per-category single consumer is the only serialization here.
	None
}

/// Title/header template with `{DateTime[:fmt]}`, `{Category}`, `{LogLevel}`,
/// `{EventId}` and `{ThreadId}` placeholders.
pub struct TitleFormat {
	template: String,
	re: Regex,
}

impl TitleFormat {
	pub fn new(template: &str) -> Self {
		Self {
			template: template.to_string(),
			re: Regex::new(r"\{([^{}:]+)(?::([^{}]+))?\}").unwrap(),
		}
	}

	/// The template with each placeholder collapsed to its bare name, used
	/// as the first line of every fresh file.
	pub fn title(&self) -> String {
		self.re
			.replace_all(&self.template, |caps: &regex::Captures| caps[1].to_string())
			.into_owned()
	}

	pub fn header(&self, category: &str, record: &LogRecord) -> String {
		self.re
			.replace_all(&self.template, |caps: &regex::Captures| {
				match caps[1].to_ascii_uppercase().as_str() {
					"DATETIME" => {
						let pattern = caps
							.get(2)
							.map(|m| m.as_str())
							.unwrap_or("yyyy-MM-dd HH:mm:ss.fff");
						clock::format(pattern, record.stamp)
					}
					"CATEGORY" => category.to_string(),
					"LOGLEVEL" => record.level.to_string(),
					"EVENTID" => record.event_id.to_string(),
					"THREADID" => record.thread.to_string(),
					_ => caps[1].to_string(),
				}
			})
			.into_owned()
	}
}

fn thread_ordinal() -> u64 {
	static NEXT: AtomicU64 = AtomicU64::new(1);
	thread_local! {
		static ORDINAL: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
	}
	ORDINAL.with(|id| *id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::Stamp;

	fn record(level: LogLevel, message: &str) -> LogRecord {
		LogRecord {
			level,
			event_id: 1,
			message: message.to_string(),
			error: None,
			stamp: Stamp::from_epoch_millis(1_771_027_200_000),
			thread: 7,
		}
	}

	#[test]
	fn title_strips_placeholders_to_names() {
		let fmt = TitleFormat::new("[{Category}] {DateTime:yyyy-MM-dd} {LogLevel} {EventId} {ThreadId}");
		assert_eq!(fmt.title(), "[Category] DateTime LogLevel EventId ThreadId");
	}

	#[test]
	fn header_substitutes_placeholders() {
		let fmt = TitleFormat::new("[{Category}] {DateTime:yyyy-MM-dd HH:mm} {LogLevel} {EventId} {ThreadId}");
		let header = fmt.header("servicehub.web", &record(LogLevel::Error, "x"));
		assert_eq!(header, "[servicehub.web] 2026-02-14 00:00 Error 1 7");
	}

	#[test]
	fn header_leaves_unknown_placeholders_as_names() {
		let fmt = TitleFormat::new("{Nope} {LogLevel}");
		let header = fmt.header("c", &record(LogLevel::Info, "x"));
		assert_eq!(header, "Nope Info");
	}

	#[test]
	fn error_chain_capture_walks_sources() {
		#[derive(Debug)]
		struct Wrap(&'static str, Option<Box<Wrap>>);
		impl std::fmt::Display for Wrap {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0)
			}
		}
		impl std::error::Error for Wrap {
			fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
				self.1.as_deref().map(|w| w as &(dyn std::error::Error + 'static))
			}
		}

		let err = Wrap("outer", Some(Box::new(Wrap("mid", Some(Box::new(Wrap("inner", None)))))));
		let chain = ErrorChain::capture(&err);
		assert_eq!(chain.frames, vec!["outer", "mid", "inner"]);
		assert_eq!(chain.depth(), 2);
		assert!(chain.type_name.ends_with("Wrap"));
	}

	#[test]
	fn next_seq_counts_existing_rotations() {
		let dir = std::env::temp_dir().join("servicehub-sink-seq-test");
		let _ = fs::remove_dir_all(&dir);
		fs::create_dir_all(&dir).unwrap();
		assert_eq!(next_rotation_seq(&dir, 14, LogLevel::Info), 1);
		fs::write(dir.join("14.Info.01.log"), "x").unwrap();
		fs::write(dir.join("14.Info.02.log"), "x").unwrap();
		fs::write(dir.join("14.Error.05.log"), "x").unwrap();
		assert_eq!(next_rotation_seq(&dir, 14, LogLevel::Info), 3);
		assert_eq!(next_rotation_seq(&dir, 14, LogLevel::Error), 6);
		let _ = fs::remove_dir_all(&dir);
	}
}
