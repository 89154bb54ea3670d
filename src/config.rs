use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which half of a group's command set an operation acts on.
///
/// Passed by value through every chain operation; a step never carries its
/// own direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Start,
	Stop,
}

impl std::fmt::Display for Direction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Direction::Start => write!(f, "Start"),
			Direction::Stop => write!(f, "Stop"),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
	/// Service-state watchdog poll interval in seconds. Values below 1
	/// disable the loop permanently.
	#[serde(default = "default_daemon_interval")]
	pub daemon: i64,
	#[serde(default)]
	pub logging: LoggingConfig,
	#[serde(default, rename = "group")]
	pub groups: Vec<GroupConfig>,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			daemon: default_daemon_interval(),
			logging: LoggingConfig::default(),
			groups: Vec::new(),
		}
	}
}

fn default_daemon_interval() -> i64 {
	3
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
	#[serde(default)]
	pub file: FileLogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileLogConfig {
	#[serde(default = "default_true")]
	pub enable: bool,
	/// Rotation threshold in KB. Zero falls back to the default.
	#[serde(default = "default_size_kb")]
	pub size_kb: u64,
	#[serde(default = "default_formatter")]
	pub formatter: String,
	#[serde(default = "default_split_line")]
	pub split_line: Option<String>,
	/// Log root, resolved against the binary's directory when relative.
	#[serde(default = "default_log_path")]
	pub path: PathBuf,
	#[serde(default = "default_true")]
	pub auto_recovery: bool,
	#[serde(default = "default_retention_days")]
	pub retention_days: u32,
}

impl Default for FileLogConfig {
	fn default() -> Self {
		Self {
			enable: true,
			size_kb: default_size_kb(),
			formatter: default_formatter(),
			split_line: default_split_line(),
			path: default_log_path(),
			auto_recovery: true,
			retention_days: default_retention_days(),
		}
	}
}

impl FileLogConfig {
	pub fn threshold_bytes(&self) -> u64 {
		let kb = if self.size_kb == 0 { default_size_kb() } else { self.size_kb };
		kb * 1024
	}

	pub fn root(&self) -> PathBuf {
		if self.path.is_absolute() {
			return self.path.clone();
		}
		let base = std::env::current_exe()
			.ok()
			.and_then(|exe| exe.parent().map(Path::to_path_buf))
			.unwrap_or_else(|| PathBuf::from("."));
		base.join(&self.path)
	}
}

fn default_true() -> bool {
	true
}
fn default_size_kb() -> u64 {
	512
}
fn default_formatter() -> String {
	"[{Category}] {DateTime:yyyy-MM-dd HH:mm:ss.fff} {LogLevel} {EventId} {ThreadId}".to_string()
}
fn default_split_line() -> Option<String> {
	Some("-".repeat(120))
}
fn default_log_path() -> PathBuf {
	PathBuf::from("logs")
}
fn default_retention_days() -> u32 {
	7
}

/// One supervised unit. Immutable after load; a disabled group is never
/// executed in either direction.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
	pub name: String,
	#[serde(default)]
	pub enable: bool,
	#[serde(default = "default_dir")]
	pub start_dir: PathBuf,
	#[serde(default = "default_dir")]
	pub stop_dir: PathBuf,
	/// Run the stop chain before the start chain on a start invocation.
	#[serde(default)]
	pub stop_before_start: bool,
	#[serde(default)]
	pub start: Vec<CommandSpec>,
	#[serde(default)]
	pub stop: Vec<CommandSpec>,
	#[serde(default)]
	pub probe: ProbeConfig,
}

fn default_dir() -> PathBuf {
	PathBuf::from(".")
}

/// One step in a chain. The executable path is resolved against the chain's
/// working directory; the argument string is split shell-style.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
	#[serde(default)]
	pub command: String,
	#[serde(default)]
	pub args: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
	#[serde(default)]
	pub enable: bool,
	/// Marker scanned for (case-insensitively) in probe stdout.
	#[serde(default)]
	pub expect: String,
	#[serde(default = "default_dir")]
	pub dir: PathBuf,
	/// Probe interval in seconds. Values below 1 close the daemon.
	#[serde(default)]
	pub interval: i64,
	#[serde(default)]
	pub commands: Vec<CommandSpec>,
}

impl Default for ProbeConfig {
	fn default() -> Self {
		Self {
			enable: false,
			expect: String::new(),
			dir: default_dir(),
			interval: 0,
			commands: Vec::new(),
		}
	}
}

impl ProbeConfig {
	/// A health daemon is only worth launching with a marker to look for
	/// and at least one probe command.
	pub fn wants_daemon(&self) -> bool {
		self.enable && !self.expect.trim().is_empty() && !self.commands.is_empty()
	}
}

pub fn parse(content: &str) -> Result<HubConfig, toml::de::Error> {
	toml::from_str(content)
}

/// Loads `servicehub.toml` from beside the binary, falling back to the
/// working directory, then to built-in defaults.
pub fn load() -> HubConfig {
	for path in candidate_paths() {
		if !path.exists() {
			continue;
		}
		match std::fs::read_to_string(&path) {
			Ok(content) => match parse(&content) {
				Ok(config) => return config,
				Err(e) => eprintln!("warning: failed to parse {}: {}", path.display(), e),
			},
			Err(e) => eprintln!("warning: failed to read {}: {}", path.display(), e),
		}
	}
	HubConfig::default()
}

fn candidate_paths() -> Vec<PathBuf> {
	let mut paths = Vec::new();
	if let Ok(exe) = std::env::current_exe() {
		if let Some(dir) = exe.parent() {
			paths.push(dir.join("servicehub.toml"));
		}
	}
	paths.push(PathBuf::from("servicehub.toml"));
	paths
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_toml_uses_defaults() {
		let config = parse("").unwrap();
		assert_eq!(config.daemon, 3);
		assert!(config.groups.is_empty());
		assert!(config.logging.file.enable);
		assert_eq!(config.logging.file.size_kb, 512);
		assert_eq!(config.logging.file.retention_days, 7);
		assert!(config.logging.file.auto_recovery);
	}

	#[test]
	fn zero_size_falls_back_to_default_threshold() {
		let config = parse("[logging.file]\nsize_kb = 0\n").unwrap();
		assert_eq!(config.logging.file.threshold_bytes(), 512 * 1024);
	}

	#[test]
	fn full_group_parses() {
		let toml = r#"
daemon = 5

[logging.file]
size_kb = 64
retention_days = 3

[[group]]
name = "web"
enable = true
start_dir = "/srv/web"
stop_before_start = true
start = [{ command = "run.sh", args = "--port 8080" }]
stop = [{ command = "halt.sh" }]

[group.probe]
enable = true
expect = "ALIVE"
interval = 5
commands = [{ command = "status.sh" }]
"#;
		let config = parse(toml).unwrap();
		assert_eq!(config.daemon, 5);
		assert_eq!(config.groups.len(), 1);
		let group = &config.groups[0];
		assert!(group.enable);
		assert!(group.stop_before_start);
		assert_eq!(group.start[0].args, "--port 8080");
		assert_eq!(group.stop[0].args, "");
		assert!(group.probe.wants_daemon());
	}

	#[test]
	fn probe_without_marker_never_wants_daemon() {
		let toml = r#"
[[group]]
name = "a"
[group.probe]
enable = true
interval = 5
commands = [{ command = "status.sh" }]
"#;
		let config = parse(toml).unwrap();
		assert!(!config.groups[0].probe.wants_daemon());
	}

	#[test]
	fn direction_display() {
		assert_eq!(Direction::Start.to_string(), "Start");
		assert_eq!(Direction::Stop.to_string(), "Stop");
	}
}
