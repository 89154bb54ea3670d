use servicehub::{config, watchdog, LogSink, Supervisor};

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let is_daemon = args.len() == 1 && args[0] == watchdog::DAEMON_SENTINEL;

	// Before anything else: bail out if this binary is already over-spawned.
	watchdog::enforce_startup_limit();

	tracing_subscriber::fmt().init();

	let hub = config::load();
	tracing::info!(
		"servicehub started (pid {}, {} groups, daemon: {})",
		std::process::id(),
		hub.groups.len(),
		is_daemon
	);

	let sink = LogSink::new(hub.logging.file.clone());
	let supervisor = Supervisor::new(hub, sink, is_daemon);
	supervisor.start();

	let _ = tokio::signal::ctrl_c().await;
	tracing::info!("shutting down");
	supervisor.stop().await;

	// Give the sink consumers a moment to drain their queues.
	tokio::time::sleep(std::time::Duration::from_millis(300)).await;
}
