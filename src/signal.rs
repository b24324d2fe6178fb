//! Termination signals for graceful shutdown

use crate::logging::*;

/// Wait for SIGINT or SIGTERM; returns the signal name
#[cfg(unix)]
pub async fn wait_for_termination() -> &'static str {
	use tokio::signal::unix::{signal, SignalKind};

	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(stream) => stream,
		Err(e) => {
			warn!("Failed to setup SIGTERM handler: {}. Only Ctrl-C stops the agent.", e);
			return ctrl_c().await;
		}
	};

	tokio::select! {
		_ = sigterm.recv() => {
			debug!("Received SIGTERM");
			"SIGTERM"
		}
		name = ctrl_c() => name,
	}
}

#[cfg(not(unix))]
pub async fn wait_for_termination() -> &'static str {
	ctrl_c().await
}

async fn ctrl_c() -> &'static str {
	if let Err(e) = tokio::signal::ctrl_c().await {
		warn!("Failed to setup SIGINT handler: {}", e);
		std::future::pending::<()>().await;
	}
	debug!("Received SIGINT");
	"SIGINT"
}

// vim: ts=4
