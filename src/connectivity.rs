//! Connectivity monitor
//!
//! Two states, `Connected` and `Disconnected`. Entering `Disconnected`
//! starts exactly one background probe task for that episode. The task pings
//! on an escalating schedule, holding at the last tier forever, and sends a
//! single recovery signal on the first success. Only the watch loop writes
//! the state; the probe task talks back through the recovery channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::BufferDepth;
use crate::client::Remote;
use crate::config::Config;
use crate::logging::*;
use crate::types::ConnectivityState;

/// Default delay tiers: 500ms, 5s, 60s
pub const DEFAULT_TIERS: [Duration; 3] =
	[Duration::from_millis(500), Duration::from_secs(5), Duration::from_secs(60)];

/// Fixed escalating delays between probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
	tiers: Vec<Duration>,
}

impl BackoffSchedule {
	/// An empty tier list falls back to the default tiers
	pub fn new(tiers: Vec<Duration>) -> Self {
		if tiers.is_empty() {
			BackoffSchedule::default()
		} else {
			BackoffSchedule { tiers }
		}
	}

	pub fn from_config(config: &Config) -> Self {
		Self::new(config.backoff_tiers())
	}

	/// Tier used after `failures` consecutive failed probes (0-indexed)
	pub fn tier_index(&self, failures: usize) -> usize {
		failures.min(self.tiers.len() - 1)
	}

	pub fn delay(&self, failures: usize) -> Duration {
		self.tiers[self.tier_index(failures)]
	}

	pub fn tiers(&self) -> &[Duration] {
		&self.tiers
	}
}

impl Default for BackoffSchedule {
	fn default() -> Self {
		BackoffSchedule { tiers: DEFAULT_TIERS.to_vec() }
	}
}

/// Delays waited before the successful probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
	pub delays: Vec<Duration>,
}

/// Ping until the server answers
///
/// The caller has already seen one failed ping, so every probe here is
/// preceded by the delay of the current tier. `prior_failures` starts the
/// schedule further along. There is no retry cap: giving up would mean
/// losing the buffered files.
pub async fn probe_until_reachable(
	remote: &dyn Remote,
	schedule: &BackoffSchedule,
	depth: &BufferDepth,
	prior_failures: usize,
) -> ProbeReport {
	let mut report = ProbeReport::default();
	loop {
		let failures = prior_failures + report.delays.len();
		let delay = schedule.delay(failures);
		// The last tier bounds how often this is logged
		info!(
			"Server unreachable (backoff tier {}, {} failed probes, {} files buffered); retrying in {:?}",
			schedule.tier_index(failures),
			failures,
			depth.get(),
			delay
		);
		tokio::time::sleep(delay).await;
		report.delays.push(delay);
		if remote.ping().await {
			info!("Connectivity re-established after {} probes", report.delays.len());
			return report;
		}
	}
}

/// Block until the server is reachable, before any local work begins
pub async fn await_initial_connectivity(
	remote: &dyn Remote,
	schedule: &BackoffSchedule,
) -> ProbeReport {
	if remote.ping().await {
		info!("Server reachable");
		return ProbeReport::default();
	}
	error!("Server connectivity failed, retrying");
	probe_until_reachable(remote, schedule, &BufferDepth::default(), 0).await
}

/// Recovery signal sent once per disconnection episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
	pub episode: u64,
	pub report: ProbeReport,
}

pub struct ConnectivityMonitor {
	state: ConnectivityState,
	remote: Arc<dyn Remote>,
	schedule: BackoffSchedule,
	depth: BufferDepth,
	recovery_tx: mpsc::Sender<Recovery>,
	probe: Option<JoinHandle<()>>,
	episode: u64,
	escalation: usize,
}

impl ConnectivityMonitor {
	/// Returns the monitor and the single-slot recovery channel
	pub fn new(
		remote: Arc<dyn Remote>,
		schedule: BackoffSchedule,
		depth: BufferDepth,
	) -> (Self, mpsc::Receiver<Recovery>) {
		let (recovery_tx, recovery_rx) = mpsc::channel(1);
		let monitor = ConnectivityMonitor {
			state: ConnectivityState::Connected,
			remote,
			schedule,
			depth,
			recovery_tx,
			probe: None,
			episode: 0,
			escalation: 0,
		};
		(monitor, recovery_rx)
	}

	pub fn state(&self) -> ConnectivityState {
		self.state
	}

	pub fn is_connected(&self) -> bool {
		self.state == ConnectivityState::Connected
	}

	pub fn episode(&self) -> u64 {
		self.episode
	}

	pub fn probe_active(&self) -> bool {
		self.probe.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
	}

	/// Start the next episode one tier further along
	///
	/// Used when a drain fails right after recovery, so a server that answers
	/// pings but keeps failing uploads is not retried at the first tier forever.
	pub fn escalate(&mut self) {
		self.escalation = (self.escalation + 1).min(self.schedule.tiers().len() - 1);
	}

	pub fn reset_escalation(&mut self) {
		self.escalation = 0;
	}

	pub fn escalation(&self) -> usize {
		self.escalation
	}

	/// Single explicit ping
	pub async fn recheck(&self) -> bool {
		self.remote.ping().await
	}

	/// Enter `Disconnected` and start this episode's probe
	///
	/// Returns false when already disconnected; a second probe for the same
	/// episode is never started.
	pub fn mark_disconnected(&mut self) -> bool {
		if self.state == ConnectivityState::Disconnected {
			return false;
		}
		self.state = ConnectivityState::Disconnected;
		self.episode += 1;
		let episode = self.episode;
		info!("Connectivity lost (episode {}), buffering new files", episode);

		let remote = Arc::clone(&self.remote);
		let schedule = self.schedule.clone();
		let depth = self.depth.clone();
		let tx = self.recovery_tx.clone();
		let prior = self.escalation;
		self.probe = Some(tokio::spawn(async move {
			let report = probe_until_reachable(remote.as_ref(), &schedule, &depth, prior).await;
			if tx.send(Recovery { episode, report }).await.is_err() {
				debug!("Watch loop stopped before recovery of episode {}", episode);
			}
		}));
		true
	}

	/// Apply a recovery signal; stale signals from older episodes are ignored
	pub fn on_recovered(&mut self, recovery: &Recovery) -> bool {
		if recovery.episode != self.episode || self.state == ConnectivityState::Connected {
			debug!("Ignoring stale recovery signal for episode {}", recovery.episode);
			return false;
		}
		self.state = ConnectivityState::Connected;
		self.probe = None;
		true
	}

	/// Stop a running probe (shutdown)
	pub fn cancel_probe(&mut self) {
		if let Some(handle) = self.probe.take() {
			handle.abort();
		}
	}
}

impl Drop for ConnectivityMonitor {
	fn drop(&mut self) {
		self.cancel_probe();
	}
}


// vim: ts=4
