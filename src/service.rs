//! Agent lifecycle
//!
//! The host (CLI, service manager) only sees `start` and `stop`. Everything
//! between connectivity wait and watch loop exit happens in one spawned task.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::{HttpRemote, Remote};
use crate::config::{Config, ConfigReloader, ConfigWatcher};
use crate::connectivity::{await_initial_connectivity, BackoffSchedule};
use crate::engine::{self, Engine, EngineStats, ReconcileSummary};
use crate::error::SyncError;
use crate::logging::*;
use crate::metadata::ExifMetadata;
use crate::watcher::DirectoryWatcher;

/// Host-facing lifecycle hooks
#[async_trait]
pub trait Service: Send {
	async fn start(&mut self) -> Result<(), SyncError>;
	async fn stop(&mut self) -> Result<(), SyncError>;
}

/// Runs the sync agent as a background task
pub struct AgentService {
	config: Config,
	config_path: Option<PathBuf>,
	shutdown_tx: watch::Sender<bool>,
	handle: Option<JoinHandle<Result<EngineStats, SyncError>>>,
}

impl AgentService {
	/// `config_path` enables live reload of the watch paths
	pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
		let (shutdown_tx, _) = watch::channel(false);
		AgentService { config, config_path, shutdown_tx, handle: None }
	}

	pub fn is_running(&self) -> bool {
		self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
	}

	/// Wait for the agent to exit on its own (notifier closed or startup failure)
	///
	/// Cancel-safe: dropping this future leaves the agent running and
	/// stoppable.
	pub async fn wait(&mut self) -> Result<EngineStats, SyncError> {
		let result = match self.handle.as_mut() {
			Some(handle) => join(handle).await,
			None => return Ok(EngineStats::default()),
		};
		self.handle = None;
		result
	}
}

#[async_trait]
impl Service for AgentService {
	async fn start(&mut self) -> Result<(), SyncError> {
		if self.is_running() {
			return Ok(());
		}
		let remote: Arc<dyn Remote> = Arc::new(HttpRemote::new(&self.config)?);
		let _ = self.shutdown_tx.send(false);
		let shutdown = self.shutdown_tx.subscribe();
		let config = self.config.clone();
		let config_path = self.config_path.clone();
		self.handle = Some(tokio::spawn(run_agent(remote, config, config_path, shutdown)));
		info!("Agent started");
		Ok(())
	}

	async fn stop(&mut self) -> Result<(), SyncError> {
		let mut handle = match self.handle.take() {
			Some(h) => h,
			None => return Ok(()),
		};
		info!("Stopping agent");
		let _ = self.shutdown_tx.send(true);
		let stats = join(&mut handle).await?;
		info!("Agent stopped ({} uploaded this session)", stats.uploaded);
		Ok(())
	}
}

async fn join(
	handle: &mut JoinHandle<Result<EngineStats, SyncError>>,
) -> Result<EngineStats, SyncError> {
	match handle.await {
		Ok(result) => result,
		Err(e) if e.is_cancelled() => Ok(EngineStats::default()),
		Err(e) => Err(SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))),
	}
}

/// Full agent sequence: connectivity, media types, startup pass, watch loop
pub async fn run_agent(
	remote: Arc<dyn Remote>,
	config: Config,
	config_path: Option<PathBuf>,
	mut shutdown: watch::Receiver<bool>,
) -> Result<EngineStats, SyncError> {
	let schedule = BackoffSchedule::from_config(&config);

	tokio::select! {
		_ = await_initial_connectivity(remote.as_ref(), &schedule) => {}
		_ = shutdown.changed() => {
			info!("Shutdown before server became reachable");
			return Ok(EngineStats::default());
		}
	}

	let types = Arc::new(remote.fetch_supported_types().await);
	debug!("Supported image extensions: {:?}", types.image_extensions());

	let (events_tx, events_rx) = mpsc::unbounded_channel();
	let registry = DirectoryWatcher::new(events_tx)?;
	let metadata = Arc::new(ExifMetadata::new(config.device_id.clone()));
	let mut engine = Engine::new(
		remote,
		metadata,
		types,
		Box::new(registry),
		schedule,
		config.max_drain_attempts,
	)
	.with_shutdown(shutdown.clone());

	let (control_tx, control_rx) = mpsc::unbounded_channel();
	let _config_watcher = match config_path {
		Some(path) => {
			let reloader = ConfigReloader::new(path.clone(), config.clone());
			match ConfigWatcher::start(reloader, control_tx) {
				Ok(w) => Some(w),
				Err(e) => {
					warn!("Config reload disabled for {}: {}", path.display(), e);
					None
				}
			}
		}
		None => None,
	};

	engine.startup_pass(&config.paths).await;
	Ok(engine.run(events_rx, control_rx, shutdown).await)
}

/// One-shot reconciliation report; uploads nothing
pub async fn run_scan(config: &Config) -> Result<ReconcileSummary, SyncError> {
	let remote = HttpRemote::new(config)?;
	if !remote.ping().await {
		return Err(SyncError::transport(format!("server {} is unreachable", config.server)));
	}
	let types = remote.fetch_supported_types().await;
	engine::scan(&remote, &types, &config.paths).await
}

// vim: ts=4
