//! Agent configuration
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (~/.config/mediasync/config.toml, or a .json file)
//! 3. CLI flags (highest priority)
//!
//! The merged value is validated once, persisted back to the file and then
//! handed to every component by reference. Nothing reads configuration from
//! global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::engine::Control;
use crate::error::SyncError;
use crate::logging::*;
use crate::validation::{self, ValidationError, Validator};

pub const APP_DIR: &str = "mediasync";
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration for the sync agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Server base URL; the API lives under `<server>/api`
	pub server: String,

	/// API key sent with every authenticated request
	pub key: String,

	/// Directories to reconcile and watch
	pub paths: Vec<PathBuf>,

	/// Device tag used when a file carries no camera make/model
	pub device_id: Option<String>,

	/// Per-request timeout in seconds
	pub request_timeout_secs: u64,

	/// Delays between connectivity probes, escalating one tier per failure
	pub backoff_tiers_ms: Vec<u64>,

	/// Consecutive failures of one buffered entry before it is given up
	pub max_drain_attempts: u32,

	/// Log level (trace, debug, info, warn, error)
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			server: String::new(),
			key: String::new(),
			paths: vec![],
			device_id: None,
			request_timeout_secs: 30,
			backoff_tiers_ms: vec![500, 5_000, 60_000],
			max_drain_attempts: 3,
			log_level: "info".to_string(),
		}
	}
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub server: Option<String>,
	pub key: Option<String>,
	pub paths: Vec<PathBuf>,
	pub log_level: Option<String>,
}

/// Default config file location (`<user config dir>/mediasync/config.toml`)
pub fn default_config_path() -> PathBuf {
	dirs::config_dir()
		.or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
		.unwrap_or_else(|| PathBuf::from("."))
		.join(APP_DIR)
		.join(CONFIG_FILE)
}

fn is_json(path: &Path) -> bool {
	path.extension().map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false)
}

impl Config {
	/// Parse a config file's contents, choosing the format by extension
	pub fn parse(path: &Path, contents: &str) -> Result<Config, SyncError> {
		if contents.trim().is_empty() {
			return Ok(Config::default());
		}
		if is_json(path) {
			serde_json::from_str(contents).map_err(|e| {
				SyncError::config(format!("cannot parse {}: {}", path.display(), e))
			})
		} else {
			toml::from_str(contents).map_err(|e| {
				SyncError::config(format!("cannot parse {}: {}", path.display(), e))
			})
		}
	}

	/// Load the config file, creating an empty one when it does not exist yet
	pub fn load(path: &Path) -> Result<Config, SyncError> {
		if !path.exists() {
			if let Some(parent) = path.parent() {
				std::fs::create_dir_all(parent)?;
			}
			std::fs::write(path, "")?;
			info!("Created empty config file {}", path.display());
			return Ok(Config::default());
		}
		Config::read(path)
	}

	/// Read and parse an existing file; never creates it
	pub fn read(path: &Path) -> Result<Config, SyncError> {
		let contents = std::fs::read_to_string(path).map_err(|e| {
			SyncError::config(format!("cannot read {}: {}", path.display(), e))
		})?;
		Config::parse(path, &contents)
	}

	/// Persist the effective configuration
	pub fn save(&self, path: &Path) -> Result<(), SyncError> {
		let contents = if is_json(path) {
			serde_json::to_string_pretty(self)
				.map_err(|e| SyncError::config(format!("cannot serialize config: {}", e)))?
		} else {
			toml::to_string_pretty(self)
				.map_err(|e| SyncError::config(format!("cannot serialize config: {}", e)))?
		};
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, contents)?;
		Ok(())
	}

	/// CLI values replace file values; repeated `--path` replaces the whole list
	pub fn apply_overrides(&mut self, cli: &CliOverrides) {
		if let Some(server) = cli.server.as_ref().filter(|s| !s.trim().is_empty()) {
			self.server = server.trim().to_string();
		}
		if let Some(key) = cli.key.as_ref().filter(|s| !s.trim().is_empty()) {
			self.key = key.trim().to_string();
		}
		if !cli.paths.is_empty() {
			self.paths = cli.paths.clone();
		}
		if let Some(level) = &cli.log_level {
			self.log_level = level.clone();
		}
	}

	/// Base URL of the API, without a trailing slash
	pub fn api_base(&self) -> String {
		format!("{}/api", self.server.trim().trim_end_matches('/'))
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn backoff_tiers(&self) -> Vec<Duration> {
		self.backoff_tiers_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
	}
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ValidationError> {
		validation::validate_server_url(&self.server)?;
		validation::validate_api_key(&self.key)?;
		validation::validate_watch_roots(&self.paths)?;
		validation::validate_backoff_tiers(&self.backoff_tiers_ms)?;
		validation::validate_timeout_secs(self.request_timeout_secs)?;
		if self.max_drain_attempts == 0 {
			return Err(ValidationError::ConfigError(
				"maxDrainAttempts must be at least 1".to_string(),
			));
		}
		Ok(())
	}
}

/// Load, merge, validate and persist the effective configuration
///
/// Any failure here is terminal: the agent never runs with an incomplete
/// server/key/paths triple.
pub fn resolve(path: &Path, cli: &CliOverrides) -> Result<Config, SyncError> {
	let mut config = Config::load(path)?;
	config.apply_overrides(cli);
	config.validate()?;
	if let Err(e) = config.save(path) {
		warn!("Could not persist config to {}: {}", path.display(), e);
	}
	Ok(config)
}

// ============================================================================
// RELOAD
// ============================================================================

/// Tracks the last applied configuration and turns file changes into control messages
pub struct ConfigReloader {
	path: PathBuf,
	current: Mutex<Config>,
}

impl ConfigReloader {
	pub fn new(path: PathBuf, current: Config) -> Self {
		ConfigReloader { path, current: Mutex::new(current) }
	}

	/// Re-read the file and report what the running engine has to change
	///
	/// Only watch roots are applied live. Invalid or missing files are ignored.
	pub fn reload(&self) -> Option<Control> {
		let next = match Config::read(&self.path).and_then(|c| {
			c.validate()?;
			Ok(c)
		}) {
			Ok(c) => c,
			Err(e) => {
				warn!("Ignoring config change in {}: {}", self.path.display(), e);
				return None;
			}
		};

		let mut current = match self.current.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		if next.server != current.server || next.key != current.key {
			warn!("Server or key changed in {}; restart to apply", self.path.display());
		}
		let roots_changed = next.paths != current.paths;
		*current = next;
		if roots_changed {
			info!("Watch paths changed: {:?}", current.paths);
			Some(Control::UpdateRoots(current.paths.clone()))
		} else {
			None
		}
	}
}

/// Watches the config file and forwards root changes to the engine
pub struct ConfigWatcher {
	_watcher: RecommendedWatcher,
}

impl ConfigWatcher {
	pub fn start(
		reloader: ConfigReloader,
		control_tx: mpsc::UnboundedSender<Control>,
	) -> Result<Self, SyncError> {
		let target = reloader.path.clone();
		let dir = target.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
		let file_name = target.file_name().map(|n| n.to_os_string());

		let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
			let event = match res {
				Ok(event) => event,
				Err(e) => {
					warn!("Config watch error: {}", e);
					return;
				}
			};
			if !(event.kind.is_modify() || event.kind.is_create()) {
				return;
			}
			// Editors often replace the file, so the parent directory is watched
			let touches_config = event.paths.iter().any(|p| p.file_name() == file_name.as_deref());
			if !touches_config {
				return;
			}
			info!("Config file changed: {}", target.display());
			if let Some(control) = reloader.reload() {
				if control_tx.send(control).is_err() {
					debug!("Engine stopped; dropping config update");
				}
			}
		})?;
		watcher.watch(&dir, RecursiveMode::NonRecursive)?;
		Ok(ConfigWatcher { _watcher: watcher })
	}
}


// vim: ts=4
