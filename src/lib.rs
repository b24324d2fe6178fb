//! # mediasync - Photo and video sync agent
//!
//! Keeps a set of local directories in sync with a self-hosted media
//! server. On startup every supported file is hashed and reconciled against
//! the server in one batch; files the server does not know are uploaded.
//! Afterwards the directories are watched and new files are uploaded as they
//! appear. While the server is unreachable, new files are buffered in memory
//! and uploaded in order once a background probe sees it again.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mediasync::config::{self, CliOverrides};
//! use mediasync::service::{AgentService, Service};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = config::default_config_path();
//!     let config = config::resolve(&path, &CliOverrides::default())?;
//!     let mut agent = AgentService::new(config, Some(path));
//!     agent.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     agent.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod media_types;
pub mod metadata;
pub mod service;
pub mod signal;
pub mod types;
pub mod validation;
pub mod watcher;

// Re-export commonly used types and functions
pub use client::{HttpRemote, Remote};
pub use config::Config;
pub use engine::{Control, Engine, EngineStats, ReconcileSummary};
pub use error::SyncError;
pub use media_types::SupportedTypeSet;
pub use service::{AgentService, Service};
pub use types::{ChecksumEntry, ConnectivityState, ReconciliationDecision, UploadMetadata};

// vim: ts=4
