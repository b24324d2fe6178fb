use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;

use mediasync::config::{self, CliOverrides};
use mediasync::logging::*;
use mediasync::service::{self, AgentService, Service};
use mediasync::signal;

fn cli() -> Command {
	Command::new("mediasync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Sync local photo and video folders to a self-hosted media server")
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file (default: ~/.config/mediasync/config.toml)"),
		)
		.arg(
			Arg::new("server")
				.short('s')
				.long("server")
				.value_name("URL")
				.global(true)
				.help("Server base URL"),
		)
		.arg(Arg::new("key").short('k').long("key").value_name("KEY").global(true).help("API key"))
		.arg(
			Arg::new("path")
				.short('p')
				.long("path")
				.value_name("DIR")
				.action(ArgAction::Append)
				.global(true)
				.help("Directory to sync (repeatable, replaces configured paths)"),
		)
		.arg(
			Arg::new("log-level")
				.long("log-level")
				.value_name("LEVEL")
				.global(true)
				.help("Log level (trace, debug, info, warn, error)"),
		)
		.subcommand(Command::new("run").about("Reconcile, then watch and upload (default)"))
		.subcommand(Command::new("scan").about("Reconcile once and report, without uploading"))
}

fn overrides(matches: &ArgMatches) -> CliOverrides {
	CliOverrides {
		server: matches.get_one::<String>("server").cloned(),
		key: matches.get_one::<String>("key").cloned(),
		paths: matches
			.get_many::<String>("path")
			.map(|vals| vals.map(PathBuf::from).collect())
			.unwrap_or_default(),
		log_level: matches.get_one::<String>("log-level").cloned(),
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = cli().get_matches();
	let (command, sub_matches) = match matches.subcommand() {
		Some((name, sub)) => (name, sub),
		None => ("run", &matches),
	};

	let config_path = sub_matches
		.get_one::<String>("config")
		.map(PathBuf::from)
		.unwrap_or_else(config::default_config_path);

	let config = match config::resolve(&config_path, &overrides(sub_matches)) {
		Ok(c) => c,
		Err(e) => {
			init_tracing("info");
			error!("{}", e);
			return Err(e.into());
		}
	};
	init_tracing(&config.log_level);
	info!("Using config {}", config_path.display());

	if command == "scan" {
		let summary = service::run_scan(&config).await?;
		println!(
			"{} files indexed, {} new, {} already on server, {} unreadable",
			summary.indexed, summary.accepted, summary.rejected, summary.skipped
		);
		return Ok(());
	}

	let mut agent = AgentService::new(config, Some(config_path));
	agent.start().await?;

	tokio::select! {
		name = signal::wait_for_termination() => {
			info!("Received {}, shutting down", name);
			agent.stop().await?;
		}
		result = agent.wait() => {
			let stats = result?;
			info!("Agent exited ({} uploaded)", stats.uploaded);
		}
	}

	Ok(())
}

// vim: ts=4
