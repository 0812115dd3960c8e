// Copyright 2021 The Floscan Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Main for building the binary of the floscan network scanner.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};

use floscan_config as config;
use floscan_core::global::{self, ChainTypes};
use floscan_scanner::{NodeClient, ScannerConfig, Seeding, Supervisor};
use floscan_util as util;

/// How often the main loop logs a status dump and re-checks shutdown.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

fn main() {
	let args = App::new("floscan")
		.version(crate_version!())
		.author("The Floscan Developers")
		.about("Crawls the Florincoin network and watches for chain reorganizations.")
		.arg(
			Arg::with_name("config")
				.short("c")
				.long("config")
				.help("Path to the configuration file")
				.takes_value(true),
		)
		.arg(
			Arg::with_name("testnet")
				.long("testnet")
				.help("Run against the test network"),
		)
		.arg(
			Arg::with_name("seed")
				.long("seed")
				.help("Seed peer address, can be given multiple times; disables DNS seeding")
				.takes_value(true)
				.multiple(true),
		)
		.arg(
			Arg::with_name("max_peers")
				.long("max-peers")
				.help("Hard cap on concurrent peer sessions")
				.takes_value(true),
		)
		.arg(
			Arg::with_name("node_rpc")
				.long("node-rpc")
				.help("host:port of the backing full node's RPC endpoint")
				.takes_value(true),
		)
		.get_matches();

	let global_config = match args.value_of("config") {
		Some(path) => config::GlobalConfig::new(&PathBuf::from(path)),
		None => config::initial_setup(),
	};
	let global_config = match global_config {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Failed to load configuration: {}", e);
			exit(1);
		}
	};

	let mut scanner_config: ScannerConfig = global_config.members.scanner.clone();
	if args.is_present("testnet") {
		scanner_config.chain_type = ChainTypes::Testnet;
	}
	if let Some(seeds) = args.values_of("seed") {
		scanner_config.seeding_type = Seeding::List;
		scanner_config.seeds = Some(seeds.map(|s| s.to_string()).collect());
	}
	if let Some(max_peers) = args.value_of("max_peers") {
		match max_peers.parse() {
			Ok(n) => scanner_config.max_peers = n,
			Err(_) => {
				eprintln!("--max-peers must be a number");
				exit(1);
			}
		}
	}
	if let Some(addr) = args.value_of("node_rpc") {
		scanner_config.node_rpc_addr = Some(addr.to_string());
	}

	global::set_chain_type(scanner_config.chain_type);
	util::init_logger(global_config.members.logging.clone());

	info!(
		"starting floscan {} on {}",
		crate_version!(),
		scanner_config.chain_type.shortname()
	);
	if global_config.using_config_file {
		info!(
			"using configuration file at {:?}",
			global_config.config_file_path
		);
	}

	let node_addr = scanner_config
		.node_rpc_addr
		.clone()
		.unwrap_or_else(|| format!("127.0.0.1:{}", global::rpc_port()));
	let node = match NodeClient::new(&node_addr) {
		Ok(node) => Arc::new(node),
		Err(e) => {
			error!("could not set up node client for {}: {:?}", node_addr, e);
			exit(1);
		}
	};

	let supervisor = match Supervisor::new(scanner_config, node) {
		Ok(supervisor) => supervisor,
		Err(e) => {
			error!("could not start scanner: {:?}", e);
			exit(1);
		}
	};

	arm_reorg_hook(&supervisor);
	if let Err(e) = supervisor.start() {
		error!("could not start scanner tasks: {:?}", e);
		exit(1);
	}

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("Error setting handler for both SIGINT (Ctrl+C) and SIGTERM (kill)");

	while running.load(Ordering::SeqCst) {
		thread::sleep(STATUS_LOG_INTERVAL);
		if !running.load(Ordering::SeqCst) {
			break;
		}
		info!("{}", supervisor.inspect());
		// the subscription is one-shot; put it back after each firing
		if !supervisor.reorg_armed() {
			arm_reorg_hook(&supervisor);
		}
	}

	warn!("shutting down");
	supervisor.stop();
}

// The binary's reorg consumer just makes noise; anything downstream can
// install its own hook instead.
fn arm_reorg_hook(supervisor: &Arc<Supervisor>) {
	supervisor.on_reorg_trigger(|trigger| {
		warn!(
			"REORG: competing branch of length {} at height {} (active tip {} at {})",
			trigger.reorg_tip.branchlen,
			trigger.reorg_tip.height,
			trigger.best_height_tip.hash,
			trigger.best_height_tip.height,
		);
	});
}
