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

//! Scanner types

use std::convert::From;
use std::io;

use crate::core::global::ChainTypes;
use crate::core::ser;
use crate::p2p;

/// Hard cap on concurrent sessions unless configured otherwise.
const DEFAULT_MAX_PEERS: usize = 1000;

/// Minimum fork branch length worth notifying about.
const DEFAULT_REORG_TRIGGER_LENGTH: u64 = 10;

/// Maximum distance below the active tip at which a fork still counts
/// as recent.
const DEFAULT_REORG_TIP_MAXAGE: u64 = 25;

/// Error type wrapping underlying module errors.
#[derive(Debug)]
pub enum Error {
	/// Error originating from the peer-to-peer network.
	P2P(p2p::Error),
	/// Error originating from serialization.
	Serialization(ser::Error),
	/// Error talking to the backing full node.
	Node(String),
	/// Invalid configuration.
	Configuration(String),
	/// Filesystem or socket error.
	IO(io::Error),
}

impl From<p2p::Error> for Error {
	fn from(e: p2p::Error) -> Error {
		Error::P2P(e)
	}
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Serialization(e)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IO(e)
	}
}

/// Type of seeding the scanner uses to find peers on the network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Seeding {
	/// No seeding, waits for peers to be added
	None,
	/// A list of seed addresses provided in the config
	List,
	/// Resolve a list of DNS seed names
	DNSSeed,
	/// Admission without dialing, for tests that drive sessions
	/// programmatically
	Programmatic,
}

impl Default for Seeding {
	fn default() -> Seeding {
		Seeding::DNSSeed
	}
}

fn default_db_root() -> String {
	".floscan".to_string()
}

fn default_max_peers() -> usize {
	DEFAULT_MAX_PEERS
}

fn default_reorg_trigger_length() -> u64 {
	DEFAULT_REORG_TRIGGER_LENGTH
}

fn default_reorg_tip_maxage() -> u64 {
	DEFAULT_REORG_TIP_MAXAGE
}

/// Full scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
	/// Run against livenet or testnet
	#[serde(default)]
	pub chain_type: ChainTypes,

	/// Directory for the lock file and any node data. An empty string
	/// disables the lock, for tests.
	#[serde(default = "default_db_root")]
	pub db_root: String,

	/// Hard cap on concurrent sessions
	#[serde(default = "default_max_peers")]
	pub max_peers: usize,

	/// Method used to get the initial peer addresses
	#[serde(default)]
	pub seeding_type: Seeding,

	/// The list of seed addresses, if seeding_type is List
	pub seeds: Option<Vec<String>>,

	/// Minimum fork branch length that triggers a reorg notification
	#[serde(default = "default_reorg_trigger_length")]
	pub reorg_trigger_length: u64,

	/// Maximum distance below the active tip at which a fork is still
	/// recent enough to notify about
	#[serde(default = "default_reorg_tip_maxage")]
	pub reorg_tip_maxage: u64,

	/// Suppress the periodic in-memory status refresh
	#[serde(default)]
	pub disable_status_update: bool,

	/// host:port of the backing full node's RPC endpoint. Defaults to
	/// localhost on the network's RPC port.
	pub node_rpc_addr: Option<String>,
}

impl Default for ScannerConfig {
	fn default() -> ScannerConfig {
		ScannerConfig {
			chain_type: ChainTypes::default(),
			db_root: default_db_root(),
			max_peers: default_max_peers(),
			seeding_type: Seeding::default(),
			seeds: None,
			reorg_trigger_length: default_reorg_trigger_length(),
			reorg_tip_maxage: default_reorg_tip_maxage(),
			disable_status_update: false,
			node_rpc_addr: None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn config_defaults_when_fields_absent() {
		let config: ScannerConfig = serde_json::from_str("{}").unwrap();
		assert_eq!(config.max_peers, 1000);
		assert_eq!(config.reorg_trigger_length, 10);
		assert_eq!(config.reorg_tip_maxage, 25);
		assert_eq!(config.seeding_type, Seeding::DNSSeed);
		assert!(!config.disable_status_update);
	}
}
