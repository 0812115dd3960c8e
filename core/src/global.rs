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

//! Per-network parameters, selected once at startup and read from
//! everywhere. Should be used sparingly.

use crate::hash::{Hash, RHash};
use crate::util::RwLock;

/// Types of chain a scanner instance can run against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ChainTypes {
	/// The main production network.
	Livenet,
	/// The public test network.
	Testnet,
}

impl Default for ChainTypes {
	fn default() -> ChainTypes {
		ChainTypes::Livenet
	}
}

impl ChainTypes {
	/// Short chain name, used in file paths and logs.
	pub fn shortname(&self) -> String {
		match *self {
			ChainTypes::Livenet => "live".to_owned(),
			ChainTypes::Testnet => "test".to_owned(),
		}
	}
}

/// Message start bytes on the livenet wire.
const LIVENET_MAGIC: [u8; 4] = [0xfd, 0xc0, 0xa5, 0xf1];
/// Message start bytes on the testnet wire.
const TESTNET_MAGIC: [u8; 4] = [0xfd, 0xc0, 0x5a, 0xf2];

/// Default livenet peer port.
const LIVENET_PORT: u16 = 7312;
/// Default testnet peer port.
const TESTNET_PORT: u16 = 17312;

/// Default livenet node RPC port.
const LIVENET_RPC_PORT: u16 = 7313;
/// Default testnet node RPC port.
const TESTNET_RPC_PORT: u16 = 17313;

/// Livenet DNS seeds.
const LIVENET_DNS_SEEDS: &[&str] = &[
	"seed1.florincoin.org",
	"flodns.oip.li",
	"flodns.oip.fun",
	"flodns.seednode.net",
];
/// Testnet DNS seeds.
const TESTNET_DNS_SEEDS: &[&str] = &["testnet.oip.fun"];

/// Known-good block hash (display order) header sync starts from on
/// livenet. Trusted checkpoint; nothing older is ever requested.
const LIVENET_BOOTSTRAP_HASH: &str =
	"4eb66e13e64522bc7ad5a2a289bc852acbad0d65a2e4d617c94fca0c0bb3ca10";
/// Same for testnet.
const TESTNET_BOOTSTRAP_HASH: &str =
	"9323b05806188d72b89b7fc4ba8e0c50fd4ebade9bcff57a276533d12d12f6b0";

lazy_static! {
	/// The chain this process scans, set once on startup.
	pub static ref CHAIN_TYPE: RwLock<ChainTypes> = RwLock::new(ChainTypes::Livenet);
}

/// Set the chain network. Should only be called once on startup, before
/// any network parameter is read.
pub fn set_chain_type(new_type: ChainTypes) {
	let mut chain_type = CHAIN_TYPE.write();
	*chain_type = new_type;
}

/// The chain currently selected.
pub fn chain_type() -> ChainTypes {
	*CHAIN_TYPE.read()
}

/// Are we running against the test network?
pub fn is_testnet() -> bool {
	chain_type() == ChainTypes::Testnet
}

/// Message start bytes for the selected network.
pub fn magic() -> [u8; 4] {
	match chain_type() {
		ChainTypes::Livenet => LIVENET_MAGIC,
		ChainTypes::Testnet => TESTNET_MAGIC,
	}
}

/// Default peer port for the selected network.
pub fn default_port() -> u16 {
	match chain_type() {
		ChainTypes::Livenet => LIVENET_PORT,
		ChainTypes::Testnet => TESTNET_PORT,
	}
}

/// Default node RPC port for the selected network.
pub fn rpc_port() -> u16 {
	match chain_type() {
		ChainTypes::Livenet => LIVENET_RPC_PORT,
		ChainTypes::Testnet => TESTNET_RPC_PORT,
	}
}

/// DNS seed names for the selected network.
pub fn dns_seeds() -> Vec<String> {
	let seeds = match chain_type() {
		ChainTypes::Livenet => LIVENET_DNS_SEEDS,
		ChainTypes::Testnet => TESTNET_DNS_SEEDS,
	};
	seeds.iter().map(|s| s.to_string()).collect()
}

/// The checkpoint hash header sync bootstraps from, wire order.
pub fn bootstrap_hash() -> Hash {
	let hex = match chain_type() {
		ChainTypes::Livenet => LIVENET_BOOTSTRAP_HASH,
		ChainTypes::Testnet => TESTNET_BOOTSTRAP_HASH,
	};
	RHash::from_hex(hex)
		.expect("hardcoded bootstrap hash is valid hex")
		.reversed()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn bootstrap_hash_parses() {
		let h = bootstrap_hash();
		assert_eq!(h.reversed().to_hex(), LIVENET_BOOTSTRAP_HASH);
	}

	#[test]
	fn networks_differ() {
		assert_ne!(LIVENET_MAGIC, TESTNET_MAGIC);
		assert_ne!(LIVENET_PORT, TESTNET_PORT);
	}
}
