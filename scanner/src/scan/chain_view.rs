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

//! Folds a set of session snapshots into the chains the peers observe.
//! Pure aggregation: peers that report the same height-to-hash mapping
//! land in the same bucket, everyone else starts a new one. Chain ids
//! are opaque labels (the display hash of the first block observed for
//! the bucket) and depend on fold order; callers must not read anything
//! into them beyond identity.

use std::collections::{BTreeMap, HashMap};

use crate::core::hash::RHash;
use crate::p2p::SessionSnapshot;

/// One observed chain: the blocks seen for it, by height.
#[derive(Clone, Debug)]
pub struct ChainEntry {
	/// Opaque stable label for this bucket
	pub chain_id: String,
	/// Everything observed on this chain, height to display hash
	pub blocks: BTreeMap<u64, RHash>,
}

/// The peers agreeing on one chain.
#[derive(Clone, Debug, Default)]
pub struct ChainPeers {
	/// (user_agent, address) per agreeing peer
	pub peers: Vec<(String, String)>,
	/// Highest height any of them reported
	pub best_height: i64,
	/// Last block hash reported alongside that height
	pub best_hash: Option<RHash>,
}

/// Everything the aggregation produces.
#[derive(Clone, Debug, Default)]
pub struct ChainView {
	/// Observed chains, in discovery order
	pub chains: Vec<ChainEntry>,
	/// Peer groupings keyed by chain id
	pub peer_map: HashMap<String, ChainPeers>,
}

impl ChainView {
	/// Groups the provided snapshots by the chain they observe. Peers
	/// that haven't finished their initial sync, or that have shown no
	/// blocks yet, carry no information and are skipped.
	pub fn build(snapshots: &[SessionSnapshot]) -> ChainView {
		let mut view = ChainView::default();

		for snap in snapshots {
			if !snap.initial_sync_complete || snap.block_height_map.is_empty() {
				continue;
			}

			let by_height: BTreeMap<u64, RHash> = snap
				.block_height_map
				.iter()
				.map(|(rhash, height)| (*height, *rhash))
				.collect();

			// a peer matches a chain when everything it reports is
			// already there, with the same hashes
			let matched = view
				.chains
				.iter()
				.find(|entry| {
					by_height
						.iter()
						.all(|(height, rhash)| entry.blocks.get(height) == Some(rhash))
				})
				.map(|entry| entry.chain_id.clone());

			let chain_id = match matched {
				Some(id) => id,
				None => {
					let first = by_height
						.values()
						.next()
						.expect("by_height checked non-empty above");
					let id = first.to_hex();
					view.chains.push(ChainEntry {
						chain_id: id.clone(),
						blocks: by_height,
					});
					id
				}
			};

			let bucket = view.peer_map.entry(chain_id).or_default();
			bucket
				.peers
				.push((snap.user_agent.clone(), snap.addr.to_string()));
			if snap.best_height > bucket.best_height {
				bucket.best_height = snap.best_height;
				bucket.best_hash = snap.last_rblock_hash;
			}
		}

		view
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::p2p::{PeerAddr, SessionPhase};
	use std::collections::HashMap;

	fn rhash(tag: u8) -> RHash {
		let mut bytes = [0u8; 32];
		bytes[0] = tag;
		RHash(bytes)
	}

	fn snapshot(
		addr: &str,
		agent: &str,
		synced: bool,
		best_height: i64,
		blocks: &[(u64, RHash)],
	) -> SessionSnapshot {
		let block_height_map: HashMap<RHash, u64> =
			blocks.iter().map(|(h, r)| (*r, *h)).collect();
		let addr = PeerAddr::from_string(addr).unwrap();
		SessionSnapshot {
			peer_hash: addr.peer_hash(),
			addr,
			user_agent: agent.to_string(),
			phase: if synced {
				SessionPhase::Live
			} else {
				SessionPhase::BlockSync
			},
			best_height,
			header_sync_complete: true,
			initial_sync_complete: synced,
			requested_blocks: 0,
			headers_buffered: 0,
			blocks_received: blocks.len(),
			mempool_size: 0,
			block_height_map,
			last_rblock_hash: blocks.last().map(|(_, r)| *r),
		}
	}

	#[test]
	fn partitions_two_chains() {
		// two peers on one chain over heights 100..=105, one diverging
		// at 103
		let main: Vec<(u64, RHash)> = (100..=105).map(|h| (h, rhash(h as u8))).collect();
		let mut fork = main.clone();
		for entry in fork.iter_mut().filter(|(h, _)| *h >= 103) {
			entry.1 = rhash(entry.0 as u8 + 100);
		}

		let snaps = vec![
			snapshot("10.0.0.1:7312", "/flod:0.15.2/", true, 105, &main),
			snapshot("10.0.0.2:7312", "/flod:0.15.2/", true, 104, &main),
			snapshot("10.0.0.3:7312", "/flod:0.15.1/", true, 105, &fork),
		];
		let view = ChainView::build(&snaps);

		assert_eq!(view.chains.len(), 2);
		assert_eq!(view.peer_map.len(), 2);

		let main_id = &view.chains[0].chain_id;
		let fork_id = &view.chains[1].chain_id;
		assert_eq!(view.peer_map[main_id].peers.len(), 2);
		assert_eq!(view.peer_map[fork_id].peers.len(), 1);
		// each bucket reports its peers' max height
		assert_eq!(view.peer_map[main_id].best_height, 105);
		assert_eq!(view.peer_map[fork_id].best_height, 105);
	}

	#[test]
	fn unsynced_and_empty_peers_are_skipped() {
		let blocks: Vec<(u64, RHash)> = vec![(10, rhash(1))];
		let snaps = vec![
			snapshot("10.0.0.1:7312", "/flod:0.15.2/", false, 10, &blocks),
			snapshot("10.0.0.2:7312", "/flod:0.15.2/", true, 0, &[]),
		];
		let view = ChainView::build(&snaps);
		assert!(view.chains.is_empty());
		assert!(view.peer_map.is_empty());
	}

	#[test]
	fn subset_observation_matches_existing_chain() {
		let full: Vec<(u64, RHash)> = (50..=60).map(|h| (h, rhash(h as u8))).collect();
		let partial = full[5..].to_vec();
		let snaps = vec![
			snapshot("10.0.0.1:7312", "/flod:0.15.2/", true, 60, &full),
			snapshot("10.0.0.2:7312", "/flod:0.15.0/", true, 58, &partial),
		];
		let view = ChainView::build(&snaps);
		assert_eq!(view.chains.len(), 1);
		assert_eq!(view.peer_map[&view.chains[0].chain_id].peers.len(), 2);
	}

	#[test]
	fn deterministic_grouping_modulo_labels() {
		let chain_a: Vec<(u64, RHash)> = (1..=5).map(|h| (h, rhash(h as u8))).collect();
		let chain_b: Vec<(u64, RHash)> = (1..=5).map(|h| (h, rhash(h as u8 + 50))).collect();

		let snaps1 = vec![
			snapshot("10.0.0.1:7312", "a", true, 5, &chain_a),
			snapshot("10.0.0.2:7312", "b", true, 5, &chain_b),
		];
		let snaps2 = vec![
			snapshot("10.0.0.1:7312", "a", true, 5, &chain_a),
			snapshot("10.0.0.2:7312", "b", true, 5, &chain_b),
		];

		let view1 = ChainView::build(&snaps1);
		let view2 = ChainView::build(&snaps2);

		// identical inputs produce identical groupings
		assert_eq!(view1.chains.len(), view2.chains.len());
		for (c1, c2) in view1.chains.iter().zip(view2.chains.iter()) {
			assert_eq!(c1.chain_id, c2.chain_id);
			assert_eq!(c1.blocks, c2.blocks);
		}
	}

	#[test]
	fn chain_id_is_first_observed_block() {
		let blocks: Vec<(u64, RHash)> = vec![(7, rhash(7)), (8, rhash(8)), (9, rhash(9))];
		let snaps = vec![snapshot("10.0.0.1:7312", "a", true, 9, &blocks)];
		let view = ChainView::build(&snaps);
		assert_eq!(view.chains[0].chain_id, rhash(7).to_hex());
	}
}
