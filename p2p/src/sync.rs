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

//! Per-session sync state machine. Pure: handlers consume parsed
//! messages and hand back the requests to send, the connection layer
//! does the I/O. Only the session's own reader thread ever mutates an
//! instance, which is what keeps packet handling serialized per peer.

use std::collections::{HashMap, HashSet};

use crate::core::block::{Block, BlockHeader, Transaction};
use crate::core::hash::{Hash, RHash};
use crate::msg::{InvItem, INV_BLOCK, INV_TX, MAX_BLOCK_HEADERS};
use crate::types::PeerAddr;

/// A header batch at least this large is treated as mid-sync and resets
/// the buffered window rather than growing it without bound.
pub const HEADERS_RESET_THRESHOLD: usize = 1000;

/// Where a session currently stands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionPhase {
	/// TCP connect in flight
	Dialing,
	/// Connected, version exchange in flight
	Handshaking,
	/// Handshake done, nothing requested yet
	Open,
	/// Downloading the header chain from the bootstrap anchor
	HeaderSync,
	/// Headers done, downloading block bodies
	BlockSync,
	/// Caught up, tracking the tip and the mempool
	Live,
	/// Finished, nothing further will happen
	Dead,
}

impl SessionPhase {
	/// True for every phase with a live, handshaked connection.
	pub fn is_open(&self) -> bool {
		match *self {
			SessionPhase::Open
			| SessionPhase::HeaderSync
			| SessionPhase::BlockSync
			| SessionPhase::Live => true,
			_ => false,
		}
	}
}

/// A request the state machine wants sent to the peer.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncAction {
	/// getheaders continuing from the provided hash
	RequestHeaders(Hash),
	/// getblocks continuing from the provided hash
	RequestBlocks(Hash),
	/// getdata for the provided inventory
	RequestData(Vec<InvItem>),
}

/// Everything a session tracks about one peer's view of the chain.
pub struct SessionSync {
	pub phase: SessionPhase,
	/// Highest height this peer has advertised or shown us
	pub best_height: i64,
	/// Sliding window of headers for the current sync stretch
	pub headers_buffer: Vec<BlockHeader>,
	/// Where the next header batch continues from
	pub last_header_hash: Hash,
	/// Final header of the most recent batch
	pub last_header: Option<BlockHeader>,
	pub header_sync_complete: bool,
	/// Blocks received from this peer, keyed by display hash
	pub block_map: HashMap<RHash, Block>,
	/// Coinbase heights of those blocks
	pub block_height_map: HashMap<RHash, u64>,
	/// getdata issued, block not yet arrived
	pub requested_blocks: HashSet<Hash>,
	pub last_block_hash: Option<Hash>,
	pub last_rblock_hash: Option<RHash>,
	pub initial_sync_complete: bool,
	/// Transactions announced after the initial sync finished
	pub mempool: Vec<Transaction>,
}

impl SessionSync {
	/// Fresh state anchored at the network's bootstrap checkpoint.
	pub fn new(bootstrap_hash: Hash) -> SessionSync {
		SessionSync {
			phase: SessionPhase::Dialing,
			best_height: 0,
			headers_buffer: vec![],
			last_header_hash: bootstrap_hash,
			last_header: None,
			header_sync_complete: false,
			block_map: HashMap::new(),
			block_height_map: HashMap::new(),
			requested_blocks: HashSet::new(),
			last_block_hash: None,
			last_rblock_hash: None,
			initial_sync_complete: false,
			mempool: vec![],
		}
	}

	/// Kick off header sync after the handshake settled.
	pub fn begin_header_sync(&mut self, start_height: i64) -> SyncAction {
		self.best_height = start_height;
		self.phase = SessionPhase::HeaderSync;
		SyncAction::RequestHeaders(self.last_header_hash)
	}

	/// Handles a headers batch. Returns the follow-up request, if any.
	pub fn receive_headers(&mut self, headers: Vec<BlockHeader>) -> Option<SyncAction> {
		if self.header_sync_complete {
			// late batch from an earlier request, nothing to do with it
			return None;
		}

		let batch_len = headers.len();

		// mid-sync batches slide the window rather than grow it
		if batch_len >= HEADERS_RESET_THRESHOLD {
			self.headers_buffer.clear();
		}
		self.headers_buffer.extend(headers);
		if let Some(last) = self.headers_buffer.last() {
			self.last_header = Some(last.clone());
		}

		if batch_len == 0 || batch_len < MAX_BLOCK_HEADERS {
			// the peer has nothing more for us
			return self.complete_header_sync();
		}

		// full batch, there is more where that came from
		if let Some(last) = &self.last_header {
			self.last_header_hash = last.hash();
		}
		Some(SyncAction::RequestHeaders(self.last_header_hash))
	}

	// Header sync is done; pin the buffer tip and start fetching bodies
	// from the oldest header still in the window. getblocks returns the
	// inventory *after* the locator hash, so anchoring at the window's
	// first header covers exactly the stretch we hold headers for.
	fn complete_header_sync(&mut self) -> Option<SyncAction> {
		self.header_sync_complete = true;
		if let Some(last) = &self.last_header {
			self.last_header_hash = last.hash();
		}

		match self.headers_buffer.first() {
			Some(first) => {
				let from = first.hash();
				self.last_block_hash = Some(from);
				self.last_rblock_hash = Some(from.reversed());
				self.phase = SessionPhase::BlockSync;
				Some(SyncAction::RequestBlocks(from))
			}
			None => {
				// peer sits exactly on our anchor, nothing to fetch
				self.last_block_hash = Some(self.last_header_hash);
				self.last_rblock_hash = Some(self.last_header_hash.reversed());
				self.initial_sync_complete = true;
				self.phase = SessionPhase::Live;
				None
			}
		}
	}

	/// Handles an inventory announcement.
	pub fn receive_inv(&mut self, items: Vec<InvItem>) -> Vec<SyncAction> {
		let blocks: Vec<InvItem> = items
			.iter()
			.cloned()
			.filter(|i| i.inv_type == INV_BLOCK)
			.collect();
		let txs: Vec<InvItem> = items
			.iter()
			.cloned()
			.filter(|i| i.inv_type == INV_TX)
			.collect();

		let mut actions = vec![];
		if self.header_sync_complete && !self.initial_sync_complete && blocks.len() > 1 {
			// batch response to our getblocks: this is the new in-flight window
			self.requested_blocks = blocks.iter().map(|i| i.hash).collect();
			actions.push(SyncAction::RequestData(blocks));
		} else if self.initial_sync_complete && !blocks.is_empty() {
			// tip gossip, fetch without touching the window
			actions.push(SyncAction::RequestData(blocks));
		}
		if !txs.is_empty() {
			actions.push(SyncAction::RequestData(txs));
		}
		actions
	}

	/// Handles a received block. Returns the follow-up request, if any.
	pub fn receive_block(&mut self, block: Block) -> Option<SyncAction> {
		let hash = block.hash();
		let rhash = hash.reversed();

		if let Some(height) = block.coinbase_height() {
			if height as i64 > self.best_height {
				self.best_height = height as i64;
			}
			self.block_height_map.insert(rhash, height);
		}

		// confirmed transactions leave the tracked mempool
		if !self.mempool.is_empty() {
			let mined: HashSet<Hash> = block.txs.iter().map(|tx| tx.hash()).collect();
			self.mempool.retain(|tx| !mined.contains(&tx.hash()));
		}

		self.block_map.insert(rhash, block);
		self.last_block_hash = Some(hash);
		self.last_rblock_hash = Some(rhash);
		self.requested_blocks.remove(&hash);

		if !self.initial_sync_complete {
			if self.last_block_hash == Some(self.last_header_hash) {
				self.initial_sync_complete = true;
				self.phase = SessionPhase::Live;
			} else if self.requested_blocks.is_empty() {
				// window drained without reaching the header tip, ask for
				// the next stretch
				return Some(SyncAction::RequestBlocks(hash));
			}
		}
		None
	}

	/// Handles a loose transaction announcement.
	pub fn receive_tx(&mut self, tx: Transaction) {
		if self.initial_sync_complete {
			self.mempool.push(tx);
		}
	}

	/// Re-drive block sync for a session that looks stalled. Continues
	/// from the last block seen, or from the anchor if none arrived yet.
	pub fn request_blocks(&mut self) -> SyncAction {
		SyncAction::RequestBlocks(self.last_block_hash.unwrap_or(self.last_header_hash))
	}

	/// Drops the heavy caches. Called exactly once, on destroy.
	pub fn release(&mut self) {
		self.phase = SessionPhase::Dead;
		self.headers_buffer = vec![];
		self.block_map = HashMap::new();
		self.block_height_map = HashMap::new();
		self.requested_blocks = HashSet::new();
		self.mempool = vec![];
	}
}

/// Immutable projection of one session's state, for aggregation and
/// status reporting. Copies are cheap enough: the only map carried over
/// is height data, never block bodies.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
	pub addr: PeerAddr,
	pub peer_hash: String,
	pub user_agent: String,
	pub phase: SessionPhase,
	pub best_height: i64,
	pub header_sync_complete: bool,
	pub initial_sync_complete: bool,
	pub requested_blocks: usize,
	pub headers_buffered: usize,
	pub blocks_received: usize,
	pub mempool_size: usize,
	pub block_height_map: HashMap<RHash, u64>,
	pub last_rblock_hash: Option<RHash>,
}

impl SessionSync {
	/// Project the current state into a snapshot. Session identity comes
	/// from the caller, which owns it.
	pub fn snapshot(&self, addr: PeerAddr, peer_hash: String, user_agent: String) -> SessionSnapshot {
		SessionSnapshot {
			addr,
			peer_hash,
			user_agent,
			phase: self.phase,
			best_height: self.best_height,
			header_sync_complete: self.header_sync_complete,
			initial_sync_complete: self.initial_sync_complete,
			requested_blocks: self.requested_blocks.len(),
			headers_buffered: self.headers_buffer.len(),
			blocks_received: self.block_map.len(),
			mempool_size: self.mempool.len(),
			block_height_map: self.block_height_map.clone(),
			last_rblock_hash: self.last_rblock_hash,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::block::{OutPoint, TxInput, TxOutput};
	use crate::core::hash::ZERO_HASH;

	// Builds a hash-chained run of headers starting after `prev`.
	fn header_chain(prev: Hash, count: usize, salt: u32) -> Vec<BlockHeader> {
		let mut headers = vec![];
		let mut prev_hash = prev;
		for i in 0..count {
			let header = BlockHeader {
				version: 2,
				prev_hash,
				merkle_root: ZERO_HASH,
				timestamp: 1_500_000_000 + salt + i as u32,
				bits: 0x1e0ffff0,
				nonce: i as u32,
			};
			prev_hash = header.hash();
			headers.push(header);
		}
		headers
	}

	fn coinbase(height: u64) -> Transaction {
		let mut script = vec![];
		let mut h = height;
		let mut push = vec![];
		while h > 0 {
			push.push((h & 0xff) as u8);
			h >>= 8;
		}
		script.push(push.len() as u8);
		script.extend(push);
		Transaction {
			version: 1,
			inputs: vec![TxInput {
				prev_output: OutPoint {
					hash: ZERO_HASH,
					index: u32::max_value(),
				},
				script_sig: script,
				sequence: u32::max_value(),
			}],
			outputs: vec![TxOutput {
				value: 50,
				script_pubkey: vec![],
			}],
			lock_time: 0,
			tx_comment: vec![],
		}
	}

	fn block_for(header: &BlockHeader, height: u64) -> Block {
		Block {
			header: header.clone(),
			txs: vec![coinbase(height)],
		}
	}

	fn anchor() -> Hash {
		let mut bytes = [0u8; 32];
		bytes[0] = 0xaa;
		Hash(bytes)
	}

	fn synced_session() -> SessionSync {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(10);
		let headers = header_chain(anchor(), 3, 0);
		sync.receive_headers(headers.clone());
		for (i, h) in headers.iter().enumerate() {
			sync.receive_block(block_for(h, i as u64 + 1));
		}
		assert!(sync.initial_sync_complete);
		sync
	}

	#[test]
	fn begin_header_sync_requests_from_anchor() {
		let mut sync = SessionSync::new(anchor());
		let action = sync.begin_header_sync(1000);
		assert_eq!(action, SyncAction::RequestHeaders(anchor()));
		assert_eq!(sync.phase, SessionPhase::HeaderSync);
		assert_eq!(sync.best_height, 1000);
	}

	#[test]
	fn full_batch_requests_next_from_tip() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(5000);
		let headers = header_chain(anchor(), MAX_BLOCK_HEADERS, 0);
		let tip = headers.last().unwrap().hash();
		let action = sync.receive_headers(headers);
		assert_eq!(action, Some(SyncAction::RequestHeaders(tip)));
		assert!(!sync.header_sync_complete);
		assert_eq!(sync.last_header_hash, tip);
	}

	#[test]
	fn short_batch_completes_and_starts_block_sync() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(5000);
		let headers = header_chain(anchor(), 500, 0);
		let first = headers[0].hash();
		let tip = headers.last().unwrap().hash();
		let action = sync.receive_headers(headers);
		assert!(sync.header_sync_complete);
		assert_eq!(sync.phase, SessionPhase::BlockSync);
		// block sync starts at the oldest buffered header
		assert_eq!(action, Some(SyncAction::RequestBlocks(first)));
		assert_eq!(sync.last_block_hash, Some(first));
		// header sync pinned at the window's tip
		assert_eq!(sync.last_header_hash, tip);
	}

	#[test]
	fn empty_batch_completes_too() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(5000);
		let headers = header_chain(anchor(), MAX_BLOCK_HEADERS, 0);
		sync.receive_headers(headers);
		let action = sync.receive_headers(vec![]);
		assert!(sync.header_sync_complete);
		assert!(action.is_some());
	}

	#[test]
	fn big_batch_resets_window() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(5000);
		let first = header_chain(anchor(), MAX_BLOCK_HEADERS, 0);
		let continuation = header_chain(first.last().unwrap().hash(), MAX_BLOCK_HEADERS, 7);
		sync.receive_headers(first);
		assert_eq!(sync.headers_buffer.len(), MAX_BLOCK_HEADERS);
		sync.receive_headers(continuation);
		// window was reset, not grown
		assert_eq!(sync.headers_buffer.len(), MAX_BLOCK_HEADERS);
	}

	// Full single-peer walk: 2500 headers then blocks until the tip.
	#[test]
	fn two_round_header_sync_then_blocks() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(2500);

		let round1 = header_chain(anchor(), MAX_BLOCK_HEADERS, 0);
		let round2 = header_chain(round1.last().unwrap().hash(), 500, 1);

		let a1 = sync.receive_headers(round1.clone());
		assert_eq!(
			a1,
			Some(SyncAction::RequestHeaders(round1.last().unwrap().hash()))
		);

		let a2 = sync.receive_headers(round2.clone());
		// 500 < 1000 so the window kept both stretches; block sync
		// starts at its oldest header
		assert_eq!(a2, Some(SyncAction::RequestBlocks(round1[0].hash())));
		assert!(sync.header_sync_complete);
		assert_eq!(sync.last_header_hash, round2.last().unwrap().hash());

		// an inv window arrives, we request all of it
		let all: Vec<BlockHeader> = round1.iter().chain(round2.iter()).cloned().collect();
		let inv: Vec<InvItem> = all
			.iter()
			.map(|h| InvItem {
				inv_type: INV_BLOCK,
				hash: h.hash(),
			})
			.collect();
		let actions = sync.receive_inv(inv.clone());
		assert_eq!(actions.len(), 1);
		assert_eq!(sync.requested_blocks.len(), all.len());

		// blocks drain the window; sync completes exactly at the tip
		for (i, h) in all.iter().enumerate() {
			assert!(!sync.initial_sync_complete);
			sync.receive_block(block_for(h, i as u64 + 1));
		}
		assert!(sync.initial_sync_complete);
		assert_eq!(sync.phase, SessionPhase::Live);
		// in-flight window fully drained at the moment sync completed
		assert!(sync.requested_blocks.is_empty());
		assert_eq!(sync.last_block_hash, Some(sync.last_header_hash));
	}

	#[test]
	fn window_drain_without_tip_requests_more_blocks() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(100);
		let headers = header_chain(anchor(), 10, 0);
		sync.receive_headers(headers.clone());

		// peer only advertises the first 5 blocks
		let inv: Vec<InvItem> = headers[..5]
			.iter()
			.map(|h| InvItem {
				inv_type: INV_BLOCK,
				hash: h.hash(),
			})
			.collect();
		sync.receive_inv(inv);

		let mut follow_up = None;
		for (i, h) in headers[..5].iter().enumerate() {
			follow_up = sync.receive_block(block_for(h, i as u64 + 1));
		}
		// drained early: ask for the next stretch from where we stopped
		assert_eq!(
			follow_up,
			Some(SyncAction::RequestBlocks(headers[4].hash()))
		);
		assert!(!sync.initial_sync_complete);
	}

	#[test]
	fn headers_chain_links_within_window() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(100);
		sync.receive_headers(header_chain(anchor(), 50, 0));
		for pair in sync.headers_buffer.windows(2) {
			assert_eq!(pair[1].prev_hash, pair[0].hash());
		}
	}

	#[test]
	fn single_block_inv_ignored_during_initial_sync() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(100);
		sync.receive_headers(header_chain(anchor(), 10, 0));
		let lone = vec![InvItem {
			inv_type: INV_BLOCK,
			hash: anchor(),
		}];
		assert!(sync.receive_inv(lone).is_empty());
		assert!(sync.requested_blocks.is_empty());
	}

	#[test]
	fn live_phase_fetches_gossiped_blocks_without_window() {
		let mut sync = synced_session();
		sync.requested_blocks.insert(anchor());
		let gossip = vec![InvItem {
			inv_type: INV_BLOCK,
			hash: ZERO_HASH,
		}];
		let actions = sync.receive_inv(gossip.clone());
		assert_eq!(actions, vec![SyncAction::RequestData(gossip)]);
		// the in-flight window was not replaced
		assert!(sync.requested_blocks.contains(&anchor()));
	}

	#[test]
	fn tx_inv_always_fetched() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(100);
		let tx_inv = vec![InvItem {
			inv_type: INV_TX,
			hash: ZERO_HASH,
		}];
		let actions = sync.receive_inv(tx_inv.clone());
		assert_eq!(actions, vec![SyncAction::RequestData(tx_inv)]);
	}

	#[test]
	fn mempool_tracks_and_dedups_on_block() {
		let mut sync = synced_session();

		let tx_a = coinbase(500);
		let tx_b = coinbase(501);
		sync.receive_tx(tx_a.clone());
		sync.receive_tx(tx_b.clone());
		assert_eq!(sync.mempool.len(), 2);

		// a block carrying tx_a confirms it out of the mempool
		let header = header_chain(sync.last_block_hash.unwrap(), 1, 3).remove(0);
		let block = Block {
			header,
			txs: vec![coinbase(4), tx_a.clone()],
		};
		sync.receive_block(block);
		assert_eq!(sync.mempool.len(), 1);
		assert_eq!(sync.mempool[0].hash(), tx_b.hash());
	}

	#[test]
	fn mempool_ignored_before_sync_completes() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(100);
		sync.receive_tx(coinbase(1));
		assert!(sync.mempool.is_empty());
	}

	#[test]
	fn block_arrival_raises_best_height() {
		let mut sync = SessionSync::new(anchor());
		sync.begin_header_sync(10);
		let headers = header_chain(anchor(), 1, 0);
		sync.receive_headers(headers.clone());
		sync.receive_block(block_for(&headers[0], 4000));
		assert_eq!(sync.best_height, 4000);
		assert_eq!(
			sync.block_height_map.get(&headers[0].hash().reversed()),
			Some(&4000)
		);
	}

	#[test]
	fn release_drops_caches_and_kills_phase() {
		let mut sync = synced_session();
		assert!(!sync.block_map.is_empty());
		sync.release();
		assert_eq!(sync.phase, SessionPhase::Dead);
		assert!(sync.block_map.is_empty());
		assert!(sync.headers_buffer.is_empty());
		assert!(sync.mempool.is_empty());
	}
}
