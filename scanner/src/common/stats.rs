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

//! Scanner stat collection types, to be used by tests, logging or a UI
//! to collect information about scanner status.

use chrono::prelude::{DateTime, Utc};

use crate::p2p::{SessionPhase, SessionSnapshot};
use crate::scan::chain_view::ChainView;

/// Stats snapshot of the whole scanner.
#[derive(Clone, Debug)]
pub struct ScannerStats {
	/// Number of tracked sessions, any phase
	pub peer_count: usize,
	/// Sessions with a live handshaked connection
	pub open_count: usize,
	/// Sessions past their initial sync
	pub synced_count: usize,
	/// Sessions destroyed over the scanner's lifetime
	pub destroyed: u64,
	/// One entry per observed chain
	pub chains: Vec<ChainStats>,
	/// One entry per session
	pub sessions: Vec<SessionStats>,
	/// When this snapshot was taken
	pub updated: DateTime<Utc>,
}

/// Aggregate information about one observed chain.
#[derive(Clone, Debug)]
pub struct ChainStats {
	/// Opaque chain label
	pub chain_id: String,
	/// Number of peers agreeing on it
	pub peer_count: usize,
	/// Best height any of them reported
	pub best_height: i64,
	/// Their best block, display order
	pub best_hash: Option<String>,
}

/// Struct to return relevant information about a peer session.
#[derive(Clone, Debug)]
pub struct SessionStats {
	/// Address
	pub addr: String,
	/// Peer user agent string
	pub user_agent: String,
	/// Current phase of the session
	pub phase: String,
	/// Height reported by the peer
	pub best_height: i64,
	/// Header walk finished
	pub header_sync_complete: bool,
	/// Initial block sync finished
	pub initial_sync_complete: bool,
	/// Blocks requested and not yet received
	pub requested_blocks: usize,
	/// Blocks received from this peer
	pub blocks_received: usize,
	/// Transactions tracked since sync completed
	pub mempool_size: usize,
}

impl SessionStats {
	/// Convert from a session snapshot directly.
	pub fn from_snapshot(snap: &SessionSnapshot) -> SessionStats {
		let phase = match snap.phase {
			SessionPhase::Dialing => "Dialing",
			SessionPhase::Handshaking => "Handshaking",
			SessionPhase::Open => "Open",
			SessionPhase::HeaderSync => "HeaderSync",
			SessionPhase::BlockSync => "BlockSync",
			SessionPhase::Live => "Live",
			SessionPhase::Dead => "Dead",
		};
		SessionStats {
			addr: snap.addr.to_string(),
			user_agent: snap.user_agent.clone(),
			phase: phase.to_string(),
			best_height: snap.best_height,
			header_sync_complete: snap.header_sync_complete,
			initial_sync_complete: snap.initial_sync_complete,
			requested_blocks: snap.requested_blocks,
			blocks_received: snap.blocks_received,
			mempool_size: snap.mempool_size,
		}
	}
}

impl ScannerStats {
	/// Folds session snapshots and their chain view into one stats
	/// record.
	pub fn from_snapshots(snapshots: &[SessionSnapshot], destroyed: u64) -> ScannerStats {
		let view = ChainView::build(snapshots);
		let chains = view
			.chains
			.iter()
			.map(|entry| {
				let bucket = &view.peer_map[&entry.chain_id];
				ChainStats {
					chain_id: entry.chain_id.clone(),
					peer_count: bucket.peers.len(),
					best_height: bucket.best_height,
					best_hash: bucket.best_hash.map(|h| h.to_hex()),
				}
			})
			.collect();

		ScannerStats {
			peer_count: snapshots.len(),
			open_count: snapshots.iter().filter(|s| s.phase.is_open()).count(),
			synced_count: snapshots
				.iter()
				.filter(|s| s.initial_sync_complete)
				.count(),
			destroyed,
			chains,
			sessions: snapshots.iter().map(SessionStats::from_snapshot).collect(),
			updated: Utc::now(),
		}
	}
}
