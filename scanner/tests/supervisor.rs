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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use floscan_p2p as p2p;
use floscan_scanner as scanner;
use floscan_util as util;

use crate::p2p::{Handshake, PeerAddr, PeerSession, ScanAdapter, SessionPhase};
use crate::scanner::{ChainNode, ChainTip, Error, ScannerConfig, Seeding, Supervisor};
use crate::util::Mutex;

// A node stub serving whatever tips the test sets up.
struct StubNode {
	tips: Mutex<Vec<ChainTip>>,
}

impl StubNode {
	fn new() -> Arc<StubNode> {
		Arc::new(StubNode {
			tips: Mutex::new(vec![]),
		})
	}

	fn set_tips(&self, tips: Vec<ChainTip>) {
		*self.tips.lock() = tips;
	}
}

impl ChainNode for StubNode {
	fn start(&self) -> Result<(), Error> {
		Ok(())
	}
	fn height(&self) -> Result<u64, Error> {
		Ok(self.tips.lock().iter().map(|t| t.height).max().unwrap_or(0))
	}
	fn synced(&self) -> Result<bool, Error> {
		Ok(true)
	}
	fn tip(&self) -> Result<floscan_core::hash::RHash, Error> {
		Err(Error::Node("no tip".to_string()))
	}
	fn chain_tips(&self) -> Result<Vec<ChainTip>, Error> {
		Ok(self.tips.lock().clone())
	}
}

fn test_config(max_peers: usize) -> ScannerConfig {
	let mut config = ScannerConfig::default();
	config.max_peers = max_peers;
	// no lock file, no DNS resolution, no dialing in tests
	config.db_root = String::new();
	config.seeding_type = Seeding::Programmatic;
	config.disable_status_update = true;
	config
}

fn tip(height: u64, branchlen: u64, status: &str) -> ChainTip {
	ChainTip {
		height,
		hash: format!("{:064x}", height),
		branchlen,
		status: status.to_string(),
	}
}

// Unroutable TEST-NET-3 addresses: sessions stay in Dialing while the
// admission bookkeeping under test settles synchronously.
fn test_addr(i: usize) -> PeerAddr {
	PeerAddr::from_string(&format!("203.0.113.{}:7312", i)).unwrap()
}

#[test]
fn duplicate_addresses_yield_one_session() {
	let supervisor = Supervisor::new(test_config(10), StubNode::new()).unwrap();

	supervisor.add_peer(test_addr(1));
	supervisor.add_peer(test_addr(1));
	assert_eq!(supervisor.peer_count(), 1);
	assert!(supervisor.is_known(&test_addr(1)));
}

#[test]
fn gossip_with_duplicates_only_admits_new_addresses() {
	let supervisor = Supervisor::new(test_config(10), StubNode::new()).unwrap();

	// three peers already known
	for i in 1..=3 {
		supervisor.add_peer(test_addr(i));
	}
	assert_eq!(supervisor.peer_count(), 3);

	// five announced, three of them duplicates
	for i in 1..=5 {
		supervisor.add_peer(test_addr(i));
	}
	assert_eq!(supervisor.peer_count(), 5);
}

#[test]
fn session_count_never_exceeds_max_peers() {
	let supervisor = Supervisor::new(test_config(3), StubNode::new()).unwrap();

	for i in 1..=20 {
		supervisor.add_peer(test_addr(i));
		assert!(supervisor.peer_count() <= 3);
	}
	assert_eq!(supervisor.peer_count(), 3);
}

#[test]
fn remove_peer_is_noop_for_unknown_hash() {
	let supervisor = Supervisor::new(test_config(10), StubNode::new()).unwrap();
	supervisor.add_peer(test_addr(1));
	supervisor.remove_peer("0000000000000000000000000000000000000000000000000000000000000000", false);
	assert_eq!(supervisor.peer_count(), 1);
}

#[test]
fn remove_peer_forgets_the_session() {
	let supervisor = Supervisor::new(test_config(10), StubNode::new()).unwrap();
	let addr = test_addr(1);
	supervisor.add_peer(addr.clone());
	supervisor.remove_peer(&addr.peer_hash(), false);
	assert_eq!(supervisor.peer_count(), 0);
	// the slot is free again
	supervisor.add_peer(addr.clone());
	assert_eq!(supervisor.peer_count(), 1);
}

struct NullAdapter;
impl ScanAdapter for NullAdapter {
	fn peer_addrs_received(&self, _addrs: Vec<PeerAddr>) {}
	fn peer_disconnected(&self, _peer_hash: &str, _was_open: bool) {}
}

#[test]
fn destroy_is_idempotent() {
	let session = PeerSession::new(
		test_addr(1),
		Arc::new(Handshake::new()),
		Arc::new(NullAdapter),
	);
	assert!(!session.is_dead());
	session.destroy();
	assert!(session.is_dead());
	assert_eq!(session.snapshot().phase, SessionPhase::Dead);
	// the second call must change nothing
	session.destroy();
	assert!(session.is_dead());
}

#[test]
fn reorg_subscription_is_one_shot() {
	let node = StubNode::new();
	let supervisor = Supervisor::new(test_config(10), node.clone()).unwrap();
	node.set_tips(vec![tip(1000, 0, "active"), tip(998, 12, "valid-fork")]);

	let fired = Arc::new(AtomicUsize::new(0));
	let fired_hook = fired.clone();
	supervisor.on_reorg_trigger(move |trigger| {
		assert_eq!(trigger.best_height_tip.height, 1000);
		assert_eq!(trigger.reorg_tip.branchlen, 12);
		fired_hook.fetch_add(1, Ordering::SeqCst);
	});
	assert!(supervisor.reorg_armed());

	supervisor.check_chain_tips();
	assert_eq!(fired.load(Ordering::SeqCst), 1);
	assert!(!supervisor.reorg_armed());

	// still reorging, but the subscription was consumed
	supervisor.check_chain_tips();
	assert_eq!(fired.load(Ordering::SeqCst), 1);

	// re-arming fires again
	let fired_hook = fired.clone();
	supervisor.on_reorg_trigger(move |_| {
		fired_hook.fetch_add(1, Ordering::SeqCst);
	});
	supervisor.check_chain_tips();
	assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn aged_out_fork_does_not_fire() {
	let node = StubNode::new();
	let supervisor = Supervisor::new(test_config(10), node.clone()).unwrap();
	node.set_tips(vec![tip(2000, 0, "active"), tip(1500, 12, "valid-fork")]);

	let fired = Arc::new(AtomicUsize::new(0));
	let fired_hook = fired.clone();
	supervisor.on_reorg_trigger(move |_| {
		fired_hook.fetch_add(1, Ordering::SeqCst);
	});

	supervisor.check_chain_tips();
	assert_eq!(fired.load(Ordering::SeqCst), 0);
	// the subscription stays armed for when a real one shows up
	assert!(supervisor.reorg_armed());
}

#[test]
fn stop_destroys_all_sessions() {
	let supervisor = Supervisor::new(test_config(10), StubNode::new()).unwrap();
	for i in 1..=4 {
		supervisor.add_peer(test_addr(i));
	}
	supervisor.stop();
	assert_eq!(supervisor.peer_count(), 0);
	// admission is closed after stop
	supervisor.add_peer(test_addr(9));
	assert_eq!(supervisor.peer_count(), 0);
}
