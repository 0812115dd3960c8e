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

//! Discovers peers, admits them under the connection cap, supervises
//! their sessions and reaps the dead ones. Sessions feed address gossip
//! back in through the adapter, which keeps the crawler self-healing:
//! a lost peer is replaced by whatever the network announces next.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::common::adapters::NetToScanAdapter;
use crate::common::stats::ScannerStats;
use crate::common::types::{Error, ScannerConfig, Seeding};
use crate::core::global;
use crate::node::ChainNode;
use crate::p2p::{Handshake, PeerAddr, PeerSession, ScanAdapter, SessionSnapshot};
use crate::scan::tip_monitor::{check_reorg, ReorgTrigger};
use crate::util::{Mutex, RwLock, StopState};

/// Cadence of the stall-recovery pass.
const STALL_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);
/// Cadence of the chain-tip watch.
const TIP_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Cadence of the in-memory status refresh.
const STATUS_UPDATE_INTERVAL: Duration = Duration::from_millis(50);
/// Destruction logging is summarized at most this often.
const DESTROY_LOG_INTERVAL: Duration = Duration::from_secs(30);

type ReorgHook = Box<dyn Fn(ReorgTrigger) + Send + Sync>;

struct DestroyedCounter {
	count: u64,
	pending: u64,
	last_log: Option<Instant>,
}

/// Supervises every peer session the scanner runs.
pub struct Supervisor {
	config: ScannerConfig,
	peers: RwLock<HashMap<String, Arc<PeerSession>>>,
	handshake: Arc<Handshake>,
	adapter: Arc<NetToScanAdapter>,
	node: Arc<dyn ChainNode>,
	reorg_hook: Mutex<Option<ReorgHook>>,
	destroyed: Mutex<DestroyedCounter>,
	stop_state: Arc<StopState>,
	threads: Mutex<Vec<JoinHandle<()>>>,
	stats: RwLock<Option<ScannerStats>>,
	// held for the lifetime of the supervisor so a second scanner can't
	// run over the same dir
	_lock_file: Option<Arc<File>>,
}

impl Supervisor {
	/// Builds an idle supervisor. `start` launches the periodic tasks.
	pub fn new(config: ScannerConfig, node: Arc<dyn ChainNode>) -> Result<Arc<Supervisor>, Error> {
		if config.max_peers == 0 {
			return Err(Error::Configuration("max_peers must be positive".into()));
		}
		if config.seeding_type == Seeding::List && config.seeds.is_none() {
			return Err(Error::Configuration(
				"seeds must be configured for seeding type List".into(),
			));
		}

		let lock_file = if config.db_root.is_empty() {
			None
		} else {
			Some(one_scanner_at_a_time(&config.db_root)?)
		};

		let adapter = Arc::new(NetToScanAdapter::new());
		let supervisor = Arc::new(Supervisor {
			config,
			peers: RwLock::new(HashMap::new()),
			handshake: Arc::new(Handshake::new()),
			adapter: adapter.clone(),
			node,
			reorg_hook: Mutex::new(None),
			destroyed: Mutex::new(DestroyedCounter {
				count: 0,
				pending: 0,
				last_log: None,
			}),
			stop_state: Arc::new(StopState::new()),
			threads: Mutex::new(vec![]),
			stats: RwLock::new(None),
			_lock_file: lock_file,
		});
		adapter.init(Arc::downgrade(&supervisor));
		Ok(supervisor)
	}

	/// Launches seeding and the periodic tasks.
	pub fn start(self: &Arc<Self>) -> Result<(), Error> {
		if let Err(e) = self.node.start() {
			warn!("full node not reachable yet: {:?}", e);
		}

		self.spawn_seed_thread()?;
		self.spawn_monitor_thread()?;
		self.spawn_tip_thread()?;
		if !self.config.disable_status_update {
			self.spawn_status_thread()?;
		}
		Ok(())
	}

	/// Admission control plus session construction. Rejects duplicates
	/// and anything over the connection cap; otherwise inserts the
	/// session and dials it off-thread.
	pub fn add_peer(self: &Arc<Self>, addr: PeerAddr) {
		if self.stop_state.is_stopped() {
			return;
		}
		let peer_hash = addr.peer_hash();

		let session = {
			let mut peers = self.peers.write();
			if peers.contains_key(&peer_hash) {
				trace!("add_peer: {} already known", addr);
				return;
			}
			let open_count = peers.values().filter(|p| p.is_open()).count();
			if open_count >= self.config.max_peers || peers.len() >= self.config.max_peers {
				trace!("add_peer: peer cap reached, rejecting {}", addr);
				return;
			}
			let session = Arc::new(PeerSession::new(
				addr.clone(),
				self.handshake.clone(),
				self.adapter.clone() as Arc<dyn ScanAdapter>,
			));
			peers.insert(peer_hash.clone(), session.clone());
			session
		};

		// under programmatic seeding the caller drives the session
		if self.config.seeding_type == Seeding::Programmatic {
			return;
		}

		let supervisor = self.clone();
		let _ = thread::Builder::new()
			.name("peer_connect".to_string())
			.spawn(move || {
				if let Err(e) = session.start() {
					debug!("connect to {} failed: {:?}", addr, e);
					supervisor.remove_peer(&peer_hash, false);
				}
			});
	}

	/// Convenience entry taking the gossip string form.
	pub fn add_peer_str(self: &Arc<Self>, addr: &str) {
		match PeerAddr::from_string(addr) {
			Ok(addr) => self.add_peer(addr),
			Err(_) => debug!("add_peer: unparseable address {}", addr),
		}
	}

	/// Destroys and forgets a session. A no-op for unknown hashes. With
	/// `restart` the address goes straight back through admission.
	pub fn remove_peer(self: &Arc<Self>, peer_hash: &str, restart: bool) {
		let session = {
			let mut peers = self.peers.write();
			peers.remove(peer_hash)
		};
		let session = match session {
			Some(s) => s,
			None => return,
		};

		let addr = session.addr().clone();
		session.destroy();
		self.note_destroyed(&addr);

		if restart && !self.stop_state.is_stopped() {
			self.add_peer(addr);
		}
	}

	// Destruction is constant churn on a healthy crawl, so it is logged
	// as a rate-limited summary instead of a line per session.
	fn note_destroyed(&self, last_addr: &PeerAddr) {
		let mut destroyed = self.destroyed.lock();
		destroyed.count += 1;
		destroyed.pending += 1;
		let due = match destroyed.last_log {
			None => true,
			Some(at) => at.elapsed() >= DESTROY_LOG_INTERVAL,
		};
		if due {
			debug!(
				"destroyed {} sessions ({} total, last {})",
				destroyed.pending, destroyed.count, last_addr
			);
			destroyed.pending = 0;
			destroyed.last_log = Some(Instant::now());
		}
	}

	/// Installs (or replaces) the reorg subscriber. The subscription is
	/// one-shot: it is consumed when fired and must be re-installed.
	pub fn on_reorg_trigger<F>(&self, hook: F)
	where
		F: Fn(ReorgTrigger) + Send + Sync + 'static,
	{
		let mut slot = self.reorg_hook.lock();
		*slot = Some(Box::new(hook));
	}

	/// Whether a reorg subscriber is currently armed.
	pub fn reorg_armed(&self) -> bool {
		self.reorg_hook.lock().is_some()
	}

	/// Number of tracked sessions, any phase.
	pub fn peer_count(&self) -> usize {
		self.peers.read().len()
	}

	/// Whether the provided address currently has a session.
	pub fn is_known(&self, addr: &PeerAddr) -> bool {
		self.peers.read().contains_key(&addr.peer_hash())
	}

	/// Snapshots every session.
	pub fn snapshots(&self) -> Vec<SessionSnapshot> {
		let sessions: Vec<Arc<PeerSession>> = self.peers.read().values().cloned().collect();
		sessions.iter().map(|s| s.snapshot()).collect()
	}

	/// Machine-readable status. Served from the status thread's cache
	/// when it runs, computed on the spot otherwise.
	pub fn stats(&self) -> ScannerStats {
		if let Some(stats) = self.stats.read().clone() {
			return stats;
		}
		ScannerStats::from_snapshots(&self.snapshots(), self.destroyed.lock().count)
	}

	/// Human-readable status dump.
	pub fn inspect(&self) -> String {
		let stats = self.stats();
		let mut out = format!(
			"{} sessions ({} open, {} synced), {} destroyed\n",
			stats.peer_count, stats.open_count, stats.synced_count, stats.destroyed
		);
		for chain in &stats.chains {
			out.push_str(&format!(
				"chain {}: {} peers at height {}\n",
				&chain.chain_id[..16.min(chain.chain_id.len())],
				chain.peer_count,
				chain.best_height
			));
		}
		for session in &stats.sessions {
			out.push_str(&format!(
				"  {} {} {} height {} in-flight {}\n",
				session.addr,
				session.phase,
				session.user_agent,
				session.best_height,
				session.requested_blocks
			));
		}
		out
	}

	/// One pass of the chain-tip watch; public so the behavior can be
	/// driven deterministically from tests.
	pub fn check_chain_tips(&self) {
		let tips = match self.node.chain_tips() {
			Ok(tips) => tips,
			Err(e) => {
				debug!("chain tips unavailable: {:?}", e);
				return;
			}
		};
		let trigger = match check_reorg(
			&tips,
			self.config.reorg_trigger_length,
			self.config.reorg_tip_maxage,
		) {
			Some(t) => t,
			None => return,
		};

		// one-shot: consume the subscriber, re-arming is the caller's
		// explicit choice
		let hook = self.reorg_hook.lock().take();
		if let Some(hook) = hook {
			warn!(
				"reorg trigger: fork at height {} (branchlen {}) vs active {}",
				trigger.reorg_tip.height, trigger.reorg_tip.branchlen, trigger.best_height_tip.height
			);
			hook(trigger);
		}
	}

	/// One pass of stall recovery; public for the same reason.
	pub fn run_stall_recovery(&self) {
		let snapshots = self.snapshots();
		let targets = stall_targets(&snapshots);
		if targets.is_empty() {
			return;
		}
		let peers = self.peers.read();
		for peer_hash in targets {
			if let Some(session) = peers.get(&peer_hash) {
				debug!("unstalling {}", session.addr());
				session.request_blocks();
			}
		}
	}

	// Sessions whose connection died without a disconnect event (the
	// silent error class) linger in the map; sweep them out.
	fn clean_dead_sessions(self: &Arc<Self>) {
		let dead: Vec<String> = {
			let peers = self.peers.read();
			peers
				.iter()
				.filter(|(_, s)| s.is_dead())
				.map(|(hash, _)| hash.clone())
				.collect()
		};
		for peer_hash in dead {
			self.remove_peer(&peer_hash, false);
		}
	}

	/// Stops all periodic tasks and destroys every session.
	pub fn stop(&self) {
		self.stop_state.stop();
		let sessions: Vec<Arc<PeerSession>> = {
			let mut peers = self.peers.write();
			peers.drain().map(|(_, s)| s).collect()
		};
		for session in sessions {
			session.destroy();
		}
		let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
		for handle in handles {
			let _ = handle.join();
		}
	}

	// T1: resolve every DNS seed concurrently, once, feeding whatever
	// comes back through normal admission. Failures are best-effort
	// silent.
	fn spawn_seed_thread(self: &Arc<Self>) -> Result<(), Error> {
		let supervisor = self.clone();
		let handle = thread::Builder::new()
			.name("seed".to_string())
			.spawn(move || {
				let seeds: Vec<String> = match supervisor.config.seeding_type {
					Seeding::None | Seeding::Programmatic => {
						debug!("no seeding, waiting for peers to be added");
						return;
					}
					Seeding::List => supervisor.config.seeds.clone().unwrap_or_default(),
					Seeding::DNSSeed => {
						let port = global::default_port();
						let resolvers: Vec<JoinHandle<Vec<String>>> = global::dns_seeds()
							.into_iter()
							.map(|seed| {
								thread::spawn(move || match (seed.as_str(), port).to_socket_addrs()
								{
									Ok(addrs) => addrs.map(|a| a.to_string()).collect(),
									Err(e) => {
										debug!("failed to resolve seed {}: {}", seed, e);
										vec![]
									}
								})
							})
							.collect();
						resolvers
							.into_iter()
							.flat_map(|h| h.join().unwrap_or_default())
							.collect()
					}
				};
				info!("seeding from {} addresses", seeds.len());
				for seed in seeds {
					supervisor.add_peer_str(&seed);
				}
			})
			.map_err(Error::IO)?;
		self.threads.lock().push(handle);
		Ok(())
	}

	// T2 plus the dead-session sweep, on a one second cadence loop.
	fn spawn_monitor_thread(self: &Arc<Self>) -> Result<(), Error> {
		let supervisor = self.clone();
		let handle = thread::Builder::new()
			.name("scan_monitor".to_string())
			.spawn(move || {
				let mut last_stall_check = Instant::now();
				loop {
					if supervisor.stop_state.is_stopped() {
						break;
					}
					supervisor.clean_dead_sessions();
					if last_stall_check.elapsed() >= STALL_RECOVERY_INTERVAL {
						last_stall_check = Instant::now();
						supervisor.run_stall_recovery();
					}
					thread::sleep(Duration::from_secs(1));
				}
			})
			.map_err(Error::IO)?;
		self.threads.lock().push(handle);
		Ok(())
	}

	// T3: poll the node's chain tips and fire the armed subscriber.
	fn spawn_tip_thread(self: &Arc<Self>) -> Result<(), Error> {
		let supervisor = self.clone();
		let handle = thread::Builder::new()
			.name("tip_monitor".to_string())
			.spawn(move || loop {
				if supervisor.stop_state.is_stopped() {
					break;
				}
				supervisor.check_chain_tips();
				thread::sleep(TIP_CHECK_INTERVAL);
			})
			.map_err(Error::IO)?;
		self.threads.lock().push(handle);
		Ok(())
	}

	// T4: keep the cached status fresh for whoever renders it.
	fn spawn_status_thread(self: &Arc<Self>) -> Result<(), Error> {
		let supervisor = self.clone();
		let handle = thread::Builder::new()
			.name("status".to_string())
			.spawn(move || loop {
				if supervisor.stop_state.is_stopped() {
					break;
				}
				let stats = ScannerStats::from_snapshots(
					&supervisor.snapshots(),
					supervisor.destroyed.lock().count,
				);
				{
					let mut cached = supervisor.stats.write();
					*cached = Some(stats);
				}
				thread::sleep(STATUS_UPDATE_INTERVAL);
			})
			.map_err(Error::IO)?;
		self.threads.lock().push(handle);
		Ok(())
	}
}

/// Sessions that finished their header walk, sit below the best height
/// any peer advertises and have an empty in-flight window are presumed
/// stalled and get their block sync re-driven.
pub fn stall_targets(snapshots: &[SessionSnapshot]) -> Vec<String> {
	let max_height = snapshots.iter().map(|s| s.best_height).max().unwrap_or(0);
	snapshots
		.iter()
		.filter(|s| {
			s.header_sync_complete && s.best_height < max_height && s.requested_blocks == 0
		})
		.map(|s| s.peer_hash.clone())
		.collect()
}

// Exclusive (advisory) lock file so we do not run multiple scanner
// instances over the same dir.
fn one_scanner_at_a_time(db_root: &str) -> Result<Arc<File>, Error> {
	let path = Path::new(db_root);
	fs::create_dir_all(path)?;
	let path = path.join("floscan.lock");
	let lock_file = fs::OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.open(&path)?;
	lock_file.try_lock_exclusive().map_err(|e| {
		error!("failed to lock {:?} (scanner already running?)", path);
		Error::IO(e)
	})?;
	Ok(Arc::new(lock_file))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::p2p::{SessionPhase, SessionSnapshot};
	use std::collections::HashMap;

	fn snapshot(addr: &str, best_height: i64, synced_headers: bool, in_flight: usize) -> SessionSnapshot {
		let addr = PeerAddr::from_string(addr).unwrap();
		SessionSnapshot {
			peer_hash: addr.peer_hash(),
			addr,
			user_agent: "/flod:0.15.2/".to_string(),
			phase: SessionPhase::BlockSync,
			best_height,
			header_sync_complete: synced_headers,
			initial_sync_complete: false,
			requested_blocks: in_flight,
			headers_buffered: 0,
			blocks_received: 0,
			mempool_size: 0,
			block_height_map: HashMap::new(),
			last_rblock_hash: None,
		}
	}

	#[test]
	fn lagging_idle_peer_is_a_stall_target() {
		let lagging = snapshot("10.0.0.1:7312", 1000, true, 0);
		let ahead = snapshot("10.0.0.2:7312", 1050, true, 3);
		let targets = stall_targets(&[lagging.clone(), ahead]);
		assert_eq!(targets, vec![lagging.peer_hash]);
	}

	#[test]
	fn busy_or_unsynced_peers_are_left_alone() {
		// still downloading headers
		let unsynced = snapshot("10.0.0.1:7312", 1000, false, 0);
		// behind but has requests in flight
		let busy = snapshot("10.0.0.2:7312", 1000, true, 5);
		// the best peer itself
		let best = snapshot("10.0.0.3:7312", 1050, true, 0);
		let targets = stall_targets(&[unsynced, busy, best]);
		// nobody qualifies; the best peer is not below the max height
		assert!(targets.is_empty());
	}

	#[test]
	fn no_peers_no_targets() {
		assert!(stall_targets(&[]).is_empty());
	}
}
