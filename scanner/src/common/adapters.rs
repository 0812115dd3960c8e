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

//! Adapter wiring peer-session callbacks back into the supervisor. The
//! supervisor holds the adapter and the adapter holds a weak reference
//! back, initialized late because both sides need the other at
//! construction time.

use std::sync::Weak;

use crate::p2p::{PeerAddr, ScanAdapter};
use crate::scan::supervisor::Supervisor;
use crate::util::OneTime;

/// Routes gossip and disconnects from the network layer into the
/// supervisor that owns the sessions.
pub struct NetToScanAdapter {
	supervisor: OneTime<Weak<Supervisor>>,
}

impl NetToScanAdapter {
	pub fn new() -> NetToScanAdapter {
		NetToScanAdapter {
			supervisor: OneTime::new(),
		}
	}

	/// Wires the adapter to its supervisor. Call exactly once, right
	/// after the supervisor is built.
	pub fn init(&self, supervisor: Weak<Supervisor>) {
		self.supervisor.init(supervisor);
	}

	fn supervisor(&self) -> Option<std::sync::Arc<Supervisor>> {
		self.supervisor.borrow().upgrade()
	}
}

impl ScanAdapter for NetToScanAdapter {
	fn peer_addrs_received(&self, addrs: Vec<PeerAddr>) {
		if let Some(supervisor) = self.supervisor() {
			for addr in addrs {
				supervisor.add_peer(addr);
			}
		}
	}

	fn peer_disconnected(&self, peer_hash: &str, was_open: bool) {
		if let Some(supervisor) = self.supervisor() {
			// a session that was actually open is worth dialing again,
			// a failed dial is not
			supervisor.remove_peer(peer_hash, was_open);
		}
	}
}
