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

//! One supervised connection to a remote peer, from dial to death. Owns
//! the socket, the sync state and the caches; everything is released
//! when the session is destroyed.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::conn::{self, ConnHandle, Tracker};
use crate::core::global;
use crate::core::hash::Hash;
use crate::handshake::Handshake;
use crate::msg::{Empty, Inv, InvItem, Locator, Type};
use crate::protocol::Protocol;
use crate::sync::{SessionPhase, SessionSnapshot, SessionSync, SyncAction};
use crate::types::{Error, PeerAddr, PeerInfo, ScanAdapter};
use crate::util::RwLock;

/// How long a dial may take before the address is written off.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A session with a single remote peer.
pub struct PeerSession {
	addr: PeerAddr,
	peer_hash: String,
	/// Populated once the version exchange settles.
	pub info: RwLock<Option<PeerInfo>>,
	state: RwLock<SessionSync>,
	conn: RwLock<Option<ConnHandle>>,
	stream: RwLock<Option<TcpStream>>,
	tracker: Tracker,
	stop: Arc<AtomicBool>,
	dead: AtomicBool,
	handshake: Arc<Handshake>,
	adapter: Arc<dyn ScanAdapter>,
}

impl PeerSession {
	/// Builds an idle session for the provided address. Nothing happens
	/// until `start` is called.
	pub fn new(
		addr: PeerAddr,
		handshake: Arc<Handshake>,
		adapter: Arc<dyn ScanAdapter>,
	) -> PeerSession {
		let peer_hash = addr.peer_hash();
		PeerSession {
			addr,
			peer_hash,
			info: RwLock::new(None),
			state: RwLock::new(SessionSync::new(global::bootstrap_hash())),
			conn: RwLock::new(None),
			stream: RwLock::new(None),
			tracker: Tracker::new(),
			stop: Arc::new(AtomicBool::new(false)),
			dead: AtomicBool::new(false),
			handshake,
			adapter,
		}
	}

	/// The session's address.
	pub fn addr(&self) -> &PeerAddr {
		&self.addr
	}

	/// The session's stable identity.
	pub fn peer_hash(&self) -> &str {
		&self.peer_hash
	}

	/// Dials the peer, performs the version exchange and starts the
	/// connection threads. Blocking; run from a connect thread.
	pub fn start(self: &Arc<Self>) -> Result<(), Error> {
		let sock_addr = self.addr.to_socket_addr()?;
		let mut stream = TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT)?;
		{
			let mut state = self.state.write();
			state.phase = SessionPhase::Handshaking;
		}

		let info = self.handshake.connect(&mut stream, &self.addr)?;
		debug!(
			"connected to {} ({}, protocol {}, height {})",
			self.addr, info.user_agent, info.version, info.start_height
		);

		let start_height = info.start_height;
		{
			let mut info_ref = self.info.write();
			*info_ref = Some(info);
		}
		{
			let mut state = self.state.write();
			state.phase = SessionPhase::Open;
		}
		{
			let mut stream_ref = self.stream.write();
			*stream_ref = Some(stream.try_clone()?);
		}

		let protocol = Protocol::new(self.clone(), self.adapter.clone());
		let handle = conn::listen(
			stream,
			self.addr.to_string(),
			protocol,
			self.tracker.clone(),
			self.stop.clone(),
		)?;
		{
			let mut conn_ref = self.conn.write();
			*conn_ref = Some(handle);
		}

		// ask for addresses right away, then begin the header walk; the
		// recurring getaddr tick lives with the connection's writer
		self.send(Type::GetAddr, &Empty)?;
		let action = self.state.write().begin_header_sync(start_height);
		self.execute(action);
		Ok(())
	}

	/// True while the session holds a handshaked connection.
	pub fn is_open(&self) -> bool {
		self.state.read().phase.is_open()
	}

	/// Whether the session reached its terminal phase.
	pub fn is_dead(&self) -> bool {
		self.state.read().phase == SessionPhase::Dead
	}

	/// Grants the protocol layer access to the sync state.
	pub(crate) fn state(&self) -> &RwLock<SessionSync> {
		&self.state
	}

	pub(crate) fn mark_dead(&self) {
		self.state.write().release();
	}

	/// Runs the request a sync handler asked for. Failures are left to
	/// the disconnect path; a request that cannot be sent means the
	/// connection is already going away.
	pub(crate) fn execute(&self, action: SyncAction) {
		let result = match action {
			SyncAction::RequestHeaders(from) => self.send_get_headers(from),
			SyncAction::RequestBlocks(from) => self.send_get_blocks(from),
			SyncAction::RequestData(items) => self.send_get_data(items),
		};
		if let Err(e) = result {
			trace!("{}: could not send request: {:?}", self.addr, e);
		}
	}

	/// Requests headers following the provided hash.
	pub fn send_get_headers(&self, from: Hash) -> Result<(), Error> {
		self.send(Type::GetHeaders, &Locator::from_hash(from))
	}

	/// Requests block inventory following the provided hash.
	pub fn send_get_blocks(&self, from: Hash) -> Result<(), Error> {
		self.send(Type::GetBlocks, &Locator::from_hash(from))
	}

	/// Requests the listed inventory items.
	pub fn send_get_data(&self, items: Vec<InvItem>) -> Result<(), Error> {
		self.send(Type::GetData, &Inv { items })
	}

	/// Asks the peer for more addresses.
	pub fn send_get_addr(&self) -> Result<(), Error> {
		self.send(Type::GetAddr, &Empty)
	}

	/// Re-drives block sync on a session the supervisor considers
	/// stalled.
	pub fn request_blocks(&self) {
		let action = self.state.write().request_blocks();
		self.execute(action);
	}

	// All sends funnel through here: a closed connection is not an
	// error worth surfacing, the disconnect path is already on its way.
	pub(crate) fn send<T: crate::core::ser::Writeable>(
		&self,
		msg_type: Type,
		body: &T,
	) -> Result<(), Error> {
		let conn = self.conn.read();
		match conn.as_ref() {
			Some(handle) => match handle.send(msg_type, body) {
				Ok(()) => Ok(()),
				Err(Error::ConnectionClose) => Ok(()),
				Err(e) => Err(e),
			},
			None => Ok(()),
		}
	}

	/// Bytes sent and received on this session's connection.
	pub fn transmitted_bytes(&self) -> (u64, u64) {
		let sent = *self.tracker.sent_bytes.lock();
		let received = *self.tracker.received_bytes.lock();
		(sent, received)
	}

	/// Immutable view of the session for aggregation and status.
	pub fn snapshot(&self) -> SessionSnapshot {
		let user_agent = self
			.info
			.read()
			.as_ref()
			.map(|i| i.user_agent.clone())
			.unwrap_or_default();
		self.state
			.read()
			.snapshot(self.addr.clone(), self.peer_hash.clone(), user_agent)
	}

	/// Tears the session down: timers and threads stop, the socket is
	/// closed, heavy caches are released. Safe to call any number of
	/// times; only the first does anything.
	pub fn destroy(&self) {
		if self.dead.swap(true, Ordering::SeqCst) {
			return;
		}
		self.stop.store(true, Ordering::Relaxed);
		{
			let stream = self.stream.read();
			if let Some(s) = stream.as_ref() {
				let _ = s.shutdown(Shutdown::Both);
			}
		}
		{
			let mut conn = self.conn.write();
			*conn = None;
		}
		self.state.write().release();
	}
}
