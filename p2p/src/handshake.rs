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

//! Version negotiation on a freshly dialed connection. We send our
//! version, expect the peer's version and a verack back, and settle the
//! peer's advertised identity from what it sent.

use std::collections::VecDeque;
use std::io;
use std::net::TcpStream;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::msg::{self, Empty, Type, Version};
use crate::types::{Error, PeerAddr, PeerInfo, Services};
use crate::util::RwLock;

/// How long we give a peer to complete the version exchange before
/// declaring it stalling.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Remember this many of our own handshake nonces to recognize a dial
/// that looped back to us.
const NONCES_CAP: usize = 100;

/// Handshake factory shared by all sessions, tracking the nonces we
/// handed out.
pub struct Handshake {
	nonces: RwLock<VecDeque<u64>>,
}

impl Handshake {
	pub fn new() -> Handshake {
		Handshake {
			nonces: RwLock::new(VecDeque::with_capacity(NONCES_CAP)),
		}
	}

	/// Runs the connect-side version exchange on the provided stream.
	/// Returns the peer's settled info.
	pub fn connect(&self, stream: &mut TcpStream, addr: &PeerAddr) -> Result<PeerInfo, Error> {
		stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
		stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs() as i64)
			.unwrap_or(0);
		let version = Version::new(addr, now, 0);
		{
			let mut nonces = self.nonces.write();
			nonces.push_back(version.nonce);
			if nonces.len() > NONCES_CAP {
				nonces.pop_front();
			}
		}
		msg::write_message(stream, Type::Version, &version)?;

		// peers send version and verack in either order; collect both,
		// dropping anything else that arrives early
		let mut peer_version: Option<Version> = None;
		let mut got_verack = false;
		while peer_version.is_none() || !got_verack {
			let header = msg::read_header(stream).map_err(stalling)?;
			let body = msg::read_body(stream, &header).map_err(stalling)?;
			match Type::from_command(&header.command) {
				Some(Type::Version) => {
					let v: Version = msg::decode(&body)?;
					if self.nonces.read().contains(&v.nonce) {
						return Err(Error::PeerWithSelf);
					}
					msg::write_message(stream, Type::Verack, &Empty)?;
					peer_version = Some(v);
				}
				Some(Type::Verack) => {
					got_verack = true;
				}
				_ => {
					trace!("{}: {} before handshake settled", addr, header.command);
				}
			}
		}

		let v = peer_version.expect("loop above cannot exit without a version");
		Ok(PeerInfo {
			addr: addr.clone(),
			user_agent: v.user_agent,
			version: v.version,
			services: Services::from_bits_truncate(v.services),
			start_height: v.start_height as i64,
		})
	}
}

// A peer that accepted the dial but goes quiet mid-handshake is
// stalling, which has its own (quiet) disconnect classification.
fn stalling(e: Error) -> Error {
	match e {
		Error::Connection(ref io_err)
			if io_err.kind() == io::ErrorKind::WouldBlock
				|| io_err.kind() == io::ErrorKind::TimedOut =>
		{
			Error::Timeout
		}
		e => e,
	}
}
