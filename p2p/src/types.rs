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

use std::convert::From;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::core::hash::sha256;
use crate::core::ser;
use crate::util::to_hex;

/// Maximum number of peer addresses accepted from a single addr message.
pub const MAX_PEER_ADDRS: u32 = 1000;

#[derive(Debug)]
pub enum Error {
	Serialization(ser::Error),
	Connection(io::Error),
	/// Header of a received message doesn't match the expected magic.
	BadMagic,
	/// Checksum of a received message doesn't match its payload.
	BadChecksum,
	/// Send or receive on a connection that was already closed.
	ConnectionClose,
	/// Peer is stalling: it accepted the connection but never completed
	/// the version exchange.
	Timeout,
	/// We dialed ourselves (nonce echo during handshake).
	PeerWithSelf,
	/// Anything else that went wrong during the version exchange.
	Handshake(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Serialization(e)
	}
}
impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Connection(e)
	}
}

/// How a connection failure should be surfaced. Connection resets are
/// constant background noise on a public network and carry no signal;
/// refused or unreachable peers are expected churn worth a disconnect
/// event but not a log line; anything else is unexpected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorClass {
	/// Swallow entirely: no log, no disconnect event.
	Silent,
	/// Emit the disconnect event, skip logging.
	Quiet,
	/// Log at error level and emit the disconnect event.
	Loud,
}

impl Error {
	/// Classify this error per the three-tier policy above.
	pub fn classify(&self) -> ErrorClass {
		match self {
			Error::Connection(e) => match e.kind() {
				io::ErrorKind::ConnectionReset => ErrorClass::Silent,
				io::ErrorKind::ConnectionRefused
				| io::ErrorKind::ConnectionAborted
				| io::ErrorKind::BrokenPipe
				| io::ErrorKind::TimedOut
				| io::ErrorKind::UnexpectedEof => ErrorClass::Quiet,
				_ => {
					// EHOSTUNREACH has no stable ErrorKind to match on
					if e.to_string().contains("unreachable") {
						ErrorClass::Quiet
					} else {
						ErrorClass::Loud
					}
				}
			},
			Error::Timeout | Error::ConnectionClose => ErrorClass::Quiet,
			_ => ErrorClass::Loud,
		}
	}
}

bitflags! {
	/// Services advertised by a node in its version message. The scanner
	/// itself advertises none.
	pub struct Services: u64 {
		/// No services.
		const UNKNOWN = 0b0000_0000;
		/// Can serve the full block chain.
		const NETWORK = 0b0000_0001;
	}
}

/// Network address of a peer, kept in its canonical `host:port` string
/// form since that string is also the peer's identity for gossip dedup.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
	/// IPv4 or IPv6 literal
	pub host: String,
	/// TCP port
	pub port: u16,
}

impl PeerAddr {
	pub fn new(host: String, port: u16) -> PeerAddr {
		PeerAddr { host, port }
	}

	/// Parses a `host:port` string, accepting both `1.2.3.4:7312` and
	/// `[2001:db8::1]:7312` forms.
	pub fn from_string(s: &str) -> Result<PeerAddr, Error> {
		if let Ok(sa) = s.parse::<SocketAddr>() {
			return Ok(PeerAddr {
				host: sa.ip().to_string(),
				port: sa.port(),
			});
		}
		let idx = s
			.rfind(':')
			.ok_or_else(|| Error::Handshake(format!("unparseable address: {}", s)))?;
		let port = s[idx + 1..]
			.parse::<u16>()
			.map_err(|_| Error::Handshake(format!("unparseable port: {}", s)))?;
		Ok(PeerAddr {
			host: s[..idx].trim_matches(|c| c == '[' || c == ']').to_string(),
			port,
		})
	}

	/// Resolves to a socket address for dialing.
	pub fn to_socket_addr(&self) -> Result<SocketAddr, Error> {
		if let Ok(ip) = self.host.parse() {
			return Ok(SocketAddr::new(ip, self.port));
		}
		(self.host.as_str(), self.port)
			.to_socket_addrs()?
			.next()
			.ok_or(Error::Connection(io::Error::new(
				io::ErrorKind::AddrNotAvailable,
				"no address resolved",
			)))
	}

	/// The stable identity of this address: hex sha256 of the canonical
	/// `host:port` string. Gossip dedup and the supervisor's peer map key
	/// off this.
	pub fn peer_hash(&self) -> String {
		to_hex(sha256(self.to_string().as_bytes()))
	}
}

impl fmt::Display for PeerAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.host.contains(':') {
			write!(f, "[{}]:{}", self.host, self.port)
		} else {
			write!(f, "{}:{}", self.host, self.port)
		}
	}
}

/// General information about a connected peer, settled at handshake.
#[derive(Clone, Debug)]
pub struct PeerInfo {
	pub addr: PeerAddr,
	pub user_agent: String,
	pub version: i32,
	pub services: Services,
	/// Best height the peer advertised during the version exchange.
	pub start_height: i64,
}

/// Bridge between a peer session and the component supervising it. The
/// supervisor decides what to do with gossiped addresses and with
/// sessions that died.
pub trait ScanAdapter: Send + Sync {
	/// A list of peer addresses has been announced by a connected peer.
	fn peer_addrs_received(&self, addrs: Vec<PeerAddr>);

	/// A session failed in a way that warrants supervision. `was_open`
	/// reports whether the session had a completed handshake at the time.
	fn peer_disconnected(&self, peer_hash: &str, was_open: bool);
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn peer_addr_parsing() {
		let a = PeerAddr::from_string("1.2.3.4:7312").unwrap();
		assert_eq!(a.host, "1.2.3.4");
		assert_eq!(a.port, 7312);
		assert_eq!(a.to_string(), "1.2.3.4:7312");

		let b = PeerAddr::from_string("[2001:db8::1]:7312").unwrap();
		assert_eq!(b.host, "2001:db8::1");
		assert_eq!(b.port, 7312);
		assert_eq!(b.to_string(), "[2001:db8::1]:7312");
	}

	#[test]
	fn peer_hash_is_stable_and_distinct() {
		let a = PeerAddr::from_string("1.2.3.4:7312").unwrap();
		let b = PeerAddr::from_string("1.2.3.4:7313").unwrap();
		assert_eq!(a.peer_hash(), a.peer_hash());
		assert_ne!(a.peer_hash(), b.peer_hash());
		assert_eq!(a.peer_hash().len(), 64);
	}

	#[test]
	fn conn_reset_is_silent() {
		let err = Error::Connection(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
		assert_eq!(err.classify(), ErrorClass::Silent);
	}

	#[test]
	fn expected_disconnects_are_quiet() {
		let refused = Error::Connection(io::Error::new(io::ErrorKind::ConnectionRefused, "no"));
		assert_eq!(refused.classify(), ErrorClass::Quiet);
		let pipe = Error::Connection(io::Error::new(io::ErrorKind::BrokenPipe, "epipe"));
		assert_eq!(pipe.classify(), ErrorClass::Quiet);
		let unreachable = Error::Connection(io::Error::new(
			io::ErrorKind::Other,
			"host unreachable (os error 113)",
		));
		assert_eq!(unreachable.classify(), ErrorClass::Quiet);
		assert_eq!(Error::Timeout.classify(), ErrorClass::Quiet);
		assert_eq!(Error::ConnectionClose.classify(), ErrorClass::Quiet);
	}

	#[test]
	fn unknown_errors_are_loud() {
		let odd = Error::Connection(io::Error::new(io::ErrorKind::Other, "exotic failure"));
		assert_eq!(odd.classify(), ErrorClass::Loud);
		assert_eq!(Error::BadChecksum.classify(), ErrorClass::Loud);
	}
}
