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

use floscan_core as core;
use floscan_p2p as p2p;

use crate::core::block::BlockHeader;
use crate::core::hash::{Hash, ZERO_HASH};
use crate::p2p::msg::{
	self, Addrs, Headers, Inv, InvItem, Locator, MsgHeader, NetAddr, Ping, TimedAddr, Type,
	Version, HEADER_LEN,
};
use crate::p2p::types::PeerAddr;

fn round_trip_framed<T>(msg_type: Type, body: &T) -> (MsgHeader, Vec<u8>)
where
	T: core::ser::Writeable,
{
	let framed = msg::frame(msg_type, body).unwrap();
	let mut cursor = &framed[..];
	let header = msg::read_header(&mut cursor).unwrap();
	let payload = msg::read_body(&mut cursor, &header).unwrap();
	(header, payload)
}

#[test]
fn test_type_commands() {
	assert_eq!(Type::Version.command(), "version");
	assert_eq!(Type::from_command("headers"), Some(Type::Headers));
	assert_eq!(Type::from_command("alert"), None);
	// every type maps back to itself
	for t in &[
		Type::Version,
		Type::Verack,
		Type::Addr,
		Type::GetAddr,
		Type::Inv,
		Type::GetData,
		Type::GetHeaders,
		Type::GetBlocks,
		Type::Headers,
		Type::Block,
		Type::Tx,
		Type::Ping,
		Type::Pong,
		Type::SendCmpct,
		Type::SendHeaders,
		Type::FeeFilter,
	] {
		assert_eq!(Type::from_command(t.command()), Some(*t));
	}
}

#[test]
fn test_version_round_trip() {
	let addr = PeerAddr::from_string("203.0.113.7:7312").unwrap();
	let version = Version::new(&addr, 1_600_000_000, 123_456);
	let (header, payload) = round_trip_framed(Type::Version, &version);
	assert_eq!(header.command, "version");

	let decoded: Version = msg::decode(&payload).unwrap();
	assert_eq!(decoded.version, version.version);
	assert_eq!(decoded.nonce, version.nonce);
	assert_eq!(decoded.user_agent, version.user_agent);
	assert_eq!(decoded.start_height, 123_456);
	assert_eq!(decoded.addr_recv.to_peer_addr(), addr);
}

#[test]
fn test_addrs_round_trip() {
	let v4 = NetAddr::from_peer_addr(&PeerAddr::from_string("198.51.100.1:7312").unwrap());
	let v6 = NetAddr::from_peer_addr(&PeerAddr::from_string("[2001:db8::1]:17312").unwrap());
	let addrs = Addrs {
		addrs: vec![
			TimedAddr {
				time: 1_600_000_000,
				addr: v4,
			},
			TimedAddr {
				time: 1_600_000_060,
				addr: v6,
			},
		],
	};
	let (_, payload) = round_trip_framed(Type::Addr, &addrs);
	let decoded: Addrs = msg::decode(&payload).unwrap();
	assert_eq!(decoded, addrs);
	assert_eq!(
		decoded.addrs[0].addr.to_peer_addr().to_string(),
		"198.51.100.1:7312"
	);
	assert_eq!(
		decoded.addrs[1].addr.to_peer_addr().to_string(),
		"[2001:db8::1]:17312"
	);
}

#[test]
fn test_inv_round_trip() {
	let mut hash_bytes = [0u8; 32];
	hash_bytes[3] = 9;
	let inv = Inv {
		items: vec![
			InvItem {
				inv_type: msg::INV_BLOCK,
				hash: Hash(hash_bytes),
			},
			InvItem {
				inv_type: msg::INV_TX,
				hash: ZERO_HASH,
			},
		],
	};
	let (_, payload) = round_trip_framed(Type::Inv, &inv);
	let decoded: Inv = msg::decode(&payload).unwrap();
	assert_eq!(decoded, inv);
}

#[test]
fn test_locator_round_trip() {
	let mut hash_bytes = [0u8; 32];
	hash_bytes[0] = 0xaa;
	let locator = Locator::from_hash(Hash(hash_bytes));
	let (header, payload) = round_trip_framed(Type::GetHeaders, &locator);
	assert_eq!(header.command, "getheaders");
	let decoded: Locator = msg::decode(&payload).unwrap();
	assert_eq!(decoded, locator);
	assert_eq!(decoded.hashes.len(), 1);
	assert_eq!(decoded.stop, ZERO_HASH);
}

#[test]
fn test_headers_round_trip() {
	let headers = Headers {
		headers: (0..5)
			.map(|i| BlockHeader {
				version: 2,
				prev_hash: ZERO_HASH,
				merkle_root: ZERO_HASH,
				timestamp: 1_500_000_000 + i,
				bits: 0x1e0ffff0,
				nonce: i,
			})
			.collect(),
	};
	let (_, payload) = round_trip_framed(Type::Headers, &headers);
	// each header is 80 bytes plus its zero tx count, plus the leading count
	assert_eq!(payload.len(), 1 + 5 * 81);
	let decoded: Headers = msg::decode(&payload).unwrap();
	assert_eq!(decoded, headers);
}

#[test]
fn test_ping_pong_round_trip() {
	let ping = Ping { nonce: 0xdead_beef };
	let (header, payload) = round_trip_framed(Type::Ping, &ping);
	assert_eq!(header.command, "ping");
	let decoded: Ping = msg::decode(&payload).unwrap();
	assert_eq!(decoded, ping);
}

#[test]
fn test_framing_rejects_bad_magic() {
	let framed = msg::frame(Type::Ping, &Ping { nonce: 1 }).unwrap();
	let mut corrupted = framed.clone();
	corrupted[0] ^= 0xff;
	let mut cursor = &corrupted[..];
	match msg::read_header(&mut cursor) {
		Err(p2p::Error::BadMagic) => {}
		other => panic!("expected BadMagic, got {:?}", other.map(|h| h.command)),
	}
}

#[test]
fn test_framing_rejects_bad_checksum() {
	let framed = msg::frame(Type::Ping, &Ping { nonce: 1 }).unwrap();
	let mut corrupted = framed.clone();
	let last = corrupted.len() - 1;
	corrupted[last] ^= 0xff;
	let mut cursor = &corrupted[..];
	let header = msg::read_header(&mut cursor).unwrap();
	match msg::read_body(&mut cursor, &header) {
		Err(p2p::Error::BadChecksum) => {}
		other => panic!("expected BadChecksum, got {:?}", other.map(|_| ())),
	}
}

#[test]
fn test_envelope_layout() {
	let framed = msg::frame(Type::GetAddr, &msg::Empty).unwrap();
	// empty payload: just the envelope
	assert_eq!(framed.len(), HEADER_LEN);
	// command is nul-padded to 12 bytes
	assert_eq!(&framed[4..11], b"getaddr");
	assert_eq!(framed[11], 0);
	// zero payload length
	assert_eq!(&framed[16..20], &[0, 0, 0, 0]);
}
