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

//! Message types that transit over the network and related serialization
//! code. Framing is the classic 24-byte envelope: network magic, a
//! null-padded 12-byte command, payload length and a double-sha256
//! checksum over the payload.

use std::io::{Read, Write};
use std::net::IpAddr;

use rand::{thread_rng, Rng};

use crate::core::global;
use crate::core::hash::{sha256d, Hash, ZERO_HASH};
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::types::{Error, PeerAddr, Services, MAX_PEER_ADDRS};

/// Protocol version spoken (and required) by the scanner.
pub const PROTOCOL_VERSION: i32 = 70002;
/// User agent advertised during the version exchange.
pub const USER_AGENT: &str = concat!("/floscan:", env!("CARGO_PKG_VERSION"), "/");

/// Size in bytes of a message envelope.
pub const HEADER_LEN: usize = 24;
/// Refuse any single message payload larger than this.
pub const MAX_MSG_LEN: u32 = 4_000_000;
/// Maximum number of block headers a peer should ever send in one batch.
pub const MAX_BLOCK_HEADERS: usize = 2000;
/// Maximum number of inventory vectors in a single inv/getdata.
pub const MAX_INV_ITEMS: usize = 50_000;

/// Inventory vector type for a transaction.
pub const INV_TX: u32 = 1;
/// Inventory vector type for a block.
pub const INV_BLOCK: u32 = 2;

/// Types of messages the scanner knows how to name. Commands not listed
/// here are dropped at the protocol layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Type {
	Version,
	Verack,
	Addr,
	GetAddr,
	Inv,
	GetData,
	GetHeaders,
	GetBlocks,
	Headers,
	Block,
	Tx,
	Ping,
	Pong,
	SendCmpct,
	SendHeaders,
	FeeFilter,
}

impl Type {
	/// Wire command for this message type.
	pub fn command(&self) -> &'static str {
		match *self {
			Type::Version => "version",
			Type::Verack => "verack",
			Type::Addr => "addr",
			Type::GetAddr => "getaddr",
			Type::Inv => "inv",
			Type::GetData => "getdata",
			Type::GetHeaders => "getheaders",
			Type::GetBlocks => "getblocks",
			Type::Headers => "headers",
			Type::Block => "block",
			Type::Tx => "tx",
			Type::Ping => "ping",
			Type::Pong => "pong",
			Type::SendCmpct => "sendcmpct",
			Type::SendHeaders => "sendheaders",
			Type::FeeFilter => "feefilter",
		}
	}

	/// Maps a wire command back to a message type.
	pub fn from_command(cmd: &str) -> Option<Type> {
		match cmd {
			"version" => Some(Type::Version),
			"verack" => Some(Type::Verack),
			"addr" => Some(Type::Addr),
			"getaddr" => Some(Type::GetAddr),
			"inv" => Some(Type::Inv),
			"getdata" => Some(Type::GetData),
			"getheaders" => Some(Type::GetHeaders),
			"getblocks" => Some(Type::GetBlocks),
			"headers" => Some(Type::Headers),
			"block" => Some(Type::Block),
			"tx" => Some(Type::Tx),
			"ping" => Some(Type::Ping),
			"pong" => Some(Type::Pong),
			"sendcmpct" => Some(Type::SendCmpct),
			"sendheaders" => Some(Type::SendHeaders),
			"feefilter" => Some(Type::FeeFilter),
			_ => None,
		}
	}
}

/// Header of any protocol message, used to identify incoming messages.
#[derive(Clone, Debug)]
pub struct MsgHeader {
	/// The command string, nul padding stripped
	pub command: String,
	/// Length of the payload that follows
	pub msg_len: u32,
	/// First four bytes of the payload's double-sha256
	pub checksum: [u8; 4],
}

fn payload_checksum(payload: &[u8]) -> [u8; 4] {
	let digest = sha256d(payload);
	let mut checksum = [0; 4];
	checksum.copy_from_slice(&digest.0[0..4]);
	checksum
}

/// Serializes a full framed message (envelope plus payload) in memory.
pub fn frame<T: Writeable>(msg_type: Type, body: &T) -> Result<Vec<u8>, Error> {
	let payload = ser::ser_vec(body)?;
	if payload.len() > MAX_MSG_LEN as usize {
		return Err(Error::Serialization(ser::Error::TooLargeReadErr(format!(
			"outbound {} message too large: {}",
			msg_type.command(),
			payload.len()
		))));
	}

	let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
	buf.extend_from_slice(&global::magic());
	let mut command = [0u8; 12];
	let cmd_bytes = msg_type.command().as_bytes();
	command[..cmd_bytes.len()].copy_from_slice(cmd_bytes);
	buf.extend_from_slice(&command);
	buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
	buf.extend_from_slice(&payload_checksum(&payload));
	buf.extend_from_slice(&payload);
	Ok(buf)
}

/// Writes a framed message out to the provided sink.
pub fn write_message<T: Writeable>(
	sink: &mut dyn Write,
	msg_type: Type,
	body: &T,
) -> Result<(), Error> {
	let buf = frame(msg_type, body)?;
	sink.write_all(&buf)?;
	Ok(())
}

/// Reads a message envelope, checking magic and bounds.
pub fn read_header(source: &mut dyn Read) -> Result<MsgHeader, Error> {
	let mut buf = [0u8; HEADER_LEN];
	source.read_exact(&mut buf)?;

	if buf[0..4] != global::magic() {
		return Err(Error::BadMagic);
	}
	let cmd_end = buf[4..16].iter().position(|b| *b == 0).unwrap_or(12);
	let command = String::from_utf8_lossy(&buf[4..4 + cmd_end]).into_owned();
	let mut len_bytes = [0u8; 4];
	len_bytes.copy_from_slice(&buf[16..20]);
	let msg_len = u32::from_le_bytes(len_bytes);
	if msg_len > MAX_MSG_LEN {
		return Err(Error::Serialization(ser::Error::TooLargeReadErr(format!(
			"inbound {} message too large: {}",
			command, msg_len
		))));
	}
	let mut checksum = [0u8; 4];
	checksum.copy_from_slice(&buf[20..24]);

	Ok(MsgHeader {
		command,
		msg_len,
		checksum,
	})
}

/// Reads and checksums the payload announced by the provided header.
pub fn read_body(source: &mut dyn Read, header: &MsgHeader) -> Result<Vec<u8>, Error> {
	let mut payload = vec![0u8; header.msg_len as usize];
	source.read_exact(&mut payload)?;
	if payload_checksum(&payload) != header.checksum {
		return Err(Error::BadChecksum);
	}
	Ok(payload)
}

/// Parses a payload previously read with `read_body`.
pub fn decode<T: Readable>(payload: &[u8]) -> Result<T, Error> {
	let mut cursor = payload;
	ser::deserialize(&mut cursor).map_err(Error::Serialization)
}

/// An empty message body (getaddr, verack).
pub struct Empty;

impl Writeable for Empty {
	fn write(&self, _writer: &mut dyn Writer) -> Result<(), ser::Error> {
		Ok(())
	}
}

impl Readable for Empty {
	fn read(_reader: &mut dyn Reader) -> Result<Empty, ser::Error> {
		Ok(Empty)
	}
}

/// A network address as embedded in version and addr messages: services,
/// a v4-mapped 16-byte IP and a big-endian port.
#[derive(Clone, Debug, PartialEq)]
pub struct NetAddr {
	pub services: u64,
	pub ip: [u8; 16],
	pub port: u16,
}

impl NetAddr {
	/// Unroutable placeholder used on the `addr_from` side; crawlers
	/// don't accept inbound connections so there is nothing to announce.
	pub fn unspecified() -> NetAddr {
		NetAddr {
			services: Services::UNKNOWN.bits(),
			ip: [0; 16],
			port: 0,
		}
	}

	pub fn from_peer_addr(addr: &PeerAddr) -> NetAddr {
		let ip = match addr.host.parse::<IpAddr>() {
			Ok(IpAddr::V4(v4)) => {
				let mut bytes = [0u8; 16];
				bytes[10] = 0xff;
				bytes[11] = 0xff;
				bytes[12..].copy_from_slice(&v4.octets());
				bytes
			}
			Ok(IpAddr::V6(v6)) => v6.octets(),
			Err(_) => [0u8; 16],
		};
		NetAddr {
			services: Services::UNKNOWN.bits(),
			ip,
			port: addr.port,
		}
	}

	/// Renders back into host:port form, unmapping v4-in-v6 addresses.
	pub fn to_peer_addr(&self) -> PeerAddr {
		let host = if self.ip[0..10] == [0; 10] && self.ip[10..12] == [0xff, 0xff] {
			format!(
				"{}.{}.{}.{}",
				self.ip[12], self.ip[13], self.ip[14], self.ip[15]
			)
		} else {
			let mut segments = [0u16; 8];
			for i in 0..8 {
				segments[i] = u16::from_be_bytes([self.ip[2 * i], self.ip[2 * i + 1]]);
			}
			std::net::Ipv6Addr::new(
				segments[0],
				segments[1],
				segments[2],
				segments[3],
				segments[4],
				segments[5],
				segments[6],
				segments[7],
			)
			.to_string()
		};
		PeerAddr::new(host, self.port)
	}
}

impl Writeable for NetAddr {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_u64(self.services)?;
		writer.write_fixed_bytes(&self.ip)?;
		// port is the one big-endian field on this wire
		writer.write_u8((self.port >> 8) as u8)?;
		writer.write_u8(self.port as u8)
	}
}

impl Readable for NetAddr {
	fn read(reader: &mut dyn Reader) -> Result<NetAddr, ser::Error> {
		let services = reader.read_u64()?;
		let ip_bytes = reader.read_fixed_bytes(16)?;
		let mut ip = [0u8; 16];
		ip.copy_from_slice(&ip_bytes);
		let hi = reader.read_u8()?;
		let lo = reader.read_u8()?;
		Ok(NetAddr {
			services,
			ip,
			port: ((hi as u16) << 8) | lo as u16,
		})
	}
}

/// First message of the version exchange, advertising what we speak and
/// what we know.
#[derive(Clone, Debug)]
pub struct Version {
	pub version: i32,
	pub services: u64,
	pub timestamp: i64,
	pub addr_recv: NetAddr,
	pub addr_from: NetAddr,
	/// randomly generated for each handshake, helps detect self
	pub nonce: u64,
	pub user_agent: String,
	pub start_height: i32,
	pub relay: bool,
}

impl Version {
	pub fn new(recv_addr: &PeerAddr, timestamp: i64, start_height: i32) -> Version {
		Version {
			version: PROTOCOL_VERSION,
			services: Services::UNKNOWN.bits(),
			timestamp,
			addr_recv: NetAddr::from_peer_addr(recv_addr),
			addr_from: NetAddr::unspecified(),
			nonce: thread_rng().gen(),
			user_agent: USER_AGENT.to_string(),
			start_height,
			relay: true,
		}
	}
}

impl Writeable for Version {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		writer.write_u64(self.services)?;
		writer.write_i64(self.timestamp)?;
		self.addr_recv.write(writer)?;
		self.addr_from.write(writer)?;
		writer.write_u64(self.nonce)?;
		writer.write_bytes(self.user_agent.as_bytes())?;
		writer.write_i32(self.start_height)?;
		writer.write_u8(self.relay as u8)
	}
}

impl Readable for Version {
	fn read(reader: &mut dyn Reader) -> Result<Version, ser::Error> {
		let version = reader.read_i32()?;
		let services = reader.read_u64()?;
		let timestamp = reader.read_i64()?;
		let addr_recv = NetAddr::read(reader)?;
		let addr_from = NetAddr::read(reader)?;
		let nonce = reader.read_u64()?;
		let ua = reader.read_bytes()?;
		let user_agent = String::from_utf8(ua).map_err(|_| ser::Error::CorruptedData)?;
		let start_height = reader.read_i32()?;
		// the relay flag is absent from some older nodes
		let relay = reader.read_u8().map(|b| b != 0).unwrap_or(true);
		Ok(Version {
			version,
			services,
			timestamp,
			addr_recv,
			addr_from,
			nonce,
			user_agent,
			start_height,
			relay,
		})
	}
}

/// One gossiped address with the timestamp it was last seen.
#[derive(Clone, Debug, PartialEq)]
pub struct TimedAddr {
	pub time: u32,
	pub addr: NetAddr,
}

impl Writeable for TimedAddr {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_u32(self.time)?;
		self.addr.write(writer)
	}
}

impl Readable for TimedAddr {
	fn read(reader: &mut dyn Reader) -> Result<TimedAddr, ser::Error> {
		Ok(TimedAddr {
			time: reader.read_u32()?,
			addr: NetAddr::read(reader)?,
		})
	}
}

/// Gossiped peer addresses.
#[derive(Clone, Debug, PartialEq)]
pub struct Addrs {
	pub addrs: Vec<TimedAddr>,
}

impl Writeable for Addrs {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_varint(self.addrs.len() as u64)?;
		for addr in &self.addrs {
			addr.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Addrs {
	fn read(reader: &mut dyn Reader) -> Result<Addrs, ser::Error> {
		let len = reader.read_varint()?;
		if len > MAX_PEER_ADDRS as u64 {
			return Err(ser::Error::CorruptedData);
		}
		let mut addrs = Vec::with_capacity(len as usize);
		for _ in 0..len {
			addrs.push(TimedAddr::read(reader)?);
		}
		Ok(Addrs { addrs })
	}
}

/// A single inventory vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InvItem {
	pub inv_type: u32,
	pub hash: Hash,
}

impl Writeable for InvItem {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_u32(self.inv_type)?;
		self.hash.write(writer)
	}
}

impl Readable for InvItem {
	fn read(reader: &mut dyn Reader) -> Result<InvItem, ser::Error> {
		Ok(InvItem {
			inv_type: reader.read_u32()?,
			hash: Hash::read(reader)?,
		})
	}
}

/// Inventory announcement, also the payload of getdata.
#[derive(Clone, Debug, PartialEq)]
pub struct Inv {
	pub items: Vec<InvItem>,
}

impl Writeable for Inv {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_varint(self.items.len() as u64)?;
		for item in &self.items {
			item.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Inv {
	fn read(reader: &mut dyn Reader) -> Result<Inv, ser::Error> {
		let len = reader.read_varint()?;
		if len > MAX_INV_ITEMS as u64 {
			return Err(ser::Error::CorruptedData);
		}
		let mut items = Vec::with_capacity(len as usize);
		for _ in 0..len {
			items.push(InvItem::read(reader)?);
		}
		Ok(Inv { items })
	}
}

/// Block locator payload shared by getheaders and getblocks: version, a
/// list of known hashes newest first, and a stop hash (zero for "as many
/// as you will give me").
#[derive(Clone, Debug, PartialEq)]
pub struct Locator {
	pub version: i32,
	pub hashes: Vec<Hash>,
	pub stop: Hash,
}

impl Locator {
	/// A single-hash locator, all the scanner ever needs: continue from
	/// the last thing this session saw.
	pub fn from_hash(hash: Hash) -> Locator {
		Locator {
			version: PROTOCOL_VERSION,
			hashes: vec![hash],
			stop: ZERO_HASH,
		}
	}
}

impl Writeable for Locator {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		writer.write_varint(self.hashes.len() as u64)?;
		for hash in &self.hashes {
			hash.write(writer)?;
		}
		self.stop.write(writer)
	}
}

impl Readable for Locator {
	fn read(reader: &mut dyn Reader) -> Result<Locator, ser::Error> {
		let version = reader.read_i32()?;
		let len = reader.read_varint()?;
		if len > 64 {
			return Err(ser::Error::CorruptedData);
		}
		let mut hashes = Vec::with_capacity(len as usize);
		for _ in 0..len {
			hashes.push(Hash::read(reader)?);
		}
		Ok(Locator {
			version,
			hashes,
			stop: Hash::read(reader)?,
		})
	}
}

/// A batch of block headers. Each header is followed on the wire by a
/// varint transaction count, always zero in a headers message.
#[derive(Clone, Debug, PartialEq)]
pub struct Headers {
	pub headers: Vec<crate::core::block::BlockHeader>,
}

impl Writeable for Headers {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_varint(self.headers.len() as u64)?;
		for header in &self.headers {
			header.write(writer)?;
			writer.write_varint(0)?;
		}
		Ok(())
	}
}

impl Readable for Headers {
	fn read(reader: &mut dyn Reader) -> Result<Headers, ser::Error> {
		let len = reader.read_varint()?;
		if len > MAX_BLOCK_HEADERS as u64 {
			return Err(ser::Error::CorruptedData);
		}
		let mut headers = Vec::with_capacity(len as usize);
		for _ in 0..len {
			headers.push(crate::core::block::BlockHeader::read(reader)?);
			let _tx_count = reader.read_varint()?;
		}
		Ok(Headers { headers })
	}
}

/// Ping and pong carry a nonce to match them up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ping {
	pub nonce: u64,
}

impl Writeable for Ping {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_u64(self.nonce)
	}
}

impl Readable for Ping {
	fn read(reader: &mut dyn Reader) -> Result<Ping, ser::Error> {
		Ok(Ping {
			nonce: reader.read_u64()?,
		})
	}
}
