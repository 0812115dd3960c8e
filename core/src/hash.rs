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

//! Typed block hashes. The wire and the humans disagree on byte order:
//! inventory vectors and block locators carry the internal order while
//! logs, RPC and explorers show the reversed form. The two orders are
//! kept as distinct types so they cannot be mixed up silently.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use crate::util;

/// A hash consisting of all zeroes, often used as a sentinel. Not the hash
/// of anything.
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// A 32-byte hash in internal (wire) byte order, as carried by inventory
/// vectors, block locators and `prev_hash` links.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

/// The same 32 bytes in reversed (display) byte order, as shown by logs,
/// RPC responses and block explorers.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RHash(pub [u8; 32]);

fn reverse(bytes: &[u8; 32]) -> [u8; 32] {
	let mut out = [0; 32];
	for i in 0..32 {
		out[i] = bytes[31 - i];
	}
	out
}

impl Hash {
	/// Converts the hash to its display-order form.
	pub fn reversed(&self) -> RHash {
		RHash(reverse(&self.0))
	}

	/// The hash as a byte slice, internal order.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Builds a Hash from a vec of exactly 32 bytes in internal order.
	pub fn from_vec(v: &[u8]) -> Result<Hash, ser::Error> {
		if v.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		let mut bytes = [0; 32];
		bytes.copy_from_slice(v);
		Ok(Hash(bytes))
	}
}

impl RHash {
	/// Converts the hash back to internal (wire) order.
	pub fn reversed(&self) -> Hash {
		Hash(reverse(&self.0))
	}

	/// Display-order hex, the form humans compare against explorers.
	pub fn to_hex(&self) -> String {
		util::to_hex(self.0.to_vec())
	}

	/// Parses a display-order hex string.
	pub fn from_hex(hex: &str) -> Result<RHash, ser::Error> {
		let v = util::from_hex(hex.to_string()).map_err(|_| ser::Error::CorruptedData)?;
		if v.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		let mut bytes = [0; 32];
		bytes.copy_from_slice(&v);
		Ok(RHash(bytes))
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// display the human-readable order even for wire-order hashes,
		// anything else is useless in a log line
		write!(f, "{}", self.reversed().to_hex())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self)
	}
}

impl fmt::Display for RHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl fmt::Debug for RHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self)
	}
}

impl Writeable for Hash {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, ser::Error> {
		let v = reader.read_fixed_bytes(32)?;
		Hash::from_vec(&v)
	}
}

/// The double-sha256 digest used for block, transaction and message
/// checksum hashing, returned in internal order.
pub fn sha256d(data: &[u8]) -> Hash {
	let first = Sha256::digest(data);
	let second = Sha256::digest(&first);
	let mut bytes = [0; 32];
	bytes.copy_from_slice(&second);
	Hash(bytes)
}

/// Plain single sha256, for peer identities.
pub fn sha256(data: &[u8]) -> Vec<u8> {
	Sha256::digest(data).to_vec()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn hash_reversal_round_trip() {
		let mut bytes = [0u8; 32];
		for i in 0..32 {
			bytes[i] = i as u8;
		}
		let h = Hash(bytes);
		assert_eq!(h.reversed().reversed(), h);
		assert_ne!(h.reversed().0, h.0);
	}

	#[test]
	fn display_uses_reversed_order() {
		let mut bytes = [0u8; 32];
		bytes[31] = 0xab;
		let h = Hash(bytes);
		assert!(format!("{}", h).starts_with("ab"));
	}

	#[test]
	fn sha256d_empty() {
		// double sha256 of the empty string, displayed reversed
		assert_eq!(
			sha256d(&[]).reversed().to_hex(),
			"56944c5d3f98413ef45cf54545538103cc9f298e0575820ad3591376e2e0f65d"
		);
	}

	#[test]
	fn rhash_hex_round_trip() {
		let hex = "00000000000000127d3b8d4fa9e86a4eff1b1b135f671a1732c39c0ae4a6d05f";
		let r = RHash::from_hex(hex).unwrap();
		assert_eq!(r.to_hex(), hex);
	}
}
