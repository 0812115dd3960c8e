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

//! Blocks, headers and transactions as read off the wire. The scanner
//! parses these without validating them; the only derived piece of data
//! it cares about is the coinbase-encoded height.

use crate::hash::{sha256d, Hash};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Transaction versions from this one onwards carry the tx-comment
/// payload after the lock time.
const TX_COMMENT_VERSION: i32 = 2;

/// An 80-byte block header. Height is not part of the wire form; it only
/// becomes known once the block body's coinbase is seen.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
	/// Header version
	pub version: i32,
	/// Hash of the previous block, wire order
	pub prev_hash: Hash,
	/// Merkle root of the block's transactions
	pub merkle_root: Hash,
	/// Block timestamp, unix seconds
	pub timestamp: u32,
	/// Compact difficulty target
	pub bits: u32,
	/// PoW nonce
	pub nonce: u32,
}

impl BlockHeader {
	/// The header's own hash, wire order.
	pub fn hash(&self) -> Hash {
		let bytes = ser::ser_vec(self).expect("serialization to memory cannot fail");
		sha256d(&bytes)
	}
}

impl Writeable for BlockHeader {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.prev_hash.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_u32(self.timestamp)?;
		writer.write_u32(self.bits)?;
		writer.write_u32(self.nonce)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		Ok(BlockHeader {
			version: reader.read_i32()?,
			prev_hash: Hash::read(reader)?,
			merkle_root: Hash::read(reader)?,
			timestamp: reader.read_u32()?,
			bits: reader.read_u32()?,
			nonce: reader.read_u32()?,
		})
	}
}

/// Reference to an output of a previous transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct OutPoint {
	/// Transaction the output belongs to, wire order
	pub hash: Hash,
	/// Index of the output in that transaction
	pub index: u32,
}

impl Writeable for OutPoint {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u32(self.index)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		Ok(OutPoint {
			hash: Hash::read(reader)?,
			index: reader.read_u32()?,
		})
	}
}

/// A transaction input.
#[derive(Clone, Debug, PartialEq)]
pub struct TxInput {
	/// The output being spent
	pub prev_output: OutPoint,
	/// Signature script, opaque to the scanner
	pub script_sig: Vec<u8>,
	/// Sequence number
	pub sequence: u32,
}

impl Writeable for TxInput {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		self.prev_output.write(writer)?;
		writer.write_bytes(&self.script_sig)?;
		writer.write_u32(self.sequence)
	}
}

impl Readable for TxInput {
	fn read(reader: &mut dyn Reader) -> Result<TxInput, ser::Error> {
		Ok(TxInput {
			prev_output: OutPoint::read(reader)?,
			script_sig: reader.read_bytes()?,
			sequence: reader.read_u32()?,
		})
	}
}

/// A transaction output.
#[derive(Clone, Debug, PartialEq)]
pub struct TxOutput {
	/// Amount in the smallest unit
	pub value: i64,
	/// Locking script, opaque to the scanner
	pub script_pubkey: Vec<u8>,
}

impl Writeable for TxOutput {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_i64(self.value)?;
		writer.write_bytes(&self.script_pubkey)
	}
}

impl Readable for TxOutput {
	fn read(reader: &mut dyn Reader) -> Result<TxOutput, ser::Error> {
		Ok(TxOutput {
			value: reader.read_i64()?,
			script_pubkey: reader.read_bytes()?,
		})
	}
}

/// A full transaction. On this network, version 2 transactions append a
/// length-prefixed tx-comment payload after the lock time; it is part of
/// the transaction hash so it must round-trip.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
	/// Transaction version
	pub version: i32,
	/// Inputs
	pub inputs: Vec<TxInput>,
	/// Outputs
	pub outputs: Vec<TxOutput>,
	/// Lock time
	pub lock_time: u32,
	/// Tx-comment payload (version 2 and later)
	pub tx_comment: Vec<u8>,
}

impl Transaction {
	/// The transaction's hash, wire order.
	pub fn hash(&self) -> Hash {
		let bytes = ser::ser_vec(self).expect("serialization to memory cannot fail");
		sha256d(&bytes)
	}

	/// A transaction is a coinbase when its single input spends the null
	/// outpoint.
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1
			&& self.inputs[0].prev_output.hash == crate::hash::ZERO_HASH
			&& self.inputs[0].prev_output.index == u32::max_value()
	}
}

impl Writeable for Transaction {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		writer.write_varint(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.write(writer)?;
		}
		writer.write_varint(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		writer.write_u32(self.lock_time)?;
		if self.version >= TX_COMMENT_VERSION {
			writer.write_bytes(&self.tx_comment)?;
		}
		Ok(())
	}
}

impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_i32()?;
		let input_len = reader.read_varint()?;
		let mut inputs = Vec::with_capacity(input_len as usize);
		for _ in 0..input_len {
			inputs.push(TxInput::read(reader)?);
		}
		let output_len = reader.read_varint()?;
		let mut outputs = Vec::with_capacity(output_len as usize);
		for _ in 0..output_len {
			outputs.push(TxOutput::read(reader)?);
		}
		let lock_time = reader.read_u32()?;
		let tx_comment = if version >= TX_COMMENT_VERSION {
			reader.read_bytes()?
		} else {
			vec![]
		};
		Ok(Transaction {
			version,
			inputs,
			outputs,
			lock_time,
			tx_comment,
		})
	}
}

/// A full block: header plus transaction list.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
	/// The block header
	pub header: BlockHeader,
	/// All transactions, coinbase first
	pub txs: Vec<Transaction>,
}

impl Block {
	/// The block's hash, wire order (the hash of its header).
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}

	/// Extracts the height serialized at the start of the coinbase
	/// signature script. Returns None when the block predates height
	/// serialization or the script is not in the expected shape.
	pub fn coinbase_height(&self) -> Option<u64> {
		let coinbase = self.txs.first()?;
		if !coinbase.is_coinbase() {
			return None;
		}
		let script = &coinbase.inputs[0].script_sig;
		let push_len = *script.get(0)? as usize;
		if push_len == 0 || push_len > 8 || script.len() < 1 + push_len {
			return None;
		}
		let mut height: u64 = 0;
		for (i, byte) in script[1..=push_len].iter().enumerate() {
			height |= (*byte as u64) << (8 * i);
		}
		Some(height)
	}
}

impl Writeable for Block {
	fn write(&self, writer: &mut dyn Writer) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_varint(self.txs.len() as u64)?;
		for tx in &self.txs {
			tx.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let tx_len = reader.read_varint()?;
		let mut txs = Vec::with_capacity(tx_len as usize);
		for _ in 0..tx_len {
			txs.push(Transaction::read(reader)?);
		}
		Ok(Block { header, txs })
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::hash::ZERO_HASH;

	fn coinbase_at(height: u64) -> Transaction {
		// minimally-encoded height push, as consensus requires
		let mut script = vec![];
		let mut h = height;
		let mut push = vec![];
		while h > 0 {
			push.push((h & 0xff) as u8);
			h >>= 8;
		}
		script.push(push.len() as u8);
		script.extend(push);
		Transaction {
			version: 1,
			inputs: vec![TxInput {
				prev_output: OutPoint {
					hash: ZERO_HASH,
					index: u32::max_value(),
				},
				script_sig: script,
				sequence: u32::max_value(),
			}],
			outputs: vec![],
			lock_time: 0,
			tx_comment: vec![],
		}
	}

	fn test_block(height: u64) -> Block {
		Block {
			header: BlockHeader {
				version: 2,
				prev_hash: ZERO_HASH,
				merkle_root: ZERO_HASH,
				timestamp: 1_500_000_000,
				bits: 0x1e0ffff0,
				nonce: 42,
			},
			txs: vec![coinbase_at(height)],
		}
	}

	#[test]
	fn header_ser_is_80_bytes() {
		let block = test_block(1);
		let bytes = ser::ser_vec(&block.header).unwrap();
		assert_eq!(bytes.len(), 80);
	}

	#[test]
	fn coinbase_height_extraction() {
		assert_eq!(test_block(1).coinbase_height(), Some(1));
		assert_eq!(test_block(250).coinbase_height(), Some(250));
		assert_eq!(test_block(70_000).coinbase_height(), Some(70_000));
		assert_eq!(test_block(2_100_000).coinbase_height(), Some(2_100_000));
	}

	#[test]
	fn non_coinbase_has_no_height() {
		let mut block = test_block(99);
		block.txs[0].inputs[0].prev_output.index = 0;
		assert_eq!(block.coinbase_height(), None);
	}

	#[test]
	fn tx_comment_round_trip() {
		let mut tx = coinbase_at(5);
		tx.version = 2;
		tx.tx_comment = b"text:hello".to_vec();
		let bytes = ser::ser_vec(&tx).unwrap();
		let out: Transaction = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(out, tx);
		assert_eq!(out.tx_comment, b"text:hello".to_vec());
	}

	#[test]
	fn block_round_trip() {
		let block = test_block(1234);
		let bytes = ser::ser_vec(&block).unwrap();
		let out: Block = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(out, block);
		assert_eq!(out.hash(), block.hash());
	}
}
