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

//! Dispatches inbound messages of an established session into the sync
//! state machine, forwards address gossip to the supervisor and applies
//! the disconnect policy when the connection ends.

use std::sync::Arc;

use crate::conn::MessageHandler;
use crate::core::block::{Block, Transaction};
use crate::msg::{self, Addrs, Headers, Inv, MsgHeader, Ping, Type};
use crate::peer::PeerSession;
use crate::types::{Error, ErrorClass, PeerAddr, ScanAdapter};

pub struct Protocol {
	session: Arc<PeerSession>,
	adapter: Arc<dyn ScanAdapter>,
}

impl Protocol {
	pub fn new(session: Arc<PeerSession>, adapter: Arc<dyn ScanAdapter>) -> Protocol {
		Protocol { session, adapter }
	}
}

impl MessageHandler for Protocol {
	fn consume(&mut self, header: MsgHeader, body: Vec<u8>) -> Result<(), Error> {
		let addr = self.session.addr().clone();
		match Type::from_command(&header.command) {
			Some(Type::Addr) => {
				let addrs: Addrs = msg::decode(&body)?;
				let peer_addrs: Vec<PeerAddr> =
					addrs.addrs.iter().map(|a| a.addr.to_peer_addr()).collect();
				// empty announcements carry nothing worth waking anyone for
				if !peer_addrs.is_empty() {
					debug!("{}: received {} peer addrs", addr, peer_addrs.len());
					self.adapter.peer_addrs_received(peer_addrs);
				}
				Ok(())
			}
			Some(Type::Headers) => {
				let headers: Headers = msg::decode(&body)?;
				debug!("{}: received {} headers", addr, headers.headers.len());
				let action = self.session.state().write().receive_headers(headers.headers);
				if let Some(action) = action {
					self.session.execute(action);
				}
				Ok(())
			}
			Some(Type::Inv) => {
				let inv: Inv = msg::decode(&body)?;
				let actions = self.session.state().write().receive_inv(inv.items);
				for action in actions {
					self.session.execute(action);
				}
				Ok(())
			}
			Some(Type::Block) => {
				let block: Block = msg::decode(&body)?;
				trace!("{}: received block {}", addr, block.hash());
				let action = self.session.state().write().receive_block(block);
				if let Some(action) = action {
					self.session.execute(action);
				}
				Ok(())
			}
			Some(Type::Tx) => {
				let tx: Transaction = msg::decode(&body)?;
				self.session.state().write().receive_tx(tx);
				Ok(())
			}
			Some(Type::Ping) => {
				// the one chatter message that demands an answer
				let ping: Ping = msg::decode(&body)?;
				let _ = self.session.send(Type::Pong, &ping);
				Ok(())
			}
			Some(Type::Pong)
			| Some(Type::Verack)
			| Some(Type::SendCmpct)
			| Some(Type::SendHeaders)
			| Some(Type::FeeFilter)
			| Some(Type::GetHeaders)
			| Some(Type::GetBlocks)
			| Some(Type::GetData)
			| Some(Type::GetAddr)
			| Some(Type::Version) => {
				trace!("{}: ignoring {}", addr, header.command);
				Ok(())
			}
			None => {
				debug!("{}: dropping unknown message {}", addr, header.command);
				Ok(())
			}
		}
	}

	fn on_close(&mut self, cause: Option<Error>) {
		let was_open = self.session.is_open();
		self.session.mark_dead();

		let cause = match cause {
			// orderly local close, the owner already knows
			None => return,
			Some(c) => c,
		};

		let addr = self.session.addr();
		match cause.classify() {
			ErrorClass::Silent => {
				trace!("{}: dropping connection reset", addr);
			}
			ErrorClass::Quiet => {
				self.adapter
					.peer_disconnected(self.session.peer_hash(), was_open);
			}
			ErrorClass::Loud => {
				error!("{}: connection failed: {:?}", addr, cause);
				self.adapter
					.peer_disconnected(self.session.peer_hash(), was_open);
			}
		}
	}
}
