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

//! Networking code to connect to other peers, drive each one through
//! version negotiation, header and block sync, and surface what each
//! peer observes of the chain.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

use floscan_core as core;
use floscan_util as util;

mod conn;
pub mod handshake;
pub mod msg;
mod peer;
mod protocol;
pub mod sync;
pub mod types;

pub use crate::conn::SEND_CHANNEL_CAP;
pub use crate::handshake::Handshake;
pub use crate::msg::{Type, INV_BLOCK, INV_TX, MAX_BLOCK_HEADERS, PROTOCOL_VERSION, USER_AGENT};
pub use crate::peer::PeerSession;
pub use crate::sync::{SessionPhase, SessionSnapshot, SessionSync, SyncAction};
pub use crate::types::{Error, ErrorClass, PeerAddr, PeerInfo, ScanAdapter, Services};
