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

//! Crate gluing the peer sessions, the chain-view aggregation and the
//! full-node facade into the scanner that crawls the network.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

use floscan_core as core;
use floscan_p2p as p2p;
use floscan_util as util;

pub mod common;
pub mod node;
pub mod scan;

pub use crate::common::stats::{ChainStats, ScannerStats, SessionStats};
pub use crate::common::types::{Error, ScannerConfig, Seeding};
pub use crate::node::{ChainNode, ChainTip, NodeClient};
pub use crate::scan::chain_view::ChainView;
pub use crate::scan::supervisor::Supervisor;
pub use crate::scan::tip_monitor::{check_reorg, ReorgTrigger};
