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

//! Thin facade over the external full node. The supervisor only depends
//! on the trait; the provided implementation speaks the node's JSON-RPC
//! over HTTP on a trusted local endpoint.

use hyper::{Body, Client, Method, Request};
use serde_json::json;
use tokio::runtime::{Builder, Runtime};

use crate::common::types::Error;
use crate::core::hash::RHash;

/// One entry of the node's chain-tips report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainTip {
	/// Height of the tip
	pub height: u64,
	/// Display-order hash of the tip block
	pub hash: String,
	/// Blocks separating this tip from its fork point with the active
	/// chain; zero for the active tip itself
	#[serde(default)]
	pub branchlen: u64,
	/// One of active, valid-fork, valid-headers, headers-only, invalid
	pub status: String,
}

/// What the supervisor needs from the full node it runs next to.
pub trait ChainNode: Send + Sync {
	/// Checks the node is reachable and syncing.
	fn start(&self) -> Result<(), Error>;

	/// Height of the node's active chain.
	fn height(&self) -> Result<u64, Error>;

	/// Whether the node considers itself done with initial sync.
	fn synced(&self) -> Result<bool, Error>;

	/// Hash of the node's best block.
	fn tip(&self) -> Result<RHash, Error>;

	/// All chain tips the node knows about, active and otherwise.
	fn chain_tips(&self) -> Result<Vec<ChainTip>, Error>;
}

#[derive(Deserialize)]
struct BlockchainInfo {
	blocks: u64,
	bestblockhash: String,
	#[serde(default)]
	initialblockdownload: Option<bool>,
	#[serde(default)]
	verificationprogress: Option<f64>,
}

/// JSON-RPC client for a node on a trusted local endpoint. No
/// authentication is spoken at this layer.
pub struct NodeClient {
	url: String,
	client: Client<hyper::client::HttpConnector>,
	runtime: Runtime,
}

impl NodeClient {
	/// Builds a client for the provided host:port.
	pub fn new(addr: &str) -> Result<NodeClient, Error> {
		let runtime = Builder::new_current_thread()
			.enable_all()
			.build()
			.map_err(Error::IO)?;
		Ok(NodeClient {
			url: format!("http://{}/", addr),
			client: Client::new(),
			runtime,
		})
	}

	fn rpc(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Error> {
		let body = json!({
			"jsonrpc": "1.0",
			"id": "floscan",
			"method": method,
			"params": params,
		})
		.to_string();

		let request = Request::builder()
			.method(Method::POST)
			.uri(self.url.as_str())
			.header("content-type", "application/json")
			.body(Body::from(body))
			.map_err(|e| Error::Node(format!("{} request: {}", method, e)))?;

		let bytes = self
			.runtime
			.block_on(async {
				let response = self.client.request(request).await?;
				hyper::body::to_bytes(response.into_body()).await
			})
			.map_err(|e| Error::Node(format!("{}: {}", method, e)))?;

		let reply: serde_json::Value = serde_json::from_slice(&bytes)
			.map_err(|e| Error::Node(format!("{}: invalid JSON: {}", method, e)))?;
		if !reply["error"].is_null() {
			return Err(Error::Node(format!("{}: {}", method, reply["error"])));
		}
		Ok(reply["result"].clone())
	}

	fn blockchain_info(&self) -> Result<BlockchainInfo, Error> {
		let result = self.rpc("getblockchaininfo", json!([]))?;
		serde_json::from_value(result)
			.map_err(|e| Error::Node(format!("getblockchaininfo: {}", e)))
	}
}

impl ChainNode for NodeClient {
	fn start(&self) -> Result<(), Error> {
		let info = self.blockchain_info()?;
		info!(
			"full node reachable at height {} (best {})",
			info.blocks, info.bestblockhash
		);
		Ok(())
	}

	fn height(&self) -> Result<u64, Error> {
		let result = self.rpc("getblockcount", json!([]))?;
		result
			.as_u64()
			.ok_or_else(|| Error::Node("getblockcount: not a number".to_string()))
	}

	fn synced(&self) -> Result<bool, Error> {
		let info = self.blockchain_info()?;
		if let Some(ibd) = info.initialblockdownload {
			return Ok(!ibd);
		}
		// older nodes only report verification progress
		Ok(info.verificationprogress.unwrap_or(0.0) > 0.9999)
	}

	fn tip(&self) -> Result<RHash, Error> {
		let info = self.blockchain_info()?;
		RHash::from_hex(&info.bestblockhash).map_err(Error::Serialization)
	}

	fn chain_tips(&self) -> Result<Vec<ChainTip>, Error> {
		let result = self.rpc("getchaintips", json!([]))?;
		serde_json::from_value(result).map_err(|e| Error::Node(format!("getchaintips: {}", e)))
	}
}
