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

//! Provides a connection wrapper that handles the lower level tasks in
//! sending or receiving data from the TCP socket, as well as dealing
//! with timeouts. A connection owns a reader and a writer thread; the
//! reader dispatches whole messages to a handler in arrival order, which
//! is what serializes packet handling for a session.

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::msg::{self, Empty, MsgHeader, Type};
use crate::types::Error;
use crate::util::Mutex;

/// Maximum number of outbound messages queued on a connection.
pub const SEND_CHANNEL_CAP: usize = 100;

/// How long the reader waits on a silent socket before coming up for air
/// to check the stop flag.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the writer emits a getaddr to keep address gossip flowing.
const GET_ADDR_INTERVAL: Duration = Duration::from_secs(60);

/// Implemented by the protocol layer to process incoming messages and
/// observe the end of the connection.
pub trait MessageHandler: Send + 'static {
	/// Process one inbound message. A serialization error drops the
	/// message, any other error terminates the connection.
	fn consume(&mut self, header: MsgHeader, body: Vec<u8>) -> Result<(), Error>;

	/// The connection terminated. `cause` is None on an orderly local
	/// close, the terminating error otherwise.
	fn on_close(&mut self, cause: Option<Error>);
}

/// Handle to push messages to a connection's writer thread. Cheap to
/// clone; all clones go dead together when the connection closes.
#[derive(Clone)]
pub struct ConnHandle {
	send_tx: mpsc::SyncSender<Vec<u8>>,
	closed: Arc<AtomicBool>,
}

impl ConnHandle {
	/// Queues a message for sending. Fails with ConnectionClose once the
	/// connection is gone or the send queue is saturated.
	pub fn send<T: crate::core::ser::Writeable>(
		&self,
		msg_type: Type,
		body: &T,
	) -> Result<(), Error> {
		if self.closed.load(Ordering::Relaxed) {
			return Err(Error::ConnectionClose);
		}
		let buf = msg::frame(msg_type, body)?;
		self.send_tx
			.try_send(buf)
			.map_err(|_| Error::ConnectionClose)
	}
}

/// Byte counters shared with whoever wants connection stats.
#[derive(Clone)]
pub struct Tracker {
	/// Bytes we've sent.
	pub sent_bytes: Arc<Mutex<u64>>,
	/// Bytes we've received.
	pub received_bytes: Arc<Mutex<u64>>,
}

impl Tracker {
	pub fn new() -> Tracker {
		Tracker {
			sent_bytes: Arc::new(Mutex::new(0)),
			received_bytes: Arc::new(Mutex::new(0)),
		}
	}

	fn inc_sent(&self, size: u64) {
		*self.sent_bytes.lock() += size;
	}

	fn inc_received(&self, size: u64) {
		*self.received_bytes.lock() += size;
	}
}

/// Starts the reader and writer threads for a connected, handshaked
/// stream and returns the handle to send through. `stop` is the
/// session's own flag: once raised, both threads wind down without
/// reporting an error to the handler.
pub fn listen<H>(
	stream: TcpStream,
	addr_label: String,
	handler: H,
	tracker: Tracker,
	stop: Arc<AtomicBool>,
) -> Result<ConnHandle, Error>
where
	H: MessageHandler,
{
	let (send_tx, send_rx) = mpsc::sync_channel(SEND_CHANNEL_CAP);
	let closed = Arc::new(AtomicBool::new(false));

	stream.set_read_timeout(Some(IO_TIMEOUT))?;
	let write_stream = stream.try_clone()?;

	let handle = ConnHandle {
		send_tx,
		closed: closed.clone(),
	};

	let reader_closed = closed.clone();
	let reader_stop = stop.clone();
	let reader_tracker = tracker.clone();
	let reader_label = addr_label.clone();
	thread::Builder::new()
		.name("peer_read".to_string())
		.spawn(move || {
			let mut handler = handler;
			let cause = read_loop(
				stream,
				&reader_label,
				&mut handler,
				&reader_tracker,
				&reader_stop,
			);
			reader_closed.store(true, Ordering::Relaxed);
			if reader_stop.load(Ordering::Relaxed) {
				// local destroy, nothing to report
				handler.on_close(None);
			} else {
				handler.on_close(cause);
			}
		})
		.map_err(Error::Connection)?;

	let writer_closed = closed;
	let writer_tracker = tracker;
	thread::Builder::new()
		.name("peer_write".to_string())
		.spawn(move || {
			write_loop(write_stream, send_rx, &writer_tracker, &stop);
			writer_closed.store(true, Ordering::Relaxed);
		})
		.map_err(Error::Connection)?;

	Ok(handle)
}

// Reads messages until the peer goes away or we're told to stop.
// Returns the error that ended the connection, if any.
fn read_loop<H>(
	mut stream: TcpStream,
	addr_label: &str,
	handler: &mut H,
	tracker: &Tracker,
	stop: &Arc<AtomicBool>,
) -> Option<Error>
where
	H: MessageHandler,
{
	loop {
		if stop.load(Ordering::Relaxed) {
			return None;
		}

		// wait for the first byte of the next envelope, tolerating idle
		// stretches; once a message starts it must arrive whole
		let mut first = [0u8; 1];
		match stream.read(&mut first) {
			Ok(0) => {
				return Some(Error::Connection(io::Error::new(
					io::ErrorKind::UnexpectedEof,
					"peer closed connection",
				)));
			}
			Ok(_) => {}
			Err(ref e)
				if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
			{
				continue;
			}
			Err(e) => return Some(Error::Connection(e)),
		}

		let header = {
			let mut rest = vec![0u8; msg::HEADER_LEN - 1];
			if let Err(e) = stream.read_exact(&mut rest) {
				return Some(Error::Connection(e));
			}
			let mut full = Vec::with_capacity(msg::HEADER_LEN);
			full.push(first[0]);
			full.extend_from_slice(&rest);
			match msg::read_header(&mut &full[..]) {
				Ok(h) => h,
				Err(e) => return Some(e),
			}
		};

		let body = match msg::read_body(&mut stream, &header) {
			Ok(b) => b,
			Err(e) => return Some(e),
		};
		tracker.inc_received(msg::HEADER_LEN as u64 + body.len() as u64);

		match handler.consume(header.clone(), body) {
			Ok(()) => {}
			Err(Error::Serialization(e)) => {
				// a single malformed message is dropped, not fatal
				debug!(
					"{}: invalid {} message: {:?}",
					addr_label, header.command, e
				);
			}
			Err(e) => return Some(e),
		}
	}
}

// Drains the send queue onto the socket and keeps the periodic getaddr
// timer. Exits when the queue's senders are gone, the socket breaks or
// the stop flag is raised.
fn write_loop(
	mut stream: TcpStream,
	send_rx: mpsc::Receiver<Vec<u8>>,
	tracker: &Tracker,
	stop: &Arc<AtomicBool>,
) {
	use std::io::Write;

	let mut last_getaddr = Instant::now();
	loop {
		if stop.load(Ordering::Relaxed) {
			return;
		}

		match send_rx.recv_timeout(Duration::from_secs(1)) {
			Ok(buf) => {
				if stream.write_all(&buf).is_err() {
					return;
				}
				tracker.inc_sent(buf.len() as u64);
			}
			Err(mpsc::RecvTimeoutError::Timeout) => {}
			Err(mpsc::RecvTimeoutError::Disconnected) => return,
		}

		if last_getaddr.elapsed() >= GET_ADDR_INTERVAL {
			last_getaddr = Instant::now();
			if let Ok(buf) = msg::frame(Type::GetAddr, &Empty) {
				if stream.write_all(&buf).is_err() {
					return;
				}
				tracker.inc_sent(buf.len() as u64);
			}
		}
	}
}
