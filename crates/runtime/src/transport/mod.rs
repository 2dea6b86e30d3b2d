//! Message transports.
//!
//! A transport turns a byte stream (or an already message-oriented socket)
//! into discrete JSON values and back:
//!
//! - [`PipeTransport`]: UTF-8 JSON segments separated by a single NUL byte
//! - [`WebSocketTransport`]: one JSON document per WebSocket message
//!
//! Both split into a sender half ([`Transport`]) and a read loop
//! ([`TransportReceiver`]). The read loop forwards every decoded message on an
//! unbounded channel and drops its sender when the peer closes, which is the
//! close signal observed by the connection.

mod framing;
mod pipe;
mod websocket;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

pub use framing::{NulFramer, encode_frame};
pub use pipe::{PipeTransport, PipeTransportReceiver, PipeTransportSender};
pub use websocket::{WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender};

use crate::error::Result;

/// One inbound item: a parsed message, or the error for a frame that did not parse.
pub type Inbound = Result<Value>;

/// Boxed future returned by transport halves.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Write half of a transport.
pub trait Transport: Send {
	/// Serializes and writes one message. Fails with
	/// [`Error::TransportClosed`](crate::Error::TransportClosed) after [`close`](Self::close).
	fn send(&mut self, message: Value) -> TransportFuture<'_>;

	/// Half-closes the write side.
	fn close(&mut self) -> TransportFuture<'_>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Reads until the peer closes, forwarding each message.
	fn run(self: Box<Self>) -> TransportFuture<'static>;
}

/// Both halves of a transport plus the channel its read loop feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Inbound>,
}
