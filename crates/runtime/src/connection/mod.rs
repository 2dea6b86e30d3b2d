//! JSON request/response connection to a test server.
//!
//! This module implements the correlation layer on top of a transport:
//! - Generating request ids from a process-wide monotonic counter
//! - Correlating responses with pending requests
//! - Distinguishing events (no `id`) from responses
//! - Fanning events out through an [`EventHub`]
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with a method and params
//! 2. Connection allocates an id and parks a oneshot sender under it
//! 3. Request is queued to the writer task and sent via the transport
//! 4. The run loop receives the response and completes the matching oneshot
//! 5. Responses for ids nobody waits for are dropped

mod events;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_test_protocol::ServerEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use events::{
	ConnectionEvent, EventHub, EventKind, EventStream, Listener, ListenerId, Subscription,
};

use crate::error::{Error, Result};
use crate::transport::{Inbound, Transport, TransportParts, TransportReceiver};

/// Default target object for test-server requests.
pub const DEFAULT_GUID: &str = "DebugController";

static NEXT_REQUEST_ID: AtomicU32 = AtomicU32::new(1);

/// Returns the next request id. Shared by every connection in the process and never reset.
pub fn next_request_id() -> u32 {
	NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Metadata attached to every request. Empty unless a caller fills it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
	/// Unix timestamp in milliseconds
	#[serde(rename = "wallTime", skip_serializing_if = "Option::is_none")]
	pub wall_time: Option<i64>,
	/// Optional title for the operation
	#[serde(skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
}

/// Request sent to the test server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u32,
	pub guid: String,
	pub method: String,
	pub params: Value,
	pub metadata: Metadata,
}

/// Response from the test server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

/// Error carried by a response.
///
/// Servers send either the payload itself (`{message, stack?}`) or a wrapper
/// holding a structured error or a thrown value (`{error?, value?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseError {
	Payload(ErrorPayload),
	Wrapped {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<ErrorPayload>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		value: Option<Value>,
	},
}

impl Default for ResponseError {
	fn default() -> Self {
		Self::Wrapped {
			error: None,
			value: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Unsolicited message from the test server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (no `id` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

/// Customization points applied when a client connects.
///
/// Stands in for subclassing: implementations may rewrite the endpoint and
/// handshake headers, and run an initialization exchange before the client is
/// handed to its owner.
#[async_trait]
pub trait ClientHooks: Send + Sync {
	fn rewrite_endpoint(&self, endpoint: &str) -> String {
		endpoint.to_string()
	}

	fn rewrite_headers(&self, headers: Vec<(String, String)>) -> Vec<(String, String)> {
		headers
	}

	/// Runs after the transport is connected and before the client is ready.
	async fn initialize(&self, _connection: &Connection) -> Result<()> {
		Ok(())
	}
}

/// Hooks that change nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ClientHooks for DefaultHooks {}

/// Pending request callbacks keyed by request ID.
type CallbackMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// RAII guard removing the callback when a request future is dropped unanswered.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.lock().remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "CancelGuard: removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::send`] with automatic cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

enum Outbound {
	Message(Value),
	Close,
}

/// Transport halves waiting for [`Connection::run`].
struct RunParts {
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Inbound>,
	outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

/// Request/response connection over one transport.
pub struct Connection {
	guid: String,
	callbacks: CallbackMap,
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	closed: AtomicBool,
	events: EventHub,
	parts: Mutex<Option<RunParts>>,
}

impl Connection {
	/// Creates a connection over `parts`, reporting events through `events`.
	pub fn new(parts: TransportParts, events: EventHub) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		Self {
			guid: DEFAULT_GUID.to_string(),
			callbacks: Arc::new(Mutex::new(HashMap::new())),
			outbound_tx,
			closed: AtomicBool::new(false),
			events,
			parts: Mutex::new(Some(RunParts {
				sender,
				receiver,
				message_rx,
				outbound_rx,
			})),
		}
	}

	/// Overrides the target guid stamped on requests.
	pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
		self.guid = guid.into();
		self
	}

	pub fn events(&self) -> &EventHub {
		&self.events
	}

	/// Number of requests still waiting for a response.
	pub fn pending_requests(&self) -> usize {
		self.callbacks.lock().len()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends a request and awaits its response.
	pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::TransportClosed);
		}

		let id = next_request_id();
		tracing::debug!(id, method, "Sending request");

		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		let request = self.request(id, method, params);
		let request_value = serde_json::to_value(&request)?;

		if self.outbound_tx.send(Outbound::Message(request_value)).is_err() {
			tracing::error!("Failed to queue request: outbound channel closed");
			return Err(Error::ChannelClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Like [`send`](Self::send), but gives up when `token` fires.
	///
	/// The server is not told; callers that need the work stopped must send
	/// their own stop request.
	pub async fn send_with_cancel(
		&self,
		method: &str,
		params: Value,
		token: &CancellationToken,
	) -> Result<Value> {
		if token.is_cancelled() {
			return Err(Error::Cancelled);
		}
		tokio::select! {
			biased;
			_ = token.cancelled() => {
				tracing::debug!(method, "Request abandoned after cancellation");
				Err(Error::Cancelled)
			}
			result = self.send(method, params) => result,
		}
	}

	/// Sends a request without waiting for (or tracking) a response.
	///
	/// The request still carries a fresh id. No callback is registered under
	/// it, so a reply is dropped as an unknown id.
	pub fn send_no_reply(&self, method: &str, params: Value) -> Result<()> {
		if self.is_closed() {
			return Err(Error::TransportClosed);
		}
		let request = self.request(next_request_id(), method, params);
		let request_value = serde_json::to_value(&request)?;
		self.outbound_tx
			.send(Outbound::Message(request_value))
			.map_err(|_| Error::ChannelClosed)
	}

	/// Half-closes the transport. Pending requests are left as they are.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!(pending = self.pending_requests(), "Closing connection");
		let _ = self.outbound_tx.send(Outbound::Close);
	}

	fn request(&self, id: u32, method: &str, params: Value) -> Request {
		Request {
			id,
			guid: self.guid.clone(),
			method: method.to_string(),
			params: if params.is_null() {
				Value::Object(Default::default())
			} else {
				params
			},
			metadata: Metadata::default(),
		}
	}

	/// Runs the reader, writer, and dispatch loop until the transport closes.
	///
	/// Emits [`ConnectionEvent::Close`] when the inbound stream ends. Calling
	/// it a second time returns immediately.
	pub async fn run(self: &Arc<Self>) {
		let Some(parts) = self.parts.lock().take() else {
			tracing::warn!("Connection::run called more than once");
			return;
		};
		let RunParts {
			mut sender,
			receiver,
			mut message_rx,
			mut outbound_rx,
		} = parts;

		let reader_events = self.events.clone();
		let reader_handle = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::error!("Transport read error: {}", e);
				reader_events.emit_error(e);
			}
		});

		let writer_events = self.events.clone();
		let writer_handle = tokio::spawn(async move {
			while let Some(outbound) = outbound_rx.recv().await {
				match outbound {
					Outbound::Message(message) => {
						if let Err(e) = sender.send(message).await {
							tracing::error!("Transport write error: {}", e);
							writer_events.emit_error(e);
							break;
						}
					}
					Outbound::Close => {
						if let Err(e) = sender.close().await {
							tracing::debug!("Transport close error: {}", e);
						}
						break;
					}
				}
			}
		});

		while let Some(inbound) = message_rx.recv().await {
			match inbound {
				Ok(value) => self.dispatch_value(value),
				Err(e) => {
					tracing::warn!("Dropping malformed message: {}", e);
					self.events.emit_error(e);
				}
			}
		}

		self.closed.store(true, Ordering::SeqCst);
		let _ = reader_handle.await;
		writer_handle.abort();
		self.events.emit_close();
	}

	fn dispatch_value(&self, value: Value) {
		match serde_json::from_value::<Message>(value) {
			Ok(message) => self.dispatch(message),
			Err(e) => {
				tracing::error!("Failed to parse message: {}", e);
				self.events.emit_error(e.into());
			}
		}
	}

	/// Routes one inbound message.
	pub(crate) fn dispatch(&self, message: Message) {
		match message {
			Message::Response(response) => {
				let Some(callback) = self.callbacks.lock().remove(&response.id) else {
					tracing::debug!(id = response.id, "Ignoring response for unknown request");
					return;
				};

				let result = match response.error {
					Some(error) => Err(parse_protocol_error(error)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
			}
			Message::Event(event) => {
				tracing::debug!(method = %event.method, "Dispatching event");
				self.events.emit(ConnectionEvent::Server(ServerEvent::from_parts(
					event.method,
					event.params,
				)));
			}
			Message::Unknown(value) => {
				tracing::debug!(
					"Unknown message type (forward-compatible, ignored): {}",
					value
				);
			}
		}
	}
}

/// Converts a response error into [`Error::Remote`].
fn parse_protocol_error(error: ResponseError) -> Error {
	match error {
		ResponseError::Payload(payload)
		| ResponseError::Wrapped {
			error: Some(payload),
			..
		} => Error::Remote {
			name: payload.name.unwrap_or_else(|| "Error".to_string()),
			message: payload.message,
			stack: payload.stack,
		},
		ResponseError::Wrapped { error: None, value } => {
			let message = match value {
				Some(Value::String(text)) => text,
				Some(Value::Null) | None => "Unknown server error".to_string(),
				Some(other) => other.to_string(),
			};
			Error::Remote {
				name: "Error".to_string(),
				message,
				stack: None,
			}
		}
	}
}
