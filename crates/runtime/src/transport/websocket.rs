use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Inbound, Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// JSON transport over a WebSocket; each text or binary message is one JSON document.
pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
	sender: WebSocketTransportSender<S>,
	receiver: WebSocketTransportReceiver<S>,
}

impl WebSocketTransport {
	/// Opens a WebSocket to `url`, adding `headers` to the handshake request.
	pub async fn connect(
		url: &str,
		headers: &[(String, String)],
	) -> Result<(Self, mpsc::UnboundedReceiver<Inbound>)> {
		let mut request = url
			.into_client_request()
			.map_err(|e| Error::ConnectionFailed(format!("Invalid endpoint '{}': {}", url, e)))?;

		for (name, value) in headers {
			let name = HeaderName::from_bytes(name.as_bytes())
				.map_err(|e| Error::ConnectionFailed(format!("Invalid header '{}': {}", name, e)))?;
			let value = HeaderValue::from_str(value)
				.map_err(|e| Error::ConnectionFailed(format!("Invalid header value: {}", e)))?;
			request.headers_mut().insert(name, value);
		}

		tracing::debug!(url, "Connecting WebSocket transport");
		let (stream, _response) = tokio_tungstenite::connect_async(request)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("WebSocket error: {}", e)))?;

		Ok(Self::from_stream(stream))
	}
}

impl<S> WebSocketTransport<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	/// Wraps an established WebSocket stream.
	pub fn from_stream(stream: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
		let (sink, stream) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: WebSocketTransportSender { sink, closed: false },
			receiver: WebSocketTransportReceiver { stream, message_tx },
		};
		(transport, message_rx)
	}

	pub fn into_parts(self) -> (WebSocketTransportSender<S>, WebSocketTransportReceiver<S>) {
		(self.sender, self.receiver)
	}

	pub fn into_transport_parts(
		self,
		message_rx: mpsc::UnboundedReceiver<Inbound>,
	) -> TransportParts {
		TransportParts {
			sender: Box::new(self.sender),
			receiver: Box::new(self.receiver),
			message_rx,
		}
	}
}

/// Write half of a [`WebSocketTransport`].
pub struct WebSocketTransportSender<S> {
	sink: SplitSink<WebSocketStream<S>, WsMessage>,
	closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> WebSocketTransportSender<S> {
	pub async fn send(&mut self, message: Value) -> Result<()> {
		if self.closed {
			return Err(Error::TransportClosed);
		}
		let text = serde_json::to_string(&message)?;
		self.sink
			.send(WsMessage::Text(text))
			.await
			.map_err(|e| Error::TransportError(format!("Failed to send WebSocket message: {}", e)))
	}

	/// Sends a close frame. Further sends fail fast.
	pub async fn close(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.sink
			.close()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to close WebSocket: {}", e)))
	}
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for WebSocketTransportSender<S> {
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(WebSocketTransportSender::send(self, message))
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(WebSocketTransportSender::close(self))
	}
}

/// Read half of a [`WebSocketTransport`].
pub struct WebSocketTransportReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<Inbound>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> WebSocketTransportReceiver<S> {
	pub async fn run_loop(&mut self) -> Result<()> {
		while let Some(frame) = self.stream.next().await {
			let message = match frame.map_err(Error::WebSocket)? {
				WsMessage::Text(text) => parse_message(text.as_bytes()),
				WsMessage::Binary(bytes) => parse_message(&bytes),
				WsMessage::Close(frame) => {
					tracing::debug!(?frame, "WebSocket closed by peer");
					return Ok(());
				}
				WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
			};

			if self.message_tx.send(message).is_err() {
				tracing::debug!("Message receiver dropped; stopping WebSocket read loop");
				return Ok(());
			}
		}
		Ok(())
	}
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> TransportReceiver
	for WebSocketTransportReceiver<S>
{
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move { self.run_loop().await })
	}
}

fn parse_message(bytes: &[u8]) -> Inbound {
	serde_json::from_slice(bytes)
		.map_err(|e| Error::ProtocolError(format!("Malformed WebSocket message: {}", e)))
}
