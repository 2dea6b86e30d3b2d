use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::framing::{NulFramer, encode_frame};
use super::{Inbound, Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 32 * 1024;

/// NUL-framed JSON transport over a pair of byte streams (typically child stdio).
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: PipeTransportReceiver<R>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `writer` and reading from `reader`.
	///
	/// Returns the transport and the channel on which decoded messages arrive.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeTransportSender {
				writer,
				closed: false,
			},
			receiver: PipeTransportReceiver {
				reader,
				framer: NulFramer::new(),
				message_tx,
			},
		};
		(transport, message_rx)
	}

	/// Writes one framed message.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		self.sender.send(message).await
	}

	/// Runs the read loop in place.
	pub async fn run(&mut self) -> Result<()> {
		self.receiver.run_loop().await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
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

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
	closed: bool,
}

impl<W: AsyncWrite + Unpin + Send> PipeTransportSender<W> {
	pub async fn send(&mut self, message: Value) -> Result<()> {
		if self.closed {
			return Err(Error::TransportClosed);
		}

		let frame = encode_frame(&message)?;
		self.writer
			.write_all(&frame)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to write message: {}", e)))?;
		self.writer
			.flush()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to flush message: {}", e)))?;
		Ok(())
	}

	/// Shuts down the write side. Further sends fail fast.
	pub async fn close(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.writer
			.shutdown()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to close pipe: {}", e)))
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}
}

impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(PipeTransportSender::send(self, message))
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(PipeTransportSender::close(self))
	}
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	framer: NulFramer,
	message_tx: mpsc::UnboundedSender<Inbound>,
}

impl<R: AsyncRead + Unpin + Send> PipeTransportReceiver<R> {
	/// Reads until EOF or until nobody listens any more.
	pub async fn run_loop(&mut self) -> Result<()> {
		let mut buf = vec![0u8; READ_CHUNK];
		loop {
			let n = self
				.reader
				.read(&mut buf)
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read from pipe: {}", e)))?;

			if n == 0 {
				if !self.framer.pending().is_empty() {
					tracing::warn!(
						bytes = self.framer.pending().len(),
						"Pipe closed with an unterminated frame; discarding"
					);
				}
				tracing::debug!("Pipe reached EOF");
				return Ok(());
			}

			for message in self.framer.dispatch(&buf[..n]) {
				if self.message_tx.send(message).is_err() {
					tracing::debug!("Message receiver dropped; stopping pipe read loop");
					return Ok(());
				}
			}
		}
	}
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for PipeTransportReceiver<R> {
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move { self.run_loop().await })
	}
}
