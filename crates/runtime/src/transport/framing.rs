//! NUL-delimited JSON framing.

use serde_json::Value;

use crate::error::{Error, Result};

/// Incremental splitter for NUL-terminated JSON messages.
///
/// Bytes after the last NUL of a chunk are kept as the pending prefix of the
/// next message, so the output does not depend on how the stream was chunked.
#[derive(Debug, Default)]
pub struct NulFramer {
	pending: Vec<u8>,
}

impl NulFramer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds one chunk and returns every message it completes, in order.
	///
	/// A frame that is not valid JSON yields an `Err` item; later frames in the
	/// same chunk are still decoded.
	pub fn dispatch(&mut self, chunk: &[u8]) -> Vec<Result<Value>> {
		let mut messages = Vec::new();
		let mut rest = chunk;

		while let Some(end) = rest.iter().position(|&b| b == 0) {
			let frame = if self.pending.is_empty() {
				parse_frame(&rest[..end])
			} else {
				self.pending.extend_from_slice(&rest[..end]);
				let frame = parse_frame(&self.pending);
				self.pending.clear();
				frame
			};
			messages.push(frame);
			rest = &rest[end + 1..];
		}

		self.pending.extend_from_slice(rest);
		messages
	}

	/// Bytes received after the last terminator.
	pub fn pending(&self) -> &[u8] {
		&self.pending
	}
}

fn parse_frame(bytes: &[u8]) -> Result<Value> {
	serde_json::from_slice(bytes).map_err(|e| {
		Error::ProtocolError(format!(
			"Malformed frame ({} bytes): {}",
			bytes.len(),
			e
		))
	})
}

/// Serializes a message and appends the NUL terminator.
pub fn encode_frame(message: &Value) -> Result<Vec<u8>> {
	let mut bytes = serde_json::to_vec(message)?;
	bytes.push(0);
	Ok(bytes)
}
