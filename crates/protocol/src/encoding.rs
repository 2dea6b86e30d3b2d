//! Base64 payload helpers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use base64::DecodeError;

/// Decodes a standard (padded) base64 string.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
	STANDARD.decode(data.trim())
}

/// Encodes bytes as standard base64.
pub fn encode_base64(data: &[u8]) -> String {
	STANDARD.encode(data)
}

/// A chunk of process output, either text or raw bytes.
///
/// Output that arrives with `isBase64: true` is decoded into [`Chunk::Binary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
	Text(String),
	Binary(Vec<u8>),
}

impl Chunk {
	/// Builds a chunk from a wire string, decoding base64 when flagged.
	pub fn from_wire(data: &str, is_base64: bool) -> Result<Self, DecodeError> {
		if is_base64 {
			decode_base64(data).map(Chunk::Binary)
		} else {
			Ok(Chunk::Text(data.to_string()))
		}
	}

	/// Returns the chunk as text, replacing invalid UTF-8 sequences.
	pub fn to_text_lossy(&self) -> std::borrow::Cow<'_, str> {
		match self {
			Chunk::Text(text) => std::borrow::Cow::Borrowed(text),
			Chunk::Binary(bytes) => String::from_utf8_lossy(bytes),
		}
	}

	/// Returns the chunk length in bytes.
	pub fn len(&self) -> usize {
		match self {
			Chunk::Text(text) => text.len(),
			Chunk::Binary(bytes) => bytes.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
