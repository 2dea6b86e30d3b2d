//! Error types for the test-server runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching or talking to a test server.
#[derive(Debug, Error)]
pub enum Error {
	/// No usable runtime executable (e.g. `node`) was found.
	#[error("Runtime executable not found: {0}")]
	RuntimeNotFound(String),

	/// Failed to spawn the backend process.
	#[error("Failed to launch test server: {0}")]
	LaunchFailed(String),

	/// Failed to establish a connection to the advertised endpoint.
	#[error("Failed to connect to test server: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (pipe or WebSocket I/O).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Write attempted after the transport was closed.
	#[error("Transport is closed")]
	TransportClosed,

	/// Protocol-level error (malformed frame, unexpected message shape).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error response from the test server.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name reported by the server, `"Error"` when absent.
		name: String,
		/// Human-readable error message
		message: String,
		/// Stack trace from the server (if available)
		stack: Option<String>,
	},

	/// Response channel dropped before a reply arrived.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Operation abandoned because its cancellation token fired.
	#[error("Operation cancelled")]
	Cancelled,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// WebSocket handshake or framing error.
	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
	/// Returns the remote message if this is a server error.
	pub fn error_message(&self) -> Option<&str> {
		match self {
			Error::Remote { message, .. } => Some(message),
			_ => None,
		}
	}

	/// Returns the stack trace if this is a server error with a stack.
	pub fn stack_trace(&self) -> Option<&str> {
		match self {
			Error::Remote { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	/// Returns true if the error came from a closed transport or channel.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::TransportClosed | Error::ChannelClosed)
	}
}
