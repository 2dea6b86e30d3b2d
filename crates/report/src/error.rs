//! Errors raised while folding report events into the tree.

use std::fmt;

use thiserror::Error;

/// Result type alias for receiver operations.
pub type Result<T> = std::result::Result<T, ReceiverError>;

/// Which kind of id failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationKind {
	Test,
	Result,
	Step,
}

impl fmt::Display for CorrelationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			CorrelationKind::Test => "test",
			CorrelationKind::Result => "result",
			CorrelationKind::Step => "step",
		})
	}
}

#[derive(Debug, Error)]
pub enum ReceiverError {
	/// An event referenced a test, result, or step the receiver does not know.
	///
	/// `released` is set when the step belonged to a result whose test already
	/// ended, so its step map is gone.
	#[error("Unknown {kind} id '{id}' (test '{test_id}'){}", released_suffix(.released))]
	UnknownCorrelation {
		kind: CorrelationKind,
		id: String,
		test_id: String,
		released: bool,
	},

	/// Dispatch after `onExit`.
	#[error("Report session already finished")]
	SessionFinished,

	/// An event that needs `rootDir` arrived before `onConfigure`.
	#[error("'{0}' received before onConfigure")]
	NotConfigured(&'static str),

	#[error("Malformed report event: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid base64 payload: {0}")]
	Base64(#[from] pw_test_protocol::DecodeError),
}

fn released_suffix(released: &bool) -> &'static str {
	if *released { " after the test ended" } else { "" }
}

impl ReceiverError {
	pub(crate) fn unknown_test(test_id: &str) -> Self {
		ReceiverError::UnknownCorrelation {
			kind: CorrelationKind::Test,
			id: test_id.to_string(),
			test_id: test_id.to_string(),
			released: false,
		}
	}

	pub(crate) fn unknown_result(test_id: &str, result_id: &str) -> Self {
		ReceiverError::UnknownCorrelation {
			kind: CorrelationKind::Result,
			id: result_id.to_string(),
			test_id: test_id.to_string(),
			released: false,
		}
	}

	pub(crate) fn unknown_step(test_id: &str, step_id: &str, released: bool) -> Self {
		ReceiverError::UnknownCorrelation {
			kind: CorrelationKind::Step,
			id: step_id.to_string(),
			test_id: test_id.to_string(),
			released,
		}
	}

	/// Returns the correlation kind if this is an [`UnknownCorrelation`](Self::UnknownCorrelation).
	pub fn correlation_kind(&self) -> Option<CorrelationKind> {
		match self {
			ReceiverError::UnknownCorrelation { kind, .. } => Some(*kind),
			_ => None,
		}
	}
}
