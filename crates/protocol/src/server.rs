//! Unsolicited test-server events.
//!
//! Besides request/response traffic, the test server pushes id-less messages
//! `{"method": ..., "params": ...}`. [`ServerEvent::from_parts`] maps them onto
//! a closed set of kinds so consumers can subscribe per kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoding::{Chunk, DecodeError};
use crate::report::{JsonEvent, StdioKind};

/// Process output forwarded by the test server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioParams {
	#[serde(rename = "type")]
	pub kind: StdioKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	/// Base64 encoded bytes, used instead of `text` for binary output.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub buffer: Option<String>,
}

impl StdioParams {
	/// Decodes the payload, preferring `buffer` over `text`.
	pub fn chunk(&self) -> Result<Chunk, DecodeError> {
		match (&self.buffer, &self.text) {
			(Some(buffer), _) => Chunk::from_wire(buffer, true),
			(None, Some(text)) => Ok(Chunk::Text(text.clone())),
			(None, None) => Ok(Chunk::Text(String::new())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFilesChangedParams {
	#[serde(default)]
	pub test_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTraceRequestedParams {
	pub trace_url: String,
}

/// Discriminant of [`ServerEvent`], used as a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
	Report,
	Stdio,
	ListChanged,
	TestFilesChanged,
	LoadTraceRequested,
	Other,
}

/// Typed unsolicited message from the test server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
	/// Wraps one tele-report event for the report receiver.
	Report(JsonEvent),
	Stdio(StdioParams),
	ListChanged,
	TestFilesChanged(TestFilesChangedParams),
	LoadTraceRequested(LoadTraceRequestedParams),
	/// Any method without a dedicated variant.
	Other { method: String, params: Value },
}

impl ServerEvent {
	/// Builds a typed event from a method name and its params.
	///
	/// Params that do not match the expected shape for a known method fall back
	/// to [`ServerEvent::Other`] so no event is lost.
	pub fn from_parts(method: String, params: Value) -> Self {
		let typed = match method.as_str() {
			"report" => serde_json::from_value(params.clone()).map(ServerEvent::Report),
			"stdio" => serde_json::from_value(params.clone()).map(ServerEvent::Stdio),
			"listChanged" => Ok(ServerEvent::ListChanged),
			"testFilesChanged" => {
				serde_json::from_value(params.clone()).map(ServerEvent::TestFilesChanged)
			}
			"loadTraceRequested" => {
				serde_json::from_value(params.clone()).map(ServerEvent::LoadTraceRequested)
			}
			_ => return ServerEvent::Other { method, params },
		};
		typed.unwrap_or(ServerEvent::Other { method, params })
	}

	pub fn kind(&self) -> ServerEventKind {
		match self {
			ServerEvent::Report(_) => ServerEventKind::Report,
			ServerEvent::Stdio(_) => ServerEventKind::Stdio,
			ServerEvent::ListChanged => ServerEventKind::ListChanged,
			ServerEvent::TestFilesChanged(_) => ServerEventKind::TestFilesChanged,
			ServerEvent::LoadTraceRequested(_) => ServerEventKind::LoadTraceRequested,
			ServerEvent::Other { .. } => ServerEventKind::Other,
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn report_event_wraps_inner_envelope() {
		let event = ServerEvent::from_parts(
			"report".to_string(),
			json!({"method": "onBegin", "params": {}}),
		);
		match event {
			ServerEvent::Report(inner) => assert_eq!(inner.method, "onBegin"),
			other => panic!("Expected Report, got {other:?}"),
		}
	}

	#[test]
	fn stdio_prefers_buffer() {
		let event = ServerEvent::from_parts(
			"stdio".to_string(),
			json!({"type": "stderr", "text": "ignored", "buffer": "AAE="}),
		);
		let ServerEvent::Stdio(params) = event else {
			panic!("Expected Stdio");
		};
		assert_eq!(params.kind, StdioKind::Stderr);
		assert_eq!(params.chunk().unwrap(), Chunk::Binary(vec![0, 1]));
	}

	#[test]
	fn mismatched_params_fall_back_to_other() {
		let event = ServerEvent::from_parts("testFilesChanged".to_string(), json!(42));
		assert_eq!(event.kind(), ServerEventKind::Other);
	}
}
