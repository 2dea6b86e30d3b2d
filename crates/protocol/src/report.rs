//! Tele-report wire payloads.
//!
//! A test server streams its reporter callbacks as discrete JSON events of the
//! form `{"method": "onTestEnd", "params": {...}}`. [`JsonEvent`] is the raw
//! envelope; [`ReportEvent::from_json`] turns it into a typed event.
//!
//! All file paths inside these payloads are relative to the `rootDir` of the
//! most recent `onConfigure` event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw tele-report envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEvent {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Source location. `file` is relative to the config `rootDir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonLocation {
	pub file: String,
	#[serde(default)]
	pub line: u32,
	#[serde(default)]
	pub column: u32,
}

/// Subset of the runner's full config that travels in `onConfigure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonConfig {
	#[serde(default)]
	pub config_file: Option<String>,
	#[serde(default)]
	pub global_timeout: Option<f64>,
	#[serde(default)]
	pub max_failures: Option<u32>,
	#[serde(default)]
	pub metadata: Option<Value>,
	pub root_dir: String,
	#[serde(default)]
	pub version: Option<String>,
	#[serde(default)]
	pub workers: Option<u32>,
}

/// Serialized string-or-regex pattern (`{"s": "**/*.spec.ts"}` or
/// `{"r": {"source": "foo", "flags": "i"}}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPattern {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub s: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub r: Option<JsonRegex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRegex {
	pub source: String,
	#[serde(default)]
	pub flags: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonProject {
	pub name: String,
	#[serde(default)]
	pub metadata: Value,
	#[serde(default)]
	pub output_dir: Option<String>,
	#[serde(default)]
	pub repeat_each: u32,
	#[serde(default)]
	pub retries: u32,
	#[serde(default)]
	pub test_dir: Option<String>,
	#[serde(default)]
	pub test_ignore: Vec<JsonPattern>,
	#[serde(default)]
	pub test_match: Vec<JsonPattern>,
	#[serde(default)]
	pub timeout: f64,
	#[serde(default)]
	pub suites: Vec<JsonSuite>,
	#[serde(default)]
	pub grep: Vec<JsonPattern>,
	#[serde(default)]
	pub grep_invert: Vec<JsonPattern>,
	#[serde(default)]
	pub dependencies: Vec<String>,
	#[serde(default)]
	pub snapshot_dir: Option<String>,
	#[serde(default)]
	pub teardown: Option<String>,
	#[serde(default, rename = "use")]
	pub use_options: Value,
}

/// A suite node on the wire.
///
/// Newer servers send a single ordered `entries` list; older ones send
/// `suites` and `tests` separately. [`JsonSuite::children`] yields both forms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonSuite {
	pub title: String,
	#[serde(default)]
	pub location: Option<JsonLocation>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub entries: Vec<JsonSuiteEntry>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub suites: Vec<JsonSuite>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tests: Vec<JsonTestCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonSuiteEntry {
	/// Tests are recognized by their `testId` field.
	Test(JsonTestCase),
	Suite(JsonSuite),
}

/// Borrowed child of a [`JsonSuite`].
#[derive(Debug, Clone, Copy)]
pub enum JsonChild<'a> {
	Suite(&'a JsonSuite),
	Test(&'a JsonTestCase),
}

impl JsonSuite {
	/// Children in wire order: `entries` first, then legacy `suites`, then `tests`.
	pub fn children(&self) -> impl Iterator<Item = JsonChild<'_>> {
		self.entries
			.iter()
			.map(|entry| match entry {
				JsonSuiteEntry::Test(test) => JsonChild::Test(test),
				JsonSuiteEntry::Suite(suite) => JsonChild::Suite(suite),
			})
			.chain(self.suites.iter().map(JsonChild::Suite))
			.chain(self.tests.iter().map(JsonChild::Test))
	}

	/// Visits every test id in this suite and its descendants.
	pub fn collect_test_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
		for child in self.children() {
			match child {
				JsonChild::Suite(suite) => suite.collect_test_ids(out),
				JsonChild::Test(test) => out.push(&test.test_id),
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTestCase {
	pub test_id: String,
	pub title: String,
	#[serde(default)]
	pub location: Option<JsonLocation>,
	#[serde(default)]
	pub retries: u32,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub repeat_each_index: u32,
	#[serde(default)]
	pub annotations: Vec<JsonAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonAnnotation {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub location: Option<JsonLocation>,
}

/// Status of a single test attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
	Passed,
	Failed,
	TimedOut,
	#[default]
	Skipped,
	Interrupted,
}

impl TestStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			TestStatus::Passed => "passed",
			TestStatus::Failed => "failed",
			TestStatus::TimedOut => "timedOut",
			TestStatus::Skipped => "skipped",
			TestStatus::Interrupted => "interrupted",
		}
	}
}

impl std::fmt::Display for TestStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTestResultStart {
	pub id: String,
	#[serde(default)]
	pub retry: u32,
	#[serde(default)]
	pub worker_index: i32,
	#[serde(default)]
	pub parallel_index: i32,
	/// Milliseconds since the Unix epoch.
	#[serde(default)]
	pub start_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTestEnd {
	pub test_id: String,
	#[serde(default = "default_expected_status")]
	pub expected_status: TestStatus,
	#[serde(default)]
	pub timeout: f64,
	#[serde(default)]
	pub annotations: Option<Vec<JsonAnnotation>>,
}

fn default_expected_status() -> TestStatus {
	TestStatus::Passed
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTestResultEnd {
	pub id: String,
	#[serde(default)]
	pub duration: f64,
	#[serde(default)]
	pub status: TestStatus,
	#[serde(default)]
	pub errors: Vec<JsonTestError>,
	#[serde(default)]
	pub attachments: Option<Vec<JsonAttachment>>,
	#[serde(default)]
	pub annotations: Option<Vec<JsonAnnotation>>,
}

/// Error reported by the runner. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonTestError {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub location: Option<JsonLocation>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonAttachment {
	pub name: String,
	pub content_type: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTestStepStart {
	pub id: String,
	#[serde(default)]
	pub parent_step_id: Option<String>,
	pub title: String,
	#[serde(default)]
	pub category: String,
	#[serde(default)]
	pub start_time: f64,
	#[serde(default)]
	pub location: Option<JsonLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTestStepEnd {
	pub id: String,
	#[serde(default)]
	pub duration: f64,
	#[serde(default)]
	pub error: Option<JsonTestError>,
	/// Indices into the owning result's attachment list.
	#[serde(default)]
	pub attachments: Vec<usize>,
}

/// Overall run status reported by `onEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FullResultStatus {
	Passed,
	Failed,
	Timedout,
	Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonFullResult {
	pub status: FullResultStatus,
	#[serde(default)]
	pub start_time: f64,
	#[serde(default)]
	pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioKind {
	Stdout,
	Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonStdIo {
	#[serde(rename = "type")]
	pub kind: StdioKind,
	#[serde(default)]
	pub test_id: Option<String>,
	#[serde(default)]
	pub result_id: Option<String>,
	#[serde(default)]
	pub data: String,
	#[serde(default)]
	pub is_base64: bool,
}

/// Typed tele-report event.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
	Configure(JsonConfig),
	Project(JsonProject),
	Begin,
	TestBegin {
		test_id: String,
		result: JsonTestResultStart,
	},
	TestEnd {
		test: JsonTestEnd,
		result: JsonTestResultEnd,
	},
	StepBegin {
		test_id: String,
		result_id: String,
		step: JsonTestStepStart,
	},
	StepEnd {
		test_id: String,
		result_id: String,
		step: JsonTestStepEnd,
	},
	Attach {
		test_id: String,
		result_id: String,
		attachments: Vec<JsonAttachment>,
	},
	Error(JsonTestError),
	StdIo(JsonStdIo),
	End(JsonFullResult),
	Exit,
	/// Method this crate does not know about. Kept for forward compatibility.
	Unknown {
		method: String,
		params: Value,
	},
}

#[derive(Deserialize)]
struct ConfigureParams {
	config: JsonConfig,
}

#[derive(Deserialize)]
struct ProjectParams {
	project: JsonProject,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestBeginParams {
	test_id: String,
	result: JsonTestResultStart,
}

#[derive(Deserialize)]
struct TestEndParams {
	test: JsonTestEnd,
	result: JsonTestResultEnd,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepParams<S> {
	test_id: String,
	result_id: String,
	step: S,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachParams {
	test_id: String,
	result_id: String,
	#[serde(default)]
	attachments: Vec<JsonAttachment>,
}

#[derive(Deserialize)]
struct ErrorParams {
	error: JsonTestError,
}

#[derive(Deserialize)]
struct EndParams {
	result: JsonFullResult,
}

impl ReportEvent {
	/// Parses a raw envelope into a typed event.
	///
	/// Unknown methods map to [`ReportEvent::Unknown`]; malformed params for a
	/// known method are an error.
	pub fn from_json(event: JsonEvent) -> Result<Self, serde_json::Error> {
		let JsonEvent { method, params } = event;
		let parsed = match method.as_str() {
			"onConfigure" => {
				let p: ConfigureParams = serde_json::from_value(params)?;
				ReportEvent::Configure(p.config)
			}
			"onProject" => {
				let p: ProjectParams = serde_json::from_value(params)?;
				ReportEvent::Project(p.project)
			}
			"onBegin" => ReportEvent::Begin,
			"onTestBegin" => {
				let p: TestBeginParams = serde_json::from_value(params)?;
				ReportEvent::TestBegin {
					test_id: p.test_id,
					result: p.result,
				}
			}
			"onTestEnd" => {
				let p: TestEndParams = serde_json::from_value(params)?;
				ReportEvent::TestEnd {
					test: p.test,
					result: p.result,
				}
			}
			"onStepBegin" => {
				let p: StepParams<JsonTestStepStart> = serde_json::from_value(params)?;
				ReportEvent::StepBegin {
					test_id: p.test_id,
					result_id: p.result_id,
					step: p.step,
				}
			}
			"onStepEnd" => {
				let p: StepParams<JsonTestStepEnd> = serde_json::from_value(params)?;
				ReportEvent::StepEnd {
					test_id: p.test_id,
					result_id: p.result_id,
					step: p.step,
				}
			}
			"onAttach" => {
				let p: AttachParams = serde_json::from_value(params)?;
				ReportEvent::Attach {
					test_id: p.test_id,
					result_id: p.result_id,
					attachments: p.attachments,
				}
			}
			"onError" => {
				let p: ErrorParams = serde_json::from_value(params)?;
				ReportEvent::Error(p.error)
			}
			"onStdIO" => ReportEvent::StdIo(serde_json::from_value(params)?),
			"onEnd" => {
				let p: EndParams = serde_json::from_value(params)?;
				ReportEvent::End(p.result)
			}
			"onExit" => ReportEvent::Exit,
			_ => ReportEvent::Unknown { method, params },
		};
		Ok(parsed)
	}

	/// Parses an event straight from a JSON value.
	pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
		Self::from_json(serde_json::from_value(value)?)
	}

	/// Wire method name of this event.
	pub fn method(&self) -> &str {
		match self {
			ReportEvent::Configure(_) => "onConfigure",
			ReportEvent::Project(_) => "onProject",
			ReportEvent::Begin => "onBegin",
			ReportEvent::TestBegin { .. } => "onTestBegin",
			ReportEvent::TestEnd { .. } => "onTestEnd",
			ReportEvent::StepBegin { .. } => "onStepBegin",
			ReportEvent::StepEnd { .. } => "onStepEnd",
			ReportEvent::Attach { .. } => "onAttach",
			ReportEvent::Error(_) => "onError",
			ReportEvent::StdIo(_) => "onStdIO",
			ReportEvent::End(_) => "onEnd",
			ReportEvent::Exit => "onExit",
			ReportEvent::Unknown { method, .. } => method,
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_test_begin() {
		let event = ReportEvent::from_value(json!({
			"method": "onTestBegin",
			"params": {
				"testId": "t1",
				"result": {"id": "r1", "retry": 1, "workerIndex": 2, "parallelIndex": 0, "startTime": 1700000000000.0}
			}
		}))
		.unwrap();

		match event {
			ReportEvent::TestBegin { test_id, result } => {
				assert_eq!(test_id, "t1");
				assert_eq!(result.id, "r1");
				assert_eq!(result.retry, 1);
				assert_eq!(result.worker_index, 2);
			}
			other => panic!("Expected TestBegin, got {other:?}"),
		}
	}

	#[test]
	fn begin_and_exit_need_no_params() {
		let begin = ReportEvent::from_value(json!({"method": "onBegin"})).unwrap();
		assert_eq!(begin, ReportEvent::Begin);
		let exit = ReportEvent::from_value(json!({"method": "onExit", "params": {}})).unwrap();
		assert_eq!(exit, ReportEvent::Exit);
	}

	#[test]
	fn legacy_and_entry_suites_yield_children_in_order() {
		let suite: JsonSuite = serde_json::from_value(json!({
			"title": "file.spec.ts",
			"entries": [
				{"testId": "a", "title": "first"},
				{"title": "group", "entries": [{"testId": "b", "title": "nested"}]}
			],
			"tests": [{"testId": "c", "title": "legacy"}]
		}))
		.unwrap();

		let mut ids = Vec::new();
		suite.collect_test_ids(&mut ids);
		assert_eq!(ids, vec!["a", "b", "c"]);

		let kinds: Vec<bool> = suite
			.children()
			.map(|child| matches!(child, JsonChild::Test(_)))
			.collect();
		assert_eq!(kinds, vec![true, false, true]);
	}

	#[test]
	fn unknown_method_is_preserved() {
		let event = ReportEvent::from_value(json!({"method": "onFuture", "params": {"x": 1}})).unwrap();
		assert_eq!(event.method(), "onFuture");
	}

	#[test]
	fn malformed_known_event_is_an_error() {
		let result = ReportEvent::from_value(json!({"method": "onTestBegin", "params": {"testId": 5}}));
		assert!(result.is_err());
	}

	#[test]
	fn statuses_use_wire_spelling() {
		let status: TestStatus = serde_json::from_value(json!("timedOut")).unwrap();
		assert_eq!(status, TestStatus::TimedOut);
		let full: FullResultStatus = serde_json::from_value(json!("timedout")).unwrap();
		assert_eq!(full, FullResultStatus::Timedout);
	}
}
