//! Replays recorded tele-report streams through the receiver.

use async_trait::async_trait;
use pw_test_protocol::{JsonEvent, TestStatus};
use pw_test_report::{
	FullConfig, FullResult, Outcome, ReceiverOptions, ReportTree, Reporter, SinkResult,
	TeleReporterReceiver, TestResult, TestView,
};
use serde_json::{Value, json};

#[derive(Default)]
struct CallLog(Vec<&'static str>);

#[async_trait]
impl Reporter for CallLog {
	async fn on_configure(&mut self, _config: &FullConfig) -> SinkResult {
		self.0.push("onConfigure");
		Ok(())
	}

	async fn on_begin(&mut self, _tree: &ReportTree) -> SinkResult {
		self.0.push("onBegin");
		Ok(())
	}

	async fn on_test_begin(&mut self, _test: TestView<'_>, _result: &TestResult) -> SinkResult {
		self.0.push("onTestBegin");
		Ok(())
	}

	async fn on_test_end(&mut self, _test: TestView<'_>, _result: &TestResult) -> SinkResult {
		self.0.push("onTestEnd");
		Ok(())
	}

	async fn on_end(&mut self, _result: &FullResult) -> SinkResult {
		self.0.push("onEnd");
		Ok(())
	}
}

fn envelope(value: Value) -> JsonEvent {
	serde_json::from_value(value).unwrap()
}

fn single_test_run(status: &str) -> Vec<JsonEvent> {
	vec![
		envelope(json!({"method": "onConfigure", "params": {"config": {"rootDir": "/r"}}})),
		envelope(json!({"method": "onProject", "params": {"project": {
			"name": "p",
			"suites": [{"title": "f.spec.ts", "tests": [{"testId": "t1", "title": "a"}]}]
		}}})),
		envelope(json!({"method": "onBegin", "params": {}})),
		envelope(json!({"method": "onTestBegin", "params": {
			"testId": "t1",
			"result": {"id": "r1", "retry": 0, "workerIndex": 0, "parallelIndex": 0, "startTime": 1700000000000.0}
		}})),
		envelope(json!({"method": "onTestEnd", "params": {
			"test": {"testId": "t1", "expectedStatus": "passed", "timeout": 30000},
			"result": {"id": "r1", "duration": 42, "status": status, "errors": []}
		}})),
		envelope(json!({"method": "onEnd", "params": {
			"result": {"status": "passed", "startTime": 1700000000000.0, "duration": 50}
		}})),
	]
}

#[tokio::test]
async fn single_passing_test_replays_in_order() {
	let mut receiver = TeleReporterReceiver::new(CallLog::default(), ReceiverOptions::default());
	for event in single_test_run("passed") {
		receiver.dispatch_json(event).await.unwrap();
	}

	assert_eq!(
		receiver.reporter().0,
		vec!["onConfigure", "onBegin", "onTestBegin", "onTestEnd", "onEnd"]
	);

	let tree = receiver.tree();
	let projects: Vec<_> = tree.projects().collect();
	assert_eq!(projects.len(), 1);
	assert_eq!(tree[projects[0]].title, "p");

	let tests = tree.all_tests(tree.root());
	assert_eq!(tests.len(), 1);
	let test = &tree[tests[0]];
	assert_eq!(test.results().len(), 1);
	assert_eq!(test.results()[0].status, TestStatus::Passed);
	assert_eq!(test.outcome(), Outcome::Expected);
	assert!(test.ok());
	assert_eq!(
		tree.test_title_path(tests[0]),
		Some(vec!["", "p", "f.spec.ts", "a"])
	);
}

#[tokio::test]
async fn failing_run_is_unexpected() {
	let mut receiver = TeleReporterReceiver::new(CallLog::default(), ReceiverOptions::default());
	for event in single_test_run("failed") {
		receiver.dispatch_json(event).await.unwrap();
	}

	let tree = receiver.tree();
	let id = tree.test_by_id("t1").unwrap();
	assert_eq!(tree[id].outcome(), Outcome::Unexpected);
	assert!(!tree[id].ok());
}

#[tokio::test]
async fn watch_rerun_merges_into_existing_tree() {
	let options = ReceiverOptions::default()
		.merge_projects(true)
		.merge_test_cases(true);
	let mut receiver = TeleReporterReceiver::new(CallLog::default(), options);

	for event in single_test_run("failed") {
		receiver.dispatch_json(event).await.unwrap();
	}
	let before = receiver.tree().test_by_id("t1").unwrap();

	let rerun = single_test_run("passed")
		.into_iter()
		.skip(1)
		.map(|mut event| {
			if event.method == "onTestBegin" {
				event.params["result"]["id"] = json!("r2");
			}
			if event.method == "onTestEnd" {
				event.params["result"]["id"] = json!("r2");
			}
			event
		});
	for event in rerun {
		receiver.dispatch_json(event).await.unwrap();
	}

	let tree = receiver.tree();
	assert_eq!(tree.test_by_id("t1"), Some(before));
	assert_eq!(tree.projects().count(), 1);
	assert_eq!(tree[before].results().len(), 2);
	assert_eq!(tree[before].outcome(), Outcome::Flaky);
}
