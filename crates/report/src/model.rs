//! Report tree: projects, suites, tests, results, and steps.
//!
//! Suites and tests live in arenas owned by [`ReportTree`] and refer to each
//! other through [`SuiteId`] / [`TestId`] handles. Each suite keeps key maps
//! from child title (and repeat index, for tests) to handle, so re-merging a
//! payload is a lookup-or-insert that preserves identity.
//!
//! Steps live in a per-result arena addressed by [`StepId`].

use std::collections::HashMap;
use std::ops::{Deref, Index};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pw_test_protocol::{Chunk, FullResultStatus, TestStatus};

use crate::config::FullProject;

/// Converts wire milliseconds to a [`Duration`], clamping invalid values to zero.
pub(crate) fn millis(ms: f64) -> Duration {
	if ms.is_finite() && ms > 0.0 {
		Duration::from_secs_f64(ms / 1000.0)
	} else {
		Duration::ZERO
	}
}

/// Converts wire epoch milliseconds to a timestamp.
pub(crate) fn timestamp(ms: f64) -> DateTime<Utc> {
	if !ms.is_finite() {
		return DateTime::default();
	}
	DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuiteId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteKind {
	Root,
	Project,
	File,
	Describe,
}

/// One child of a suite, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
	Suite(SuiteId),
	Test(TestId),
}

/// Absolute source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
	pub file: PathBuf,
	pub line: u32,
	pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
	pub kind: String,
	pub description: Option<String>,
	pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestError {
	pub message: Option<String>,
	pub stack: Option<String>,
	pub value: Option<String>,
	pub location: Option<Location>,
	pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
	pub name: String,
	pub content_type: String,
	pub path: Option<PathBuf>,
	/// Inline body, decoded from base64.
	pub body: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct Suite {
	pub title: String,
	pub kind: SuiteKind,
	pub location: Option<Location>,
	parent: Option<SuiteId>,
	entries: Vec<Entry>,
	project: Option<FullProject>,
	suites_by_title: HashMap<String, SuiteId>,
	tests_by_key: HashMap<(String, u32), TestId>,
}

impl Suite {
	fn new(title: String, kind: SuiteKind, parent: Option<SuiteId>) -> Self {
		Self {
			title,
			kind,
			location: None,
			parent,
			entries: Vec::new(),
			project: None,
			suites_by_title: HashMap::new(),
			tests_by_key: HashMap::new(),
		}
	}

	pub fn parent(&self) -> Option<SuiteId> {
		self.parent
	}

	pub fn entries(&self) -> &[Entry] {
		&self.entries
	}

	pub fn suites(&self) -> impl Iterator<Item = SuiteId> + '_ {
		self.entries.iter().filter_map(|entry| match entry {
			Entry::Suite(id) => Some(*id),
			Entry::Test(_) => None,
		})
	}

	pub fn tests(&self) -> impl Iterator<Item = TestId> + '_ {
		self.entries.iter().filter_map(|entry| match entry {
			Entry::Test(id) => Some(*id),
			Entry::Suite(_) => None,
		})
	}

	/// Project settings; only set on [`SuiteKind::Project`] suites.
	pub fn project_settings(&self) -> Option<&FullProject> {
		self.project.as_ref()
	}

	/// Anonymous describe blocks do not contribute to title paths.
	fn contributes_title(&self) -> bool {
		!self.title.is_empty() || self.kind != SuiteKind::Describe
	}
}

/// Merge-time classification of a test's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Skipped,
	Expected,
	Unexpected,
	Flaky,
}

impl Outcome {
	pub fn as_str(self) -> &'static str {
		match self {
			Outcome::Skipped => "skipped",
			Outcome::Expected => "expected",
			Outcome::Unexpected => "unexpected",
			Outcome::Flaky => "flaky",
		}
	}
}

#[derive(Debug)]
pub struct TestCase {
	pub id: String,
	pub title: String,
	pub location: Option<Location>,
	pub retries: u32,
	pub tags: Vec<String>,
	pub repeat_each_index: u32,
	pub annotations: Vec<Annotation>,
	pub timeout: Duration,
	pub expected_status: TestStatus,
	parent: SuiteId,
	results: Vec<TestResult>,
	result_index: HashMap<String, usize>,
}

impl TestCase {
	pub fn parent(&self) -> SuiteId {
		self.parent
	}

	pub fn results(&self) -> &[TestResult] {
		&self.results
	}

	pub fn result(&self, result_id: &str) -> Option<&TestResult> {
		self.result_index.get(result_id).map(|&i| &self.results[i])
	}

	pub(crate) fn result_mut(&mut self, result_id: &str) -> Option<&mut TestResult> {
		let index = *self.result_index.get(result_id)?;
		self.results.get_mut(index)
	}

	pub(crate) fn create_result(&mut self, result_id: String) -> &mut TestResult {
		let index = self.results.len();
		self.result_index.insert(result_id.clone(), index);
		self.results.push(TestResult::new(result_id));
		&mut self.results[index]
	}

	pub(crate) fn clear_results(&mut self) {
		self.results.clear();
		self.result_index.clear();
	}

	/// Classifies the results against `expected_status`.
	///
	/// Leading skipped or interrupted results are ignored; they come from
	/// serial-mode cascades rather than real attempts.
	pub fn outcome(&self) -> Outcome {
		let counted = |status: TestStatus| {
			!matches!(status, TestStatus::Skipped | TestStatus::Interrupted)
		};
		let results: Vec<TestStatus> = self
			.results
			.iter()
			.map(|result| result.status)
			.skip_while(|status| !counted(*status))
			.collect();
		if results.is_empty() {
			return Outcome::Skipped;
		}

		let failures = results
			.iter()
			.filter(|status| counted(**status) && **status != self.expected_status)
			.count();
		if failures == 0 {
			Outcome::Expected
		} else if failures == results.len() {
			Outcome::Unexpected
		} else {
			Outcome::Flaky
		}
	}

	pub fn ok(&self) -> bool {
		self.outcome() != Outcome::Unexpected
	}
}

#[derive(Debug)]
pub struct TestStep {
	pub id: String,
	pub title: String,
	pub category: String,
	pub location: Option<Location>,
	pub start_time: DateTime<Utc>,
	pub duration: Option<Duration>,
	pub error: Option<TestError>,
	/// Indices into the owning result's attachments.
	pub attachment_indices: Vec<usize>,
	parent: Option<StepId>,
	steps: Vec<StepId>,
}

impl TestStep {
	pub fn parent(&self) -> Option<StepId> {
		self.parent
	}

	pub fn steps(&self) -> &[StepId] {
		&self.steps
	}
}

#[derive(Debug)]
pub struct TestResult {
	pub id: String,
	pub retry: u32,
	pub worker_index: i32,
	pub parallel_index: i32,
	pub start_time: DateTime<Utc>,
	/// Set when the attempt ends.
	pub duration: Option<Duration>,
	pub status: TestStatus,
	pub stdout: Vec<Chunk>,
	pub stderr: Vec<Chunk>,
	pub attachments: Vec<Attachment>,
	pub annotations: Vec<Annotation>,
	pub errors: Vec<TestError>,
	/// First entry of `errors`.
	pub error: Option<TestError>,
	step_arena: Vec<TestStep>,
	steps: Vec<StepId>,
	/// Wire step id to step; `None` once the test ended.
	step_index: Option<HashMap<String, StepId>>,
}

impl TestResult {
	fn new(id: String) -> Self {
		Self {
			id,
			retry: 0,
			worker_index: -1,
			parallel_index: -1,
			start_time: DateTime::default(),
			duration: None,
			status: TestStatus::Skipped,
			stdout: Vec::new(),
			stderr: Vec::new(),
			attachments: Vec::new(),
			annotations: Vec::new(),
			errors: Vec::new(),
			error: None,
			step_arena: Vec::new(),
			steps: Vec::new(),
			step_index: Some(HashMap::new()),
		}
	}

	/// Top-level steps in start order.
	pub fn steps(&self) -> &[StepId] {
		&self.steps
	}

	/// `None` for a handle issued by another result.
	pub fn step(&self, id: StepId) -> Option<&TestStep> {
		self.step_arena.get(id.0)
	}

	/// Looks up a step by wire id while the test is still running.
	pub fn step_by_wire_id(&self, step_id: &str) -> Option<StepId> {
		self.step_index.as_ref()?.get(step_id).copied()
	}

	/// Whether the wire step-id map was released at test end.
	pub fn steps_released(&self) -> bool {
		self.step_index.is_none()
	}

	/// Step titles from the outermost step down to `id`.
	pub fn step_title_path(&self, id: StepId) -> Vec<&str> {
		let mut path = Vec::new();
		let mut current = Some(id);
		while let Some(step) = current.and_then(|step_id| self.step(step_id)) {
			path.push(step.title.as_str());
			current = step.parent;
		}
		path.reverse();
		path
	}

	/// Attachments a step references. Out-of-range indices are skipped.
	pub fn step_attachments(&self, id: StepId) -> Vec<&Attachment> {
		self.step(id)
			.into_iter()
			.flat_map(|step| &step.attachment_indices)
			.filter_map(|&index| self.attachments.get(index))
			.collect()
	}

	pub(crate) fn add_step(&mut self, mut step: TestStep, parent: Option<StepId>) -> StepId {
		let id = StepId(self.step_arena.len());
		step.parent = parent;
		let wire_id = step.id.clone();
		self.step_arena.push(step);
		match parent {
			Some(parent) => self.step_arena[parent.0].steps.push(id),
			None => self.steps.push(id),
		}
		if let Some(index) = self.step_index.as_mut() {
			index.insert(wire_id, id);
		}
		id
	}

	pub(crate) fn step_mut(&mut self, id: StepId) -> &mut TestStep {
		&mut self.step_arena[id.0]
	}

	pub(crate) fn release_steps(&mut self) {
		self.step_index = None;
	}
}

impl TestStep {
	pub(crate) fn new(
		id: String,
		title: String,
		category: String,
		location: Option<Location>,
		start_time: DateTime<Utc>,
	) -> Self {
		Self {
			id,
			title,
			category,
			location,
			start_time,
			duration: None,
			error: None,
			attachment_indices: Vec::new(),
			parent: None,
			steps: Vec::new(),
		}
	}
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FullResult {
	pub status: FullResultStatus,
	pub start_time: DateTime<Utc>,
	pub duration: Duration,
}

/// Arena-backed suite/test tree for one receiver session.
#[derive(Debug)]
pub struct ReportTree {
	suites: Vec<Suite>,
	tests: Vec<Option<TestCase>>,
	test_ids: HashMap<String, TestId>,
}

impl Default for ReportTree {
	fn default() -> Self {
		Self::new()
	}
}

impl ReportTree {
	pub fn new() -> Self {
		Self {
			suites: vec![Suite::new(String::new(), SuiteKind::Root, None)],
			tests: Vec::new(),
			test_ids: HashMap::new(),
		}
	}

	pub fn root(&self) -> SuiteId {
		SuiteId(0)
	}

	pub fn suite(&self, id: SuiteId) -> Option<&Suite> {
		self.suites.get(id.0)
	}

	/// Returns `None` for tests pruned from the tree.
	pub fn test(&self, id: TestId) -> Option<&TestCase> {
		self.tests.get(id.0).and_then(Option::as_ref)
	}

	pub(crate) fn test_mut(&mut self, id: TestId) -> Option<&mut TestCase> {
		self.tests.get_mut(id.0).and_then(Option::as_mut)
	}

	/// Looks up a test handle by its wire id.
	pub fn test_by_id(&self, test_id: &str) -> Option<TestId> {
		self.test_ids.get(test_id).copied()
	}

	pub fn view(&self, id: TestId) -> Option<TestView<'_>> {
		self.test(id)?;
		Some(TestView { tree: self, handle: id })
	}

	/// Project suites under the root.
	pub fn projects(&self) -> impl Iterator<Item = SuiteId> + '_ {
		self[self.root()].suites()
	}

	/// Number of live tests.
	pub fn test_count(&self) -> usize {
		self.test_ids.len()
	}

	/// Titles from the root down to `id`, skipping anonymous describe blocks.
	///
	/// The root contributes its empty title.
	pub fn suite_title_path(&self, id: SuiteId) -> Vec<&str> {
		let mut chain = Vec::new();
		let mut current = Some(id);
		while let Some(suite_id) = current {
			let suite = &self[suite_id];
			if suite.contributes_title() {
				chain.push(suite.title.as_str());
			}
			current = suite.parent;
		}
		chain.reverse();
		chain
	}

	/// `None` once the test has been pruned.
	pub fn test_title_path(&self, id: TestId) -> Option<Vec<&str>> {
		let test = self.test(id)?;
		let mut path = self.suite_title_path(test.parent);
		path.push(test.title.as_str());
		Some(path)
	}

	/// Pre-order list of every test below `id`.
	pub fn all_tests(&self, id: SuiteId) -> Vec<TestId> {
		let mut out = Vec::new();
		self.collect_tests(id, &mut out);
		out
	}

	fn collect_tests(&self, id: SuiteId, out: &mut Vec<TestId>) {
		for entry in &self[id].entries {
			match *entry {
				Entry::Test(test) => out.push(test),
				Entry::Suite(suite) => self.collect_tests(suite, out),
			}
		}
	}

	/// Nearest ancestor (or self) carrying project settings.
	pub fn suite_project(&self, id: SuiteId) -> Option<&FullProject> {
		let mut current = Some(id);
		while let Some(suite_id) = current {
			let suite = &self[suite_id];
			if let Some(project) = &suite.project {
				return Some(project);
			}
			current = suite.parent;
		}
		None
	}

	/// `None` if the test has been pruned or sits outside any project.
	pub fn test_project(&self, id: TestId) -> Option<&FullProject> {
		self.suite_project(self.test(id)?.parent)
	}

	pub(crate) fn child_suite(&self, parent: SuiteId, title: &str) -> Option<SuiteId> {
		self[parent].suites_by_title.get(title).copied()
	}

	pub(crate) fn child_test(&self, parent: SuiteId, title: &str, repeat_index: u32) -> Option<TestId> {
		self[parent]
			.tests_by_key
			.get(&(title.to_string(), repeat_index))
			.copied()
	}

	pub(crate) fn add_suite(&mut self, parent: SuiteId, title: String, kind: SuiteKind) -> SuiteId {
		let id = SuiteId(self.suites.len());
		self.suites.push(Suite::new(title.clone(), kind, Some(parent)));
		let parent = &mut self.suites[parent.0];
		parent.entries.push(Entry::Suite(id));
		parent.suites_by_title.entry(title).or_insert(id);
		id
	}

	pub(crate) fn suite_mut(&mut self, id: SuiteId) -> &mut Suite {
		&mut self.suites[id.0]
	}

	pub(crate) fn set_project(&mut self, id: SuiteId, project: FullProject) {
		self.suites[id.0].project = Some(project);
	}

	pub(crate) fn add_test(
		&mut self,
		parent: SuiteId,
		test_id: String,
		title: String,
		repeat_each_index: u32,
	) -> TestId {
		let id = TestId(self.tests.len());
		let key = (title.clone(), repeat_each_index);
		self.tests.push(Some(TestCase {
			id: test_id.clone(),
			title,
			location: None,
			retries: 0,
			tags: Vec::new(),
			repeat_each_index,
			annotations: Vec::new(),
			timeout: Duration::ZERO,
			expected_status: TestStatus::Passed,
			parent,
			results: Vec::new(),
			result_index: HashMap::new(),
		}));
		let suite = &mut self.suites[parent.0];
		suite.entries.push(Entry::Test(id));
		suite.tests_by_key.entry(key).or_insert(id);
		self.test_ids.insert(test_id, id);
		id
	}

	/// Points a test at a new wire id.
	pub(crate) fn rekey_test(&mut self, id: TestId, new_test_id: &str) {
		let Some(test) = self.tests.get_mut(id.0).and_then(Option::as_mut) else {
			return;
		};
		if test.id == new_test_id {
			return;
		}
		let old = std::mem::replace(&mut test.id, new_test_id.to_string());
		if self.test_ids.get(&old) == Some(&id) {
			self.test_ids.remove(&old);
		}
		self.test_ids.insert(new_test_id.to_string(), id);
	}

	/// Removes tests under `id` that `keep` rejects, recursively. Suites stay.
	pub(crate) fn retain_tests<F>(&mut self, id: SuiteId, keep: &F)
	where
		F: Fn(&TestCase) -> bool,
	{
		let entries = std::mem::take(&mut self.suites[id.0].entries);
		let mut kept = Vec::with_capacity(entries.len());
		for entry in entries {
			match entry {
				Entry::Suite(child) => {
					self.retain_tests(child, keep);
					kept.push(entry);
				}
				Entry::Test(test_id) => {
					let keep_test = self.test(test_id).is_some_and(|test| keep(test));
					if keep_test {
						kept.push(entry);
					} else {
						self.remove_test(id, test_id);
					}
				}
			}
		}
		self.suites[id.0].entries = kept;
	}

	fn remove_test(&mut self, parent: SuiteId, id: TestId) {
		let Some(test) = self.tests.get_mut(id.0).and_then(Option::take) else {
			return;
		};
		if self.test_ids.get(&test.id) == Some(&id) {
			self.test_ids.remove(&test.id);
		}
		let key = (test.title, test.repeat_each_index);
		let suite = &mut self.suites[parent.0];
		if suite.tests_by_key.get(&key) == Some(&id) {
			suite.tests_by_key.remove(&key);
		}
	}
}

impl Index<SuiteId> for ReportTree {
	type Output = Suite;

	/// Panics if `id` came from another tree.
	fn index(&self, id: SuiteId) -> &Suite {
		&self.suites[id.0]
	}
}

impl Index<TestId> for ReportTree {
	type Output = TestCase;

	/// Panics if the test was pruned. Use [`ReportTree::test`] for a fallible lookup.
	fn index(&self, id: TestId) -> &TestCase {
		match self.test(id) {
			Some(test) => test,
			None => panic!("test {id:?} was removed from the report tree"),
		}
	}
}

/// A test together with the tree it lives in.
#[derive(Debug, Clone, Copy)]
pub struct TestView<'a> {
	tree: &'a ReportTree,
	handle: TestId,
}

impl<'a> TestView<'a> {
	pub fn handle(&self) -> TestId {
		self.handle
	}

	pub fn tree(&self) -> &'a ReportTree {
		self.tree
	}

	pub fn title_path(&self) -> Vec<&'a str> {
		self.tree.test_title_path(self.handle).unwrap_or_default()
	}

	pub fn project(&self) -> Option<&'a FullProject> {
		self.tree.test_project(self.handle)
	}
}

impl Deref for TestView<'_> {
	type Target = TestCase;

	fn deref(&self) -> &TestCase {
		&self.tree[self.handle]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_with(statuses: &[TestStatus], expected: TestStatus) -> TestCase {
		let mut tree = ReportTree::new();
		let root = tree.root();
		let id = tree.add_test(root, "t".to_string(), "t".to_string(), 0);
		let mut test = tree.tests[id.0].take().unwrap();
		test.expected_status = expected;
		for (i, status) in statuses.iter().enumerate() {
			test.create_result(format!("r{i}")).status = *status;
		}
		test
	}

	#[test]
	fn outcome_examples() {
		use TestStatus::*;
		assert_eq!(test_with(&[Skipped, Passed], Passed).outcome(), Outcome::Expected);
		assert_eq!(test_with(&[Failed, Failed], Passed).outcome(), Outcome::Unexpected);
		assert_eq!(test_with(&[Failed, Passed], Passed).outcome(), Outcome::Flaky);
		assert_eq!(test_with(&[Skipped], Passed).outcome(), Outcome::Skipped);
		assert_eq!(test_with(&[], Passed).outcome(), Outcome::Skipped);
	}

	#[test]
	fn outcome_respects_expected_status() {
		use TestStatus::*;
		assert_eq!(test_with(&[Failed], Failed).outcome(), Outcome::Expected);
		assert_eq!(test_with(&[Interrupted, Passed], Failed).outcome(), Outcome::Unexpected);
		// Skipped after a real attempt is neither a failure nor a match.
		assert_eq!(test_with(&[Passed, Skipped], Passed).outcome(), Outcome::Expected);
		assert_eq!(test_with(&[Failed, Skipped], Passed).outcome(), Outcome::Flaky);
	}

	#[test]
	fn ok_is_false_only_for_unexpected() {
		use TestStatus::*;
		assert!(test_with(&[Skipped], Passed).ok());
		assert!(test_with(&[Failed, Passed], Passed).ok());
		assert!(!test_with(&[TimedOut], Passed).ok());
	}

	#[test]
	fn title_path_skips_anonymous_describes() {
		let mut tree = ReportTree::new();
		let project = tree.add_suite(tree.root(), "chromium".to_string(), SuiteKind::Project);
		let file = tree.add_suite(project, "login.spec.ts".to_string(), SuiteKind::File);
		let anon = tree.add_suite(file, String::new(), SuiteKind::Describe);
		let group = tree.add_suite(anon, "form".to_string(), SuiteKind::Describe);
		let test = tree.add_test(group, "id1".to_string(), "submits".to_string(), 0);

		assert_eq!(
			tree.test_title_path(test),
			Some(vec!["", "chromium", "login.spec.ts", "form", "submits"])
		);
		assert_eq!(tree.all_tests(tree.root()), vec![test]);
		assert_eq!(tree.test_by_id("id1"), Some(test));
	}

	#[test]
	fn all_tests_is_pre_order() {
		let mut tree = ReportTree::new();
		let root = tree.root();
		let file = tree.add_suite(root, "f".to_string(), SuiteKind::File);
		let a = tree.add_test(file, "a".to_string(), "a".to_string(), 0);
		let inner = tree.add_suite(file, "inner".to_string(), SuiteKind::Describe);
		let b = tree.add_test(inner, "b".to_string(), "b".to_string(), 0);
		let c = tree.add_test(file, "c".to_string(), "c".to_string(), 0);

		assert_eq!(tree.all_tests(root), vec![a, b, c]);
		assert_eq!(tree.all_tests(inner), vec![b]);
	}

	#[test]
	fn retain_tests_keeps_empty_suites() {
		let mut tree = ReportTree::new();
		let root = tree.root();
		let file = tree.add_suite(root, "f".to_string(), SuiteKind::File);
		let inner = tree.add_suite(file, "inner".to_string(), SuiteKind::Describe);
		let gone = tree.add_test(inner, "gone".to_string(), "gone".to_string(), 0);
		let kept = tree.add_test(file, "kept".to_string(), "kept".to_string(), 0);

		tree.retain_tests(root, &|test: &TestCase| test.id == "kept");

		assert!(tree.test(gone).is_none());
		assert_eq!(tree.test_by_id("gone"), None);
		assert_eq!(tree.child_test(inner, "gone", 0), None);
		assert_eq!(tree.all_tests(root), vec![kept]);
		assert_eq!(tree.child_suite(file, "inner"), Some(inner));
		assert_eq!(tree.test_count(), 1);
	}

	#[test]
	fn lookups_on_stale_handles_return_none() {
		let mut tree = ReportTree::new();
		let root = tree.root();
		let project = tree.add_suite(root, "p".to_string(), SuiteKind::Project);
		let gone = tree.add_test(project, "gone".to_string(), "gone".to_string(), 0);
		tree.retain_tests(root, &|_: &TestCase| false);

		assert_eq!(tree.test_title_path(gone), None);
		assert!(tree.test_project(gone).is_none());
		assert!(tree.view(gone).is_none());

		let id = tree.add_test(root, "t".to_string(), "t".to_string(), 0);
		let test = tree.test_mut(id).unwrap();
		let foreign = test.create_result("r1".to_string()).add_step(
			TestStep::new("s1".into(), "s".into(), "test.step".into(), None, DateTime::default()),
			None,
		);
		let empty = test.create_result("r2".to_string());
		assert!(empty.step(foreign).is_none());
		assert!(empty.step_title_path(foreign).is_empty());
		assert!(empty.step_attachments(foreign).is_empty());
	}

	#[test]
	fn step_paths_and_attachments() {
		let mut tree = ReportTree::new();
		let root = tree.root();
		let id = tree.add_test(root, "t".to_string(), "t".to_string(), 0);
		let test = tree.test_mut(id).unwrap();
		let result = test.create_result("r".to_string());
		result.attachments.push(Attachment {
			name: "shot".to_string(),
			content_type: "image/png".to_string(),
			path: None,
			body: Some(vec![1, 2]),
		});

		let outer = result.add_step(
			TestStep::new("s1".into(), "outer".into(), "test.step".into(), None, DateTime::default()),
			None,
		);
		let mut inner_step =
			TestStep::new("s2".into(), "inner".into(), "expect".into(), None, DateTime::default());
		inner_step.attachment_indices = vec![0, 5];
		let inner = result.add_step(inner_step, Some(outer));

		assert_eq!(result.steps(), &[outer]);
		assert_eq!(result.step(outer).unwrap().steps(), &[inner]);
		assert_eq!(result.step_title_path(inner), vec!["outer", "inner"]);
		assert_eq!(result.step_attachments(inner).len(), 1);
		assert_eq!(result.step_by_wire_id("s2"), Some(inner));

		result.release_steps();
		assert!(result.steps_released());
		assert_eq!(result.step_by_wire_id("s2"), None);
		assert_eq!(result.step_title_path(inner), vec!["outer", "inner"]);
	}

	#[test]
	fn wire_time_conversions() {
		assert_eq!(millis(1500.0), Duration::from_millis(1500));
		assert_eq!(millis(-1.0), Duration::ZERO);
		assert_eq!(timestamp(0.0), DateTime::<Utc>::default());
		assert_eq!(timestamp(1_700_000_000_000.0).timestamp(), 1_700_000_000);
	}
}
