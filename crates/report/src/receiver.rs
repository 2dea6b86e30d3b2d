//! Tele-report receiver.
//!
//! Folds an ordered stream of [`ReportEvent`]s into a [`ReportTree`] and
//! forwards each change to a [`Reporter`]. Events are applied strictly in the
//! order they are dispatched; the caller awaits each dispatch before the next.
//!
//! Repeated `onProject` payloads (watch mode, re-listing) are merged into the
//! existing tree by title so suites and tests keep their handles and the
//! results they accumulated. In listing mode, tests missing from the latest
//! payload are pruned.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pw_test_protocol::{
	Chunk, JsonAnnotation, JsonAttachment, JsonEvent, JsonLocation, JsonProject, JsonStdIo,
	JsonSuite, JsonTestCase, JsonTestEnd, JsonTestError, JsonTestResultEnd, JsonTestResultStart,
	JsonTestStepEnd, JsonTestStepStart, ReportEvent, StdioKind, decode_base64,
};
use tokio_util::sync::CancellationToken;

use crate::config::{
	ConfigOverrides, FullConfig, FullProject, default_resolve_path, parse_patterns,
};
use crate::error::{ReceiverError, Result};
use crate::model::{
	Annotation, Attachment, FullResult, Location, ReportTree, SuiteId, SuiteKind, TestCase,
	TestError, TestId, TestResult, TestStep, TestView, millis, timestamp,
};
use crate::sink::{Reporter, SinkResult};

/// Joins a wire-relative path onto `rootDir`.
pub type PathResolver = Arc<dyn Fn(&Path, &str) -> PathBuf + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReceiverOptions {
	/// Reuse a project suite with the same name instead of adding another.
	pub merge_projects: bool,
	/// Reuse tests with the same title and repeat index.
	pub merge_test_cases: bool,
	/// Defaults to [`default_resolve_path`].
	pub resolve_path: Option<PathResolver>,
	/// Drop a test's earlier results when a new attempt begins.
	pub clear_previous_results_on_test_begin: bool,
	pub config_overrides: Option<ConfigOverrides>,
}

impl fmt::Debug for ReceiverOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReceiverOptions")
			.field("merge_projects", &self.merge_projects)
			.field("merge_test_cases", &self.merge_test_cases)
			.field("resolve_path", &self.resolve_path.is_some())
			.field(
				"clear_previous_results_on_test_begin",
				&self.clear_previous_results_on_test_begin,
			)
			.field("config_overrides", &self.config_overrides)
			.finish()
	}
}

impl ReceiverOptions {
	pub fn merge_projects(mut self, merge: bool) -> Self {
		self.merge_projects = merge;
		self
	}

	pub fn merge_test_cases(mut self, merge: bool) -> Self {
		self.merge_test_cases = merge;
		self
	}

	pub fn resolve_path<F>(mut self, resolve: F) -> Self
	where
		F: Fn(&Path, &str) -> PathBuf + Send + Sync + 'static,
	{
		self.resolve_path = Some(Arc::new(resolve));
		self
	}

	pub fn clear_previous_results_on_test_begin(mut self, clear: bool) -> Self {
		self.clear_previous_results_on_test_begin = clear;
		self
	}

	pub fn config_overrides(mut self, overrides: ConfigOverrides) -> Self {
		self.config_overrides = Some(overrides);
		self
	}
}

/// Rebuilds a test run from tele-report events.
pub struct TeleReporterReceiver<R> {
	reporter: R,
	options: ReceiverOptions,
	tree: ReportTree,
	root_dir: Option<PathBuf>,
	config: Option<FullConfig>,
	listing: bool,
	finished: bool,
	token: CancellationToken,
}

impl<R: Reporter> TeleReporterReceiver<R> {
	pub fn new(reporter: R, options: ReceiverOptions) -> Self {
		Self {
			reporter,
			options,
			tree: ReportTree::new(),
			root_dir: None,
			config: None,
			listing: false,
			finished: false,
			token: CancellationToken::new(),
		}
	}

	/// Once `token` fires, the tree keeps updating but only `on_end` and
	/// `on_exit` reach the reporter.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.token = token;
		self
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.token
	}

	pub fn tree(&self) -> &ReportTree {
		&self.tree
	}

	pub fn config(&self) -> Option<&FullConfig> {
		self.config.as_ref()
	}

	pub fn reporter(&self) -> &R {
		&self.reporter
	}

	pub fn reporter_mut(&mut self) -> &mut R {
		&mut self.reporter
	}

	pub fn into_reporter(self) -> R {
		self.reporter
	}

	/// Listing mode prunes tests absent from each `onProject` payload.
	pub fn is_listing(&self) -> bool {
		self.listing
	}

	pub fn set_listing(&mut self, listing: bool) {
		self.listing = listing;
	}

	pub fn is_finished(&self) -> bool {
		self.finished
	}

	/// Starts a new session: empty tree, no known tests. Config is kept.
	pub fn reset(&mut self) {
		self.tree = ReportTree::new();
		self.finished = false;
	}

	/// Parses and applies one raw envelope.
	pub async fn dispatch_json(&mut self, event: JsonEvent) -> Result<()> {
		let event = ReportEvent::from_json(event)?;
		self.dispatch(event).await
	}

	/// Applies one event and forwards it to the reporter.
	pub async fn dispatch(&mut self, event: ReportEvent) -> Result<()> {
		if self.finished {
			return Err(ReceiverError::SessionFinished);
		}
		tracing::debug!(method = event.method(), "Dispatching report event");

		match event {
			ReportEvent::Configure(config) => {
				self.root_dir = Some(PathBuf::from(&config.root_dir));
				let mut parsed = FullConfig::from_wire(&config);
				if let Some(overrides) = &self.options.config_overrides {
					parsed.apply(overrides);
				}
				let config = self.config.insert(parsed);
				if !self.token.is_cancelled() {
					log_sink("onConfigure", self.reporter.on_configure(config).await);
				}
			}
			ReportEvent::Project(project) => self.on_project(project)?,
			ReportEvent::Begin => {
				if self.forwarding() {
					log_sink("onBegin", self.reporter.on_begin(&self.tree).await);
				}
			}
			ReportEvent::TestBegin { test_id, result } => self.on_test_begin(&test_id, result).await?,
			ReportEvent::TestEnd { test, result } => self.on_test_end(test, result).await?,
			ReportEvent::StepBegin {
				test_id,
				result_id,
				step,
			} => self.on_step_begin(&test_id, &result_id, step).await?,
			ReportEvent::StepEnd {
				test_id,
				result_id,
				step,
			} => self.on_step_end(&test_id, &result_id, step).await?,
			ReportEvent::Attach {
				test_id,
				result_id,
				attachments,
			} => self.on_attach(&test_id, &result_id, attachments)?,
			ReportEvent::Error(error) => {
				let error = convert_error(error);
				if self.forwarding() {
					log_sink("onError", self.reporter.on_error(&error).await);
				}
			}
			ReportEvent::StdIo(stdio) => self.on_stdio(stdio).await?,
			ReportEvent::End(result) => {
				let result = FullResult {
					status: result.status,
					start_time: timestamp(result.start_time),
					duration: millis(result.duration),
				};
				log_sink("onEnd", self.reporter.on_end(&result).await);
			}
			ReportEvent::Exit => {
				self.finished = true;
				log_sink("onExit", self.reporter.on_exit().await);
			}
			ReportEvent::Unknown { method, .. } => {
				tracing::debug!(%method, "Ignoring unknown report event");
			}
		}
		Ok(())
	}

	fn forwarding(&self) -> bool {
		!self.token.is_cancelled()
	}

	fn on_project(&mut self, project: JsonProject) -> Result<()> {
		if self.root_dir.is_none() {
			return Err(ReceiverError::NotConfigured("onProject"));
		}

		let root = self.tree.root();
		let existing = if self.options.merge_projects {
			self.tree.child_suite(root, &project.name)
		} else {
			None
		};
		let project_suite = match existing {
			Some(id) => id,
			None => self
				.tree
				.add_suite(root, project.name.clone(), SuiteKind::Project),
		};

		let settings = self.parse_project(&project);
		self.tree.set_project(project_suite, settings);

		for suite in &project.suites {
			self.merge_suite(suite, project_suite);
		}

		if self.listing {
			let mut ids = Vec::new();
			for suite in &project.suites {
				suite.collect_test_ids(&mut ids);
			}
			let ids: HashSet<&str> = ids.into_iter().collect();
			self.tree
				.retain_tests(project_suite, &|test: &TestCase| ids.contains(test.id.as_str()));
		}
		Ok(())
	}

	fn merge_suite(&mut self, json: &JsonSuite, parent: SuiteId) {
		let target = match self.tree.child_suite(parent, &json.title) {
			Some(id) => id,
			None => {
				let kind = if self.tree[parent].kind == SuiteKind::Project {
					SuiteKind::File
				} else {
					SuiteKind::Describe
				};
				self.tree.add_suite(parent, json.title.clone(), kind)
			}
		};
		let location = self.location(json.location.as_ref());
		self.tree.suite_mut(target).location = location;

		for child in json.children() {
			match child {
				pw_test_protocol::JsonChild::Suite(suite) => self.merge_suite(suite, target),
				pw_test_protocol::JsonChild::Test(test) => self.merge_test(test, target),
			}
		}
	}

	fn merge_test(&mut self, json: &JsonTestCase, parent: SuiteId) {
		let existing = if self.options.merge_test_cases {
			self.tree
				.child_test(parent, &json.title, json.repeat_each_index)
		} else {
			None
		};
		let id = match existing {
			Some(id) => {
				self.tree.rekey_test(id, &json.test_id);
				id
			}
			None => self.tree.add_test(
				parent,
				json.test_id.clone(),
				json.title.clone(),
				json.repeat_each_index,
			),
		};

		let location = self.location(json.location.as_ref());
		let annotations = self.annotations(&json.annotations);
		if let Some(test) = self.tree.test_mut(id) {
			test.location = location;
			test.retries = json.retries;
			test.tags = json.tags.clone();
			test.annotations = annotations;
		}
	}

	async fn on_test_begin(&mut self, test_id: &str, payload: JsonTestResultStart) -> Result<()> {
		let id = self.lookup_test(test_id)?;
		let clear = self.options.clear_previous_results_on_test_begin;
		let test = self
			.tree
			.test_mut(id)
			.ok_or_else(|| ReceiverError::unknown_test(test_id))?;
		if clear {
			test.clear_results();
		}
		let result = test.create_result(payload.id.clone());
		result.retry = payload.retry;
		result.worker_index = payload.worker_index;
		result.parallel_index = payload.parallel_index;
		result.start_time = timestamp(payload.start_time);

		if self.forwarding() {
			if let Some((view, result)) = attempt(&self.tree, id, &payload.id) {
				log_sink("onTestBegin", self.reporter.on_test_begin(view, result).await);
			}
		}
		Ok(())
	}

	async fn on_test_end(&mut self, test_end: JsonTestEnd, payload: JsonTestResultEnd) -> Result<()> {
		let attachments = payload
			.attachments
			.map(parse_attachments)
			.transpose()?;
		let result_annotations = payload.annotations.map(|a| self.annotations(&a));
		let test_annotations = test_end.annotations.map(|a| self.annotations(&a));
		let errors: Vec<TestError> = payload.errors.into_iter().map(convert_error).collect();

		let test_id = test_end.test_id.as_str();
		let id = self.lookup_test(test_id)?;
		let test = self
			.tree
			.test_mut(id)
			.ok_or_else(|| ReceiverError::unknown_test(test_id))?;
		if test.result(&payload.id).is_none() {
			return Err(ReceiverError::unknown_result(test_id, &payload.id));
		}
		test.timeout = millis(test_end.timeout);
		test.expected_status = test_end.expected_status;
		if let Some(annotations) = test_annotations {
			test.annotations = annotations;
		}

		let result = test
			.result_mut(&payload.id)
			.ok_or_else(|| ReceiverError::unknown_result(test_id, &payload.id))?;
		result.duration = Some(millis(payload.duration));
		result.status = payload.status;
		result.error = errors.first().cloned();
		result.errors = errors;
		if let Some(attachments) = attachments {
			result.attachments = attachments;
		}
		if let Some(annotations) = result_annotations {
			result.annotations = annotations;
		}

		if self.forwarding() {
			if let Some((view, result)) = attempt(&self.tree, id, &payload.id) {
				log_sink("onTestEnd", self.reporter.on_test_end(view, result).await);
			}
		}

		// Late step events for this attempt are protocol violations from here on.
		if let Some(result) = self
			.tree
			.test_mut(id)
			.and_then(|test| test.result_mut(&payload.id))
		{
			result.release_steps();
		}
		Ok(())
	}

	async fn on_step_begin(
		&mut self,
		test_id: &str,
		result_id: &str,
		payload: JsonTestStepStart,
	) -> Result<()> {
		let location = self.location(payload.location.as_ref());
		let result = self.lookup_result_mut(test_id, result_id)?;
		if result.steps_released() {
			return Err(ReceiverError::unknown_step(test_id, &payload.id, true));
		}
		let parent = match payload.parent_step_id.as_deref() {
			Some(parent_id) => Some(
				result
					.step_by_wire_id(parent_id)
					.ok_or_else(|| ReceiverError::unknown_step(test_id, parent_id, false))?,
			),
			None => None,
		};

		let step = TestStep::new(
			payload.id,
			payload.title,
			payload.category,
			location,
			timestamp(payload.start_time),
		);
		let step_id = result.add_step(step, parent);

		if self.forwarding() {
			let id = self.lookup_test(test_id)?;
			if let Some((view, result)) = attempt(&self.tree, id, result_id) {
				log_sink(
					"onStepBegin",
					self.reporter.on_step_begin(view, result, step_id).await,
				);
			}
		}
		Ok(())
	}

	async fn on_step_end(
		&mut self,
		test_id: &str,
		result_id: &str,
		payload: JsonTestStepEnd,
	) -> Result<()> {
		let result = self.lookup_result_mut(test_id, result_id)?;
		let step_id = result.step_by_wire_id(&payload.id).ok_or_else(|| {
			ReceiverError::unknown_step(test_id, &payload.id, result.steps_released())
		})?;

		let step = result.step_mut(step_id);
		step.duration = Some(millis(payload.duration));
		step.error = payload.error.map(convert_error);
		step.attachment_indices = payload.attachments;

		if self.forwarding() {
			let id = self.lookup_test(test_id)?;
			if let Some((view, result)) = attempt(&self.tree, id, result_id) {
				log_sink(
					"onStepEnd",
					self.reporter.on_step_end(view, result, step_id).await,
				);
			}
		}
		Ok(())
	}

	fn on_attach(
		&mut self,
		test_id: &str,
		result_id: &str,
		attachments: Vec<JsonAttachment>,
	) -> Result<()> {
		let attachments = parse_attachments(attachments)?;
		let result = self.lookup_result_mut(test_id, result_id)?;
		result.attachments.extend(attachments);
		Ok(())
	}

	async fn on_stdio(&mut self, stdio: JsonStdIo) -> Result<()> {
		let chunk = Chunk::from_wire(&stdio.data, stdio.is_base64)?;

		let test = stdio
			.test_id
			.as_deref()
			.and_then(|test_id| self.tree.test_by_id(test_id));
		let result_id = stdio.result_id.as_deref();

		let owner = test.zip(result_id).and_then(|(id, result_id)| {
			self.tree
				.test_mut(id)
				.and_then(|test| test.result_mut(result_id))
		});
		if let Some(result) = owner {
			match stdio.kind {
				StdioKind::Stdout => result.stdout.push(chunk.clone()),
				StdioKind::Stderr => result.stderr.push(chunk.clone()),
			}
		}

		if self.forwarding() {
			let view = test.and_then(|id| self.tree.view(id));
			let result = test
				.and_then(|id| self.tree.test(id))
				.zip(result_id)
				.and_then(|(test, result_id)| test.result(result_id));
			log_sink(
				"onStdIO",
				self.reporter.on_stdio(stdio.kind, &chunk, view, result).await,
			);
		}
		Ok(())
	}

	fn lookup_test(&self, test_id: &str) -> Result<TestId> {
		self.tree
			.test_by_id(test_id)
			.ok_or_else(|| ReceiverError::unknown_test(test_id))
	}

	fn lookup_result_mut(&mut self, test_id: &str, result_id: &str) -> Result<&mut TestResult> {
		let id = self.lookup_test(test_id)?;
		self.tree
			.test_mut(id)
			.ok_or_else(|| ReceiverError::unknown_test(test_id))?
			.result_mut(result_id)
			.ok_or_else(|| ReceiverError::unknown_result(test_id, result_id))
	}

	fn resolve(&self, relative: &str) -> PathBuf {
		let root = self.root_dir.as_deref().unwrap_or(Path::new(""));
		match &self.options.resolve_path {
			Some(resolve) => resolve(root, relative),
			None => default_resolve_path(root, relative),
		}
	}

	fn location(&self, location: Option<&JsonLocation>) -> Option<Location> {
		let location = location?;
		Some(Location {
			file: self.resolve(&location.file),
			line: location.line,
			column: location.column,
		})
	}

	fn annotations(&self, annotations: &[JsonAnnotation]) -> Vec<Annotation> {
		annotations
			.iter()
			.map(|annotation| Annotation {
				kind: annotation.kind.clone(),
				description: annotation.description.clone(),
				location: self.location(annotation.location.as_ref()),
			})
			.collect()
	}

	fn parse_project(&self, project: &JsonProject) -> FullProject {
		let dir = |dir: &Option<String>| dir.as_deref().map(|dir| self.resolve(dir));
		FullProject {
			name: project.name.clone(),
			metadata: project.metadata.clone(),
			output_dir: dir(&project.output_dir),
			repeat_each: project.repeat_each,
			retries: project.retries,
			test_dir: dir(&project.test_dir),
			test_ignore: parse_patterns(&project.test_ignore),
			test_match: parse_patterns(&project.test_match),
			timeout: millis(project.timeout),
			grep: parse_patterns(&project.grep),
			grep_invert: parse_patterns(&project.grep_invert),
			dependencies: project.dependencies.clone(),
			snapshot_dir: dir(&project.snapshot_dir),
			teardown: project.teardown.clone(),
			use_options: project.use_options.clone(),
		}
	}
}

fn attempt<'a>(
	tree: &'a ReportTree,
	id: TestId,
	result_id: &str,
) -> Option<(TestView<'a>, &'a TestResult)> {
	let result = tree.test(id)?.result(result_id)?;
	Some((tree.view(id)?, result))
}

fn log_sink(method: &'static str, outcome: SinkResult) {
	if let Err(e) = outcome {
		tracing::warn!(method, "Reporter hook failed: {}", e);
	}
}

fn convert_error(error: JsonTestError) -> TestError {
	TestError {
		message: error.message,
		stack: error.stack,
		value: error.value,
		location: error.location.map(|location| Location {
			file: PathBuf::from(location.file),
			line: location.line,
			column: location.column,
		}),
		snippet: error.snippet,
	}
}

fn parse_attachments(attachments: Vec<JsonAttachment>) -> Result<Vec<Attachment>> {
	attachments
		.into_iter()
		.map(|attachment| {
			let body = attachment.base64.as_deref().map(decode_base64).transpose()?;
			Ok(Attachment {
				name: attachment.name,
				content_type: attachment.content_type,
				path: attachment.path.map(PathBuf::from),
				body,
			})
		})
		.collect()
}
