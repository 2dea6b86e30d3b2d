//! Observer interface fed by the receiver.

use async_trait::async_trait;
use pw_test_protocol::{Chunk, StdioKind};

use crate::config::FullConfig;
use crate::model::{FullResult, ReportTree, StepId, TestError, TestResult, TestView};

/// Error type sink hooks may return. The receiver logs it and moves on.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

pub type SinkResult = Result<(), SinkError>;

/// Receives the rebuilt run as it happens.
///
/// Every hook has a no-op default. Hooks are awaited in event order, so a
/// slow hook delays the next event.
#[async_trait]
pub trait Reporter: Send {
	async fn on_configure(&mut self, _config: &FullConfig) -> SinkResult {
		Ok(())
	}

	async fn on_begin(&mut self, _tree: &ReportTree) -> SinkResult {
		Ok(())
	}

	async fn on_test_begin(&mut self, _test: TestView<'_>, _result: &TestResult) -> SinkResult {
		Ok(())
	}

	async fn on_test_end(&mut self, _test: TestView<'_>, _result: &TestResult) -> SinkResult {
		Ok(())
	}

	async fn on_step_begin(
		&mut self,
		_test: TestView<'_>,
		_result: &TestResult,
		_step: StepId,
	) -> SinkResult {
		Ok(())
	}

	async fn on_step_end(
		&mut self,
		_test: TestView<'_>,
		_result: &TestResult,
		_step: StepId,
	) -> SinkResult {
		Ok(())
	}

	async fn on_error(&mut self, _error: &TestError) -> SinkResult {
		Ok(())
	}

	/// Process output; `test` and `result` are set when the chunk belongs to a known attempt.
	async fn on_stdio(
		&mut self,
		_kind: StdioKind,
		_chunk: &Chunk,
		_test: Option<TestView<'_>>,
		_result: Option<&TestResult>,
	) -> SinkResult {
		Ok(())
	}

	async fn on_end(&mut self, _result: &FullResult) -> SinkResult {
		Ok(())
	}

	async fn on_exit(&mut self) -> SinkResult {
		Ok(())
	}
}

#[async_trait]
impl<R: Reporter + ?Sized> Reporter for Box<R> {
	async fn on_configure(&mut self, config: &FullConfig) -> SinkResult {
		(**self).on_configure(config).await
	}

	async fn on_begin(&mut self, tree: &ReportTree) -> SinkResult {
		(**self).on_begin(tree).await
	}

	async fn on_test_begin(&mut self, test: TestView<'_>, result: &TestResult) -> SinkResult {
		(**self).on_test_begin(test, result).await
	}

	async fn on_test_end(&mut self, test: TestView<'_>, result: &TestResult) -> SinkResult {
		(**self).on_test_end(test, result).await
	}

	async fn on_step_begin(
		&mut self,
		test: TestView<'_>,
		result: &TestResult,
		step: StepId,
	) -> SinkResult {
		(**self).on_step_begin(test, result, step).await
	}

	async fn on_step_end(
		&mut self,
		test: TestView<'_>,
		result: &TestResult,
		step: StepId,
	) -> SinkResult {
		(**self).on_step_end(test, result, step).await
	}

	async fn on_error(&mut self, error: &TestError) -> SinkResult {
		(**self).on_error(error).await
	}

	async fn on_stdio(
		&mut self,
		kind: StdioKind,
		chunk: &Chunk,
		test: Option<TestView<'_>>,
		result: Option<&TestResult>,
	) -> SinkResult {
		(**self).on_stdio(kind, chunk, test, result).await
	}

	async fn on_end(&mut self, result: &FullResult) -> SinkResult {
		(**self).on_end(result).await
	}

	async fn on_exit(&mut self) -> SinkResult {
		(**self).on_exit().await
	}
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}
