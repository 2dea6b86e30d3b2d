//! Console sink for the receiver: one line per finished test and a summary.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use pw_test_protocol::{Chunk, StdioKind, TestStatus};
use pw_test_report::{
	FullResult, Outcome, ReportTree, Reporter, SinkResult, TestError, TestId, TestResult, TestView,
};
use serde::Serialize;
use serde_json::json;

/// Outcome tally of every test that finished at least once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
	pub expected: usize,
	pub unexpected: usize,
	pub flaky: usize,
	pub skipped: usize,
}

impl Summary {
	pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
		let mut summary = Summary::default();
		for outcome in outcomes {
			match outcome {
				Outcome::Expected => summary.expected += 1,
				Outcome::Unexpected => summary.unexpected += 1,
				Outcome::Flaky => summary.flaky += 1,
				Outcome::Skipped => summary.skipped += 1,
			}
		}
		summary
	}

	pub fn total(&self) -> usize {
		self.expected + self.unexpected + self.flaky + self.skipped
	}
}

pub struct ConsoleReporter<W = io::Stdout> {
	out: W,
	json: bool,
	outcomes: HashMap<TestId, Outcome>,
}

impl ConsoleReporter {
	pub fn stdout(json: bool) -> Self {
		Self::new(io::stdout(), json)
	}
}

impl<W: Write + Send> ConsoleReporter<W> {
	pub fn new(out: W, json: bool) -> Self {
		Self {
			out,
			json,
			outcomes: HashMap::new(),
		}
	}

	pub fn summary(&self) -> Summary {
		Summary::from_outcomes(self.outcomes.values())
	}

	pub fn into_inner(self) -> W {
		self.out
	}

	fn write_error(&mut self, error: &TestError, indent: &str) -> io::Result<()> {
		let message = error
			.message
			.as_deref()
			.or(error.value.as_deref())
			.unwrap_or("Unknown error");
		for line in message.lines() {
			writeln!(self.out, "{indent}{}", line.red())?;
		}
		Ok(())
	}
}

/// Prints every test currently in the tree, for list mode.
pub fn print_listing<W: Write>(out: &mut W, tree: &ReportTree, json: bool) -> io::Result<()> {
	let tests = tree.all_tests(tree.root());
	for &id in &tests {
		let (Some(test), Some(path)) = (tree.test(id), tree.test_title_path(id)) else {
			continue;
		};
		let path = display_path(path);
		if json {
			let location = test
				.location
				.as_ref()
				.map(|l| format!("{}:{}:{}", l.file.display(), l.line, l.column));
			let line = json!({
				"event": "test",
				"id": test.id,
				"titlePath": path,
				"location": location,
			});
			writeln!(out, "{line}")?;
		} else {
			writeln!(out, "  {}", path.join(" › "))?;
		}
	}
	if !json {
		writeln!(out, "Total: {} test(s)", tests.len())?;
	}
	out.flush()
}

/// Title path without the empty root title.
fn display_path(path: Vec<&str>) -> Vec<&str> {
	path.into_iter().filter(|title| !title.is_empty()).collect()
}

fn format_duration(duration: Duration) -> String {
	let ms = duration.as_millis();
	if ms >= 1000 {
		format!("{:.1}s", duration.as_secs_f64())
	} else {
		format!("{ms}ms")
	}
}

#[async_trait]
impl<W: Write + Send> Reporter for ConsoleReporter<W> {
	async fn on_begin(&mut self, tree: &ReportTree) -> SinkResult {
		if !self.json {
			writeln!(self.out, "Running {} test(s)", tree.test_count())?;
		}
		Ok(())
	}

	async fn on_test_end(&mut self, test: TestView<'_>, result: &TestResult) -> SinkResult {
		let outcome = test.outcome();
		self.outcomes.insert(test.handle(), outcome);
		let path = display_path(test.title_path());
		let duration = result.duration.unwrap_or_default();

		if self.json {
			let line = json!({
				"event": "testEnd",
				"id": test.id,
				"titlePath": path,
				"status": result.status,
				"expectedStatus": test.expected_status,
				"outcome": outcome.as_str(),
				"retry": result.retry,
				"durationMs": duration.as_millis() as u64,
			});
			writeln!(self.out, "{line}")?;
			return Ok(());
		}

		let mark = if result.status == TestStatus::Skipped {
			"-".yellow()
		} else if result.status == test.expected_status {
			"✓".green()
		} else {
			"✘".red()
		};
		let mut line = format!("  {mark} {}", path.join(" › "));
		if result.retry > 0 {
			line.push_str(&format!(" (retry #{})", result.retry));
		}
		writeln!(
			self.out,
			"{line} {}",
			format!("({})", format_duration(duration)).dimmed()
		)?;
		if result.status != test.expected_status {
			for error in &result.errors {
				self.write_error(error, "      ")?;
			}
		}
		Ok(())
	}

	async fn on_error(&mut self, error: &TestError) -> SinkResult {
		if self.json {
			let line = json!({"event": "error", "message": error.message, "stack": error.stack});
			writeln!(self.out, "{line}")?;
		} else {
			writeln!(self.out, "{}", "Error:".red().bold())?;
			self.write_error(error, "  ")?;
		}
		Ok(())
	}

	async fn on_stdio(
		&mut self,
		kind: StdioKind,
		chunk: &Chunk,
		test: Option<TestView<'_>>,
		_result: Option<&TestResult>,
	) -> SinkResult {
		if self.json {
			let line = json!({
				"event": "stdio",
				"type": kind,
				"testId": test.map(|t| t.id.clone()),
				"text": chunk.to_text_lossy(),
			});
			writeln!(self.out, "{line}")?;
			return Ok(());
		}
		match kind {
			StdioKind::Stdout => write!(self.out, "{}", chunk.to_text_lossy())?,
			StdioKind::Stderr => eprint!("{}", chunk.to_text_lossy()),
		}
		Ok(())
	}

	async fn on_end(&mut self, result: &FullResult) -> SinkResult {
		let summary = self.summary();
		if self.json {
			let line = json!({
				"event": "end",
				"status": result.status,
				"durationMs": result.duration.as_millis() as u64,
				"summary": summary,
			});
			writeln!(self.out, "{line}")?;
			self.out.flush()?;
			return Ok(());
		}

		writeln!(self.out)?;
		if summary.unexpected > 0 {
			writeln!(self.out, "  {}", format!("{} failed", summary.unexpected).red())?;
		}
		if summary.flaky > 0 {
			writeln!(self.out, "  {}", format!("{} flaky", summary.flaky).yellow())?;
		}
		if summary.skipped > 0 {
			writeln!(self.out, "  {}", format!("{} skipped", summary.skipped).yellow())?;
		}
		writeln!(
			self.out,
			"  {} {}",
			format!("{} passed", summary.expected).green(),
			format!("({})", format_duration(result.duration)).dimmed()
		)?;
		self.out.flush()?;
		Ok(())
	}
}
