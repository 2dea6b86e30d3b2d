//! `pwt replay`: feed a recorded event log through the receiver.
//!
//! The log holds one tele-report envelope (`{"method", "params"}`) per line.
//! Blank lines are skipped.

use std::io;

use pw_test_protocol::JsonEvent;
use pw_test_report::TeleReporterReceiver;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::cli::ReplayArgs;
use crate::commands::receiver_options;
use crate::error::{CliError, Result};
use crate::reporter::{ConsoleReporter, Summary, print_listing};

/// Parses one log line. `number` is 1-based and only used for errors.
pub fn parse_line(line: &str, number: usize) -> Result<Option<JsonEvent>> {
	let line = line.trim();
	if line.is_empty() {
		return Ok(None);
	}
	serde_json::from_str(line)
		.map(Some)
		.map_err(|source| CliError::InvalidEvent {
			line: number,
			source,
		})
}

/// Dispatches every event from `input` in order. Returns the number of events applied.
pub async fn replay<R, W>(
	input: R,
	receiver: &mut TeleReporterReceiver<ConsoleReporter<W>>,
) -> Result<usize>
where
	R: AsyncBufRead + Unpin,
	W: io::Write + Send,
{
	let mut lines = input.lines();
	let mut number = 0;
	let mut applied = 0;
	while let Some(line) = lines.next_line().await? {
		number += 1;
		let Some(event) = parse_line(&line, number)? else {
			continue;
		};
		if receiver.is_finished() {
			tracing::warn!(line = number, "Ignoring events after onExit");
			break;
		}
		receiver
			.dispatch_json(event)
			.await
			.map_err(|source| CliError::Dispatch {
				line: number,
				source,
			})?;
		applied += 1;
	}
	Ok(applied)
}

pub async fn execute(args: ReplayArgs, json: bool) -> Result<Summary> {
	let file = tokio::fs::File::open(&args.file)
		.await
		.map_err(|source| CliError::ReadLog {
			path: args.file.clone(),
			source,
		})?;

	let mut receiver =
		TeleReporterReceiver::new(ConsoleReporter::stdout(json), receiver_options(args.merge));
	receiver.set_listing(args.merge.list);

	let applied = replay(BufReader::new(file), &mut receiver).await?;
	tracing::debug!(applied, file = %args.file.display(), "Replay finished");

	if args.merge.list {
		print_listing(&mut io::stdout().lock(), receiver.tree(), json)?;
	}
	Ok(receiver.reporter().summary())
}

#[cfg(test)]
mod tests {
	use pw_test_report::ReceiverOptions;

	use super::*;

	const LOG: &str = r#"{"method":"onConfigure","params":{"config":{"rootDir":"/r"}}}

{"method":"onProject","params":{"project":{"name":"p","suites":[{"title":"f.spec.ts","tests":[{"testId":"t1","title":"a"}]}]}}}
{"method":"onTestBegin","params":{"testId":"t1","result":{"id":"r1"}}}
{"method":"onTestEnd","params":{"test":{"testId":"t1","expectedStatus":"passed"},"result":{"id":"r1","status":"failed","errors":[]}}}
{"method":"onExit"}
{"method":"onBegin"}
"#;

	fn receiver() -> TeleReporterReceiver<ConsoleReporter<Vec<u8>>> {
		TeleReporterReceiver::new(
			ConsoleReporter::new(Vec::new(), true),
			ReceiverOptions::default(),
		)
	}

	#[test]
	fn blank_lines_are_skipped() {
		assert!(parse_line("   ", 1).unwrap().is_none());
		let event = parse_line(r#" {"method":"onBegin"} "#, 2).unwrap().unwrap();
		assert_eq!(event.method, "onBegin");
	}

	#[test]
	fn invalid_lines_report_their_number() {
		let err = parse_line("{oops", 7).unwrap_err();
		assert!(matches!(err, CliError::InvalidEvent { line: 7, .. }));
		assert_eq!(err.to_string(), "line 7: invalid report event");
	}

	#[tokio::test]
	async fn replay_stops_after_exit() {
		let mut receiver = receiver();
		let applied = replay(LOG.as_bytes(), &mut receiver).await.unwrap();

		assert_eq!(applied, 5);
		assert!(receiver.is_finished());
		assert_eq!(receiver.reporter().summary().unexpected, 1);
	}

	#[tokio::test]
	async fn dispatch_errors_carry_the_line() {
		let log = "{\"method\":\"onTestBegin\",\"params\":{\"testId\":\"ghost\",\"result\":{\"id\":\"r1\"}}}\n";
		let err = replay(log.as_bytes(), &mut receiver()).await.unwrap_err();
		assert!(matches!(err, CliError::Dispatch { line: 1, .. }));
	}

	#[tokio::test]
	async fn missing_file_is_a_read_error() {
		let dir = tempfile::tempdir().unwrap();
		let args = ReplayArgs {
			file: dir.path().join("missing.jsonl"),
			merge: Default::default(),
		};
		let err = execute(args, true).await.unwrap_err();
		assert!(matches!(err, CliError::ReadLog { .. }));
	}

	#[tokio::test]
	async fn execute_reads_a_log_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("events.jsonl");
		std::fs::write(&path, LOG).unwrap();

		let args = ReplayArgs {
			file: path,
			merge: Default::default(),
		};
		let summary = execute(args, true).await.unwrap();
		assert_eq!(summary.unexpected, 1);
	}
}
