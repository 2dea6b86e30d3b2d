//! `pwt launch`: start a test server and stream its report.

use std::io::Write;

use anyhow::Context;
use pw_test_protocol::{JsonEvent, ServerEvent, ServerEventKind, StdioKind, StdioParams};
use pw_test_report::TeleReporterReceiver;
use pw_test_runtime::{
	BackendClient, BackendLauncher, CancellationToken, ConnectionEvent, Error as RuntimeError,
	EventKind, EventStream, LaunchOptions,
};
use serde_json::{Value, json};

use crate::cli::LaunchArgs;
use crate::commands::receiver_options;
use crate::error::{CliError, Result};
use crate::reporter::{ConsoleReporter, Summary, print_listing};

type Receiver = TeleReporterReceiver<ConsoleReporter>;

/// Events the launch command consumes.
const STREAM_KINDS: [EventKind; 4] = [
	EventKind::Server(ServerEventKind::Report),
	EventKind::Server(ServerEventKind::Stdio),
	EventKind::Error,
	EventKind::Close,
];

pub fn launch_options(args: &LaunchArgs) -> LaunchOptions {
	let mut options = LaunchOptions::new(args.args.iter().cloned()).dump_io(args.dump_io);
	if let Some(cwd) = &args.cwd {
		options = options.cwd(cwd.clone());
	}
	for (key, value) in &args.env {
		options = options.env(key.clone(), value.clone());
	}
	for key in &args.unset {
		options = options.unset(key.clone());
	}
	options
}

pub async fn execute(args: LaunchArgs, json: bool) -> Result<Summary> {
	let launcher = BackendLauncher::new(launch_options(&args));
	// Subscribe before starting so nothing emitted during startup is missed.
	let mut stream = launcher.events().stream(&STREAM_KINDS);

	let token = CancellationToken::new();
	let interrupt = token.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::info!("Interrupted, stopping");
			interrupt.cancel();
		}
	});

	let Some(client) = launcher.start_with_cancel(&token).await? else {
		if token.is_cancelled() {
			return Err(CliError::Cancelled);
		}
		drain_errors(&mut stream);
		return Err(CliError::NoEndpoint);
	};
	tracing::info!(
		endpoint = client.endpoint(),
		pid = ?client.process().pid(),
		"Connected to test server"
	);

	let mut receiver =
		TeleReporterReceiver::new(ConsoleReporter::stdout(json), receiver_options(args.merge))
			.with_cancellation(token.clone());
	receiver.set_listing(args.merge.list);

	let outcome = match &args.call {
		Some(method) => {
			let params = args.params.clone().unwrap_or_else(|| json!({}));
			let call = Call {
				client: &client,
				method,
				params,
				json,
			};
			call.run(&token, &mut stream, &mut receiver).await
		}
		None => {
			stream_until_exit(&token, &mut stream, &mut receiver).await;
			Ok(())
		}
	};
	client.shutdown().await;
	outcome?;

	if args.merge.list {
		print_listing(&mut std::io::stdout().lock(), receiver.tree(), json)?;
	}
	Ok(receiver.reporter().summary())
}

/// One request sent with `--call`.
struct Call<'a> {
	client: &'a BackendClient,
	method: &'a str,
	params: Value,
	json: bool,
}

impl Call<'_> {
	/// Sends the request, then applies every event that arrived before its reply.
	async fn run(
		self,
		token: &CancellationToken,
		stream: &mut EventStream,
		receiver: &mut Receiver,
	) -> Result<()> {
		let method = self.method;
		let result = self
			.client
			.connection()
			.send_with_cancel(method, self.params, token)
			.await
			.map_err(|e| match e {
				RuntimeError::Cancelled => CliError::Cancelled,
				e => CliError::Anyhow(anyhow::Error::new(e).context(format!("{method} failed"))),
			})?;

		// Events and the reply share one ordered channel, so the stream already
		// holds everything the server emitted for this call.
		while let Some(event) = stream.try_recv() {
			if !handle_event(event, receiver).await {
				break;
			}
		}

		match result.get("report").and_then(Value::as_array) {
			Some(report) => {
				for item in report {
					let event: JsonEvent = serde_json::from_value(item.clone())
						.with_context(|| format!("malformed report entry in {method} result"))?;
					apply(receiver, event).await;
				}
			}
			None => print_result(method, &result, self.json)?,
		}
		Ok(())
	}
}

async fn stream_until_exit(
	token: &CancellationToken,
	stream: &mut EventStream,
	receiver: &mut Receiver,
) {
	loop {
		tokio::select! {
			_ = token.cancelled() => break,
			event = stream.recv() => {
				let Some(event) = event else { break };
				if !handle_event(event, receiver).await {
					break;
				}
			}
		}
	}
}

/// Returns `false` once the stream is over.
async fn handle_event(event: ConnectionEvent, receiver: &mut Receiver) -> bool {
	match event {
		ConnectionEvent::Server(ServerEvent::Report(event)) => {
			apply(receiver, event).await;
			!receiver.is_finished()
		}
		ConnectionEvent::Server(ServerEvent::Stdio(params)) => {
			forward_stdio(&params);
			true
		}
		ConnectionEvent::Server(_) => true,
		ConnectionEvent::Error(e) => {
			tracing::warn!("Test server error: {}", e);
			true
		}
		ConnectionEvent::Close => false,
	}
}

async fn apply(receiver: &mut Receiver, event: JsonEvent) {
	let method = event.method.clone();
	if let Err(e) = receiver.dispatch_json(event).await {
		tracing::warn!(%method, "Dropping report event: {}", e);
	}
}

fn forward_stdio(params: &StdioParams) {
	let chunk = match params.chunk() {
		Ok(chunk) => chunk,
		Err(e) => {
			tracing::warn!("Undecodable server output: {}", e);
			return;
		}
	};
	let text = chunk.to_text_lossy();
	match params.kind {
		StdioKind::Stdout => print!("{text}"),
		StdioKind::Stderr => eprint!("{text}"),
	}
}

fn drain_errors(stream: &mut EventStream) {
	while let Some(event) = stream.try_recv() {
		if let ConnectionEvent::Error(e) = event {
			tracing::error!("{}", e);
		}
	}
}

fn print_result(method: &str, result: &Value, json: bool) -> Result<()> {
	let mut out = std::io::stdout().lock();
	if json {
		writeln!(out, "{}", json!({"event": "result", "method": method, "result": result}))?;
	} else if !result.is_null() {
		writeln!(out, "{}", serde_json::to_string_pretty(result)?)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;
	use crate::cli::{Cli, Commands};

	fn parse(args: &[&str]) -> LaunchArgs {
		match Cli::try_parse_from(args).unwrap().command {
			Commands::Launch(args) => args,
			_ => panic!("Expected Launch command"),
		}
	}

	#[test]
	fn flags_become_launch_options() {
		let args = parse(&[
			"pwt", "launch", "--cwd", "/work", "--env", "CI=1", "--unset", "HOME", "--dump-io",
			"--", "cli.js", "test-server",
		]);
		let options = launch_options(&args);

		assert_eq!(options.args, vec!["cli.js", "test-server"]);
		assert_eq!(options.cwd.as_deref(), Some(std::path::Path::new("/work")));
		assert_eq!(options.env.get("CI"), Some(&Some("1".to_string())));
		assert_eq!(options.env.get("HOME"), Some(&None));
		assert!(options.dump_io);
	}

	#[tokio::test]
	async fn close_ends_the_stream() {
		let mut receiver =
			TeleReporterReceiver::new(ConsoleReporter::stdout(true), Default::default());
		assert!(!handle_event(ConnectionEvent::Close, &mut receiver).await);

		let exit = JsonEvent {
			method: "onExit".to_string(),
			params: Value::Null,
		};
		let event = ConnectionEvent::Server(ServerEvent::Report(exit));
		assert!(!handle_event(event, &mut receiver).await);
		assert!(receiver.is_finished());

		let event = ConnectionEvent::Server(ServerEvent::ListChanged);
		assert!(handle_event(event, &mut receiver).await);
	}
}
