use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "pwt")]
#[command(about = "Replay or stream Playwright test-server reports")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Emit one JSON object per line instead of human-readable output
	#[arg(long, global = true)]
	pub json: bool,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Feed a recorded tele-report stream (one JSON event per line) through the receiver
	Replay(ReplayArgs),

	/// Launch a test server, optionally call one method, and stream its report
	Launch(LaunchArgs),
}

/// Receiver merge settings shared by both commands
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct MergeArgs {
	/// Treat the stream as a listing: prune tests missing from each project payload
	#[arg(long)]
	pub list: bool,

	/// Reuse project suites with the same name
	#[arg(long)]
	pub merge_projects: bool,

	/// Reuse tests with the same title and repeat index
	#[arg(long)]
	pub merge_tests: bool,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
	/// Event log to replay
	#[arg(value_name = "FILE")]
	pub file: PathBuf,

	#[command(flatten)]
	pub merge: MergeArgs,
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
	/// Working directory for the test server
	#[arg(long, value_name = "DIR")]
	pub cwd: Option<PathBuf>,

	/// Set an environment variable for the test server
	#[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
	pub env: Vec<(String, String)>,

	/// Remove an inherited environment variable
	#[arg(long = "unset", value_name = "KEY")]
	pub unset: Vec<String>,

	/// Mirror the server's stdout and stderr to the log
	#[arg(long)]
	pub dump_io: bool,

	/// Method to call once connected (e.g. listTests, runTests)
	#[arg(long, value_name = "METHOD")]
	pub call: Option<String>,

	/// JSON params for --call
	#[arg(long, value_name = "JSON", requires = "call", value_parser = parse_json)]
	pub params: Option<serde_json::Value>,

	#[command(flatten)]
	pub merge: MergeArgs,

	/// Arguments passed to the runtime (script path and its flags)
	#[arg(last = true, required = true, value_name = "ARGS")]
	pub args: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
	match raw.split_once('=') {
		Some((key, _)) if key.is_empty() => Err(format!("missing variable name in '{raw}'")),
		Some((key, value)) => Ok((key.to_string(), value.to_string())),
		None => Err(format!("expected KEY=VALUE, got '{raw}'")),
	}
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
	serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}
