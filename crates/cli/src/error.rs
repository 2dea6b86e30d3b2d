use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// Run finished but at least one test had an unexpected outcome.
	/// The summary was already printed; only the exit code remains.
	#[error("{0} test(s) failed")]
	TestsFailed(usize),

	#[error("failed to read {path}")]
	ReadLog {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("line {line}: invalid report event")]
	InvalidEvent {
		line: usize,
		#[source]
		source: serde_json::Error,
	},

	#[error("line {line}: could not apply event")]
	Dispatch {
		line: usize,
		#[source]
		source: pw_test_report::ReceiverError,
	},

	#[error("test server exited without advertising an endpoint")]
	NoEndpoint,

	#[error("launch cancelled")]
	Cancelled,

	#[error(transparent)]
	Receiver(#[from] pw_test_report::ReceiverError),

	#[error(transparent)]
	Runtime(#[from] pw_test_runtime::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Failures whose details were already reported on stdout.
	pub fn is_output_already_printed(&self) -> bool {
		matches!(self, CliError::TestsFailed(_))
	}
}
