pub mod launch;
pub mod replay;

use pw_test_report::ReceiverOptions;

use crate::cli::{Cli, Commands, MergeArgs};
use crate::error::{CliError, Result};
use crate::reporter::Summary;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let summary = match cli.command {
		Commands::Replay(args) => replay::execute(args, cli.json).await?,
		Commands::Launch(args) => launch::execute(args, cli.json).await?,
	};
	check_summary(summary)
}

pub fn receiver_options(merge: MergeArgs) -> ReceiverOptions {
	ReceiverOptions::default()
		.merge_projects(merge.merge_projects)
		.merge_test_cases(merge.merge_tests)
}

fn check_summary(summary: Summary) -> Result<()> {
	tracing::debug!(?summary, "Run finished");
	if summary.unexpected > 0 {
		return Err(CliError::TestsFailed(summary.unexpected));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unexpected_outcomes_fail_the_run() {
		let ok = Summary {
			expected: 3,
			flaky: 1,
			..Summary::default()
		};
		assert!(check_summary(ok).is_ok());

		let failed = Summary {
			unexpected: 2,
			..Summary::default()
		};
		assert!(matches!(check_summary(failed), Err(CliError::TestsFailed(2))));
	}

	#[test]
	fn merge_flags_map_to_receiver_options() {
		let options = receiver_options(MergeArgs {
			list: true,
			merge_projects: true,
			merge_tests: false,
		});
		assert!(options.merge_projects);
		assert!(!options.merge_test_cases);
	}
}
