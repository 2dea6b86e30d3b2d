use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Target the launcher mirrors test-server output under.
const SERVER_TARGET: &str = "pwt::server";

/// Maps `-v` count to a filter directive.
///
/// `dump_io` keeps mirrored server output visible below `-v`.
pub fn default_filter(verbosity: u8, dump_io: bool) -> String {
	// 0: warnings only
	// 1 (-v): info, including mirrored backend output
	// 2+ (-vv): protocol traffic
	let base = match verbosity {
		0 => "warn",
		1 => "info,pw_test_runtime=warn",
		_ => return "debug".to_string(),
	};
	if dump_io {
		format!("{base},{SERVER_TARGET}=info")
	} else {
		base.to_string()
	}
}

/// Installs the stderr subscriber. `RUST_LOG` overrides the verbosity mapping.
pub fn init_logging(verbosity: u8, dump_io: bool) {
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity, dump_io)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
