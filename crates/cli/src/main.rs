use clap::Parser;
use pw_test_cli::cli::{Cli, Commands};
use pw_test_cli::{commands, error::CliError, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	let dump_io = matches!(&cli.command, Commands::Launch(args) if args.dump_io);
	logging::init_logging(cli.verbose, dump_io);

	if let Err(err) = commands::dispatch(cli).await {
		// A failed run already printed its summary
		if !err.is_output_already_printed() {
			print_error(&err);
		}
		std::process::exit(1);
	}
}

fn print_error(err: &CliError) {
	eprintln!("error: {err}");
	let mut source = std::error::Error::source(err);
	while let Some(cause) = source {
		eprintln!("  caused by: {cause}");
		source = cause.source();
	}
}
