mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Commands};
use error::exit_with_error;

fn init_tracing(cli: &Cli) {
    // CLI tracing policy:
    //   --quiet  → always "off" (no logs, no matter what)
    //   --verbose → "info" level (library + command diagnostics)
    //   default  → "off" (clean terminal output)
    //   RUST_LOG → honoured only under --verbose, so developer env vars
    //              don't leak log lines into user-facing output.
    let filter = if cli.quiet {
        tracing_subscriber::EnvFilter::new("off")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    } else {
        tracing_subscriber::EnvFilter::new("off")
    };

    let ansi = !(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    // Disable color when --no-color flag or NO_COLOR env var is set.
    // Errors go to stderr, so piping stdout (e.g. `glimmer dump ... | xxd`)
    // should not strip color from error messages on the terminal's stderr.
    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    init_tracing(&cli);

    if let Err(e) = run(cli) {
        exit_with_error(e);
    }
}

fn run(cli: Cli) -> error::CliResult<()> {
    match cli.command {
        Commands::Build { corpus, output } => {
            commands::build::run(&corpus, output.as_deref(), cli.quiet)
        }

        Commands::Info { path } => commands::info::run(&path),

        Commands::Locate { corpus, doc_id } => commands::locate::run(&corpus, doc_id),

        Commands::Range {
            corpus,
            block_index,
        } => commands::range::run(&corpus, block_index),

        Commands::Dump {
            corpus,
            block,
            doc_id,
        } => commands::dump::run(&corpus, block, doc_id),

        Commands::Get { corpus, doc_id } => commands::get::run(&corpus, doc_id),
    }
}
