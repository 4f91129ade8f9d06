//! Jobtree CLI.

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("jobtree=trace")
    } else {
        EnvFilter::try_from_env("JOBTREE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = jobtree::cli::Cli::parse();
    init_tracing(cli.command.trace());
    if let Err(e) = jobtree::cli::dispatch(cli) {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
