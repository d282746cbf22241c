use clap::Parser;
use tracing_subscriber::EnvFilter;
use wikicorpus::cli::Cli;

fn main() {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .try_init();

    if let Err(err) = cli.run() {
        tracing::error!(error = %err, "command failed");
        std::process::exit(1);
    }
}
