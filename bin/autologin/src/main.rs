mod commands;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status after Ctrl-C (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "autologin")]
#[command(
    about = "Log in to the Cursor dashboard with the desktop client's cached session",
    long_about = None
)]
#[command(disable_version_flag = true)]
struct Cli {
    /// `--show`, `--visible`, `-v` or `-s` opens a visible browser; anything
    /// else runs headless. Only the first value is used.
    #[arg(value_name = "MODE", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mode_arg = cli.args.into_iter().next();

    // The login future is dropped before exiting so a headless browser is killed
    let outcome = tokio::select! {
        result = commands::login::run(mode_arg) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(result) => result,
        None => {
            println!("\n\nCancelled");
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}
