use clap::Parser;
use tracing_subscriber::EnvFilter;

use sshdeploy::{Cli, console};

const LOG_ENV: &str = "SSHDEPLOY_LOG";

fn init_logging(verbose: bool) {
    let default = if verbose { "sshdeploy=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn banner() -> String {
    let mut text = format!("SSH Deployment Tool [Version {}]", env!("CARGO_PKG_VERSION"));
    if let Some(date) = option_env!("VERGEN_BUILD_DATE") {
        text.push_str(&format!(" built {date}"));
    }
    if let Some(target) = option_env!("VERGEN_CARGO_TARGET_TRIPLE") {
        text.push_str(&format!(" ({target})"));
    }
    text
}

fn main() {
    // A missing .env is fine; clap reads SSHDEPLOY_* from the environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let prints_banner = !matches!(
        cli.command,
        sshdeploy::Commands::Completions { .. } | sshdeploy::Commands::Man
    );
    if prints_banner && !cli.quiet {
        console::line(&banner());
    }

    let code = match sshdeploy::run(cli) {
        Ok(code) => code,
        Err(err) => {
            console::error(&format!("Error - {err}"));
            for cause in err.chain().skip(1) {
                console::error(&format!("    caused by: {cause}"));
            }
            1
        }
    };
    std::process::exit(code);
}
