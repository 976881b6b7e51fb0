pub mod commands;
pub mod config;
pub mod console;
pub mod deploy;
pub mod monitor;
pub mod remote;
pub mod terminal;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "sshdeploy",
    version,
    about = "Mirror a local build output folder to a remote host over SSH/SFTP"
)]
pub struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to ./sshdeploy.toml, then the user config dir)
    #[arg(long, global = true, env = "SSHDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where to connect.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Hostname or IP address of the target (must run an SSH server)
    #[arg(short = 'H', long, env = "SSHDEPLOY_HOST")]
    pub host: Option<String>,

    /// SSH port [default: 22]
    #[arg(short, long, env = "SSHDEPLOY_PORT")]
    pub port: Option<u16>,

    /// User to log in as [default: pi]
    #[arg(short, long, env = "SSHDEPLOY_USERNAME")]
    pub username: Option<String>,

    /// Password for the user [default: raspberry]
    #[arg(short = 'w', long, env = "SSHDEPLOY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

/// What to deploy.
#[derive(Args, Debug, Clone, Default)]
pub struct DeployArgs {
    /// Local folder whose files are transferred
    #[arg(short, long, env = "SSHDEPLOY_SOURCE")]
    pub source: Option<PathBuf>,

    /// Absolute remote folder the files are transferred to
    #[arg(short, long, env = "SSHDEPLOY_TARGET")]
    pub target: Option<String>,

    /// Command to run on the target before transferring files
    #[arg(long = "pre", env = "SSHDEPLOY_PRE")]
    pub pre_command: Option<String>,

    /// Command to run on the target after transferring files
    #[arg(long = "post", env = "SSHDEPLOY_POST")]
    pub post_command: Option<String>,

    /// Delete everything in the target folder before transferring
    #[arg(long)]
    pub clean: bool,

    /// Pipe-separated file suffixes to skip [default: .ready|.vshost.exe|.vshost.exe.config]
    #[arg(long, env = "SSHDEPLOY_EXCLUDE")]
    pub exclude: Option<String>,

    /// Mark the transferred files executable for the remote user
    #[arg(long)]
    pub allow_execute: bool,
}

/// How to watch for changes.
#[derive(Args, Debug, Clone, Default)]
pub struct MonitorArgs {
    /// File whose creation or modification triggers a deployment,
    /// relative to the source folder [default: sshdeploy.ready]
    #[arg(short, long = "monitor", env = "SSHDEPLOY_MONITOR")]
    pub monitor_file: Option<PathBuf>,

    /// Seconds between polls, 1 to 60 [default: 1]
    #[arg(long, env = "SSHDEPLOY_INTERVAL")]
    pub interval: Option<u64>,

    /// Use native file notifications instead of polling
    #[arg(long)]
    pub no_poll: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (optionally) and deploy once
    Push {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        deploy: DeployArgs,

        /// Local command to run before deploying, e.g. "cargo build --release"
        #[arg(long)]
        build: Option<String>,

        /// Run the cycle against an in-memory target instead of connecting
        #[arg(long)]
        dry_run: bool,
    },
    /// Watch the source folder and deploy whenever the monitor file changes
    Monitor {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        deploy: DeployArgs,

        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Run a single command on the target
    Run {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Command line to execute
        #[arg(short, long)]
        command: String,
    },
    /// Open an interactive line-based shell on the target
    Shell {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

/// Execute the parsed command line, returning the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    console::set_quiet(cli.quiet);

    match cli.command {
        Commands::Push {
            connection,
            deploy,
            build,
            dry_run,
        } => {
            let file = config::FileConfig::discover(cli.config.as_deref())?;
            commands::push::execute(&commands::push::PushRequest {
                connection: &connection,
                deploy: &deploy,
                build: build.as_deref(),
                dry_run,
                file: &file,
            })
        }
        Commands::Monitor {
            connection,
            deploy,
            monitor,
        } => {
            let file = config::FileConfig::discover(cli.config.as_deref())?;
            commands::monitor::execute(&connection, &deploy, &monitor, &file)
        }
        Commands::Run {
            connection,
            command,
        } => {
            let file = config::FileConfig::discover(cli.config.as_deref())?;
            commands::run::execute(&connection, &command, &file)
        }
        Commands::Shell { connection } => {
            let file = config::FileConfig::discover(cli.config.as_deref())?;
            commands::shell::execute(&connection, &file)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sshdeploy", &mut std::io::stdout());
            Ok(0)
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_monitor_flags() {
        let cli = Cli::try_parse_from([
            "sshdeploy",
            "monitor",
            "-H",
            "pi.local",
            "-s",
            "out",
            "-t",
            "/home/pi/app",
            "--interval",
            "5",
            "--clean",
            "--no-poll",
        ])
        .unwrap();
        let Commands::Monitor {
            connection,
            deploy,
            monitor,
        } = cli.command
        else {
            panic!("expected monitor");
        };
        assert_eq!(connection.host.as_deref(), Some("pi.local"));
        assert_eq!(deploy.target.as_deref(), Some("/home/pi/app"));
        assert!(deploy.clean);
        assert_eq!(monitor.interval, Some(5));
        assert!(monitor.no_poll);
    }
}
