//! Option resolution.
//!
//! Values come from, in order of precedence: command-line flags, `SSHDEPLOY_*`
//! environment variables (both handled by clap, with `.env` loaded first),
//! an `sshdeploy.toml` file, and built-in defaults. The file is looked up in
//! the working directory, then in the user configuration directory, unless
//! `--config` names one explicitly.
//!
//! ```toml
//! host = "raspberrypi.local"
//! source = "bin/Release/net8.0/linux-arm"
//! target = "/home/pi/app"
//! post_command = "sudo systemctl restart app"
//! clean = true
//! interval = 2
//! ```

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::deploy::{DEFAULT_EXCLUDES, DeployOptions, parse_exclusions};
use crate::monitor::{MonitorError, validate_interval};
use crate::remote::ConnectionOptions;
use crate::{ConnectionArgs, DeployArgs, MonitorArgs};

pub const CONFIG_FILE_NAME: &str = "sshdeploy.toml";
pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_USERNAME: &str = "pi";
pub const DEFAULT_PASSWORD: &str = "raspberry";
pub const DEFAULT_MONITOR_FILE: &str = "sshdeploy.ready";
pub const DEFAULT_INTERVAL_SECS: u64 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required option '--{0}'")]
    Missing(&'static str),

    #[error("Source Path '{}' was not found", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Target path must be absolute: '{0}'")]
    TargetNotAbsolute(String),

    #[error(transparent)]
    InvalidInterval(#[from] MonitorError),

    #[error("Config file '{}' does not exist", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read config file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `sshdeploy.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub source: Option<PathBuf>,
    pub target: Option<String>,
    pub pre_command: Option<String>,
    pub post_command: Option<String>,
    pub clean: Option<bool>,
    pub exclude: Option<String>,
    pub allow_execute: Option<bool>,
    pub monitor_file: Option<PathBuf>,
    pub interval: Option<u64>,
    pub poll: Option<bool>,
}

impl FileConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Load `explicit` if given (it must exist), otherwise the first
    /// `sshdeploy.toml` found in the working directory or the user config
    /// directory. No file at all yields an empty config.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            return Self::load(path);
        }

        let candidates = [Some(PathBuf::from(CONFIG_FILE_NAME)), user_config_path()];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                debug!(path = %path.display(), "loading config file");
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }
}

/// `<config dir>/sshdeploy/sshdeploy.toml` for the current user.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "sshdeploy", "sshdeploy")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// How change detection runs in monitor mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Writing this file triggers a deployment.
    pub trigger_file: PathBuf,
    pub interval_secs: u64,
    /// Poll the source folder; `false` uses native file notifications.
    pub poll: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn resolve_connection(
    args: &ConnectionArgs,
    file: &FileConfig,
) -> Result<ConnectionOptions, ConfigError> {
    let host = non_empty(args.host.clone().or_else(|| file.host.clone()))
        .ok_or(ConfigError::Missing("host"))?;
    Ok(ConnectionOptions {
        host,
        port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
        username: args
            .username
            .clone()
            .or_else(|| file.username.clone())
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
        password: args
            .password
            .clone()
            .or_else(|| file.password.clone())
            .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
    })
}

/// Resolve and validate deployment options.
///
/// The source folder must exist and is made canonical so that trigger paths
/// compare equal to the paths the change detector reports.
pub fn resolve_deploy(args: &DeployArgs, file: &FileConfig) -> Result<DeployOptions, ConfigError> {
    let source = args
        .source
        .clone()
        .or_else(|| file.source.clone())
        .ok_or(ConfigError::Missing("source"))?;
    if !source.is_dir() {
        return Err(ConfigError::SourceNotFound(source));
    }
    let source = source
        .canonicalize()
        .map_err(|_| ConfigError::SourceNotFound(source.clone()))?;

    let target = non_empty(args.target.clone().or_else(|| file.target.clone()))
        .ok_or(ConfigError::Missing("target"))?;
    if !target.starts_with('/') {
        return Err(ConfigError::TargetNotAbsolute(target));
    }

    let exclude = args
        .exclude
        .clone()
        .or_else(|| file.exclude.clone())
        .unwrap_or_else(|| DEFAULT_EXCLUDES.to_string());

    Ok(DeployOptions {
        source,
        target,
        pre_command: non_empty(args.pre_command.clone().or_else(|| file.pre_command.clone())),
        post_command: non_empty(
            args.post_command
                .clone()
                .or_else(|| file.post_command.clone()),
        ),
        clean_target: args.clean || file.clean.unwrap_or(false),
        excludes: parse_exclusions(&exclude),
        allow_execute: args.allow_execute || file.allow_execute.unwrap_or(false),
    })
}

pub fn resolve_monitor(
    args: &MonitorArgs,
    source: &Path,
    file: &FileConfig,
) -> Result<MonitorOptions, ConfigError> {
    let interval_secs = args
        .interval
        .or(file.interval)
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    validate_interval(interval_secs)?;

    let monitor_file = args
        .monitor_file
        .clone()
        .or_else(|| file.monitor_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MONITOR_FILE));
    let trigger_file = normalize_trigger_path(&if monitor_file.is_absolute() {
        monitor_file
    } else {
        source.join(monitor_file)
    });

    Ok(MonitorOptions {
        trigger_file,
        interval_secs,
        poll: !args.no_poll && file.poll.unwrap_or(true),
    })
}

/// Resolve symlinks and `..` so the path compares equal to the paths the
/// change detector reports under its canonical root.
///
/// The trigger file usually does not exist yet, so its parent is resolved
/// instead; failing that the path is cleaned up lexically.
fn normalize_trigger_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let lexical = lexically_normalize(path);
    if let (Some(parent), Some(name)) = (lexical.parent(), lexical.file_name())
        && let Ok(parent) = parent.canonicalize()
    {
        return parent.join(name);
    }
    lexical
}

fn lexically_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}
