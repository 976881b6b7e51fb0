//! Deployment: choosing what to send and running the single-flight cycle.
//!
//! # Example
//!
//! ```rust,ignore
//! use sshdeploy::deploy::{Deployer, DeployOptions};
//! use sshdeploy::remote::SshConnection;
//!
//! let deployer = Deployer::new(options, SshConnection::new(connection));
//! match deployer.deploy() {
//!     DeployOutcome::Completed { summary, .. } => println!("{} files", summary.files),
//!     DeployOutcome::Failed { error, .. } => eprintln!("{error}"),
//!     DeployOutcome::Skipped => {}
//! }
//! ```

pub mod orchestrator;
pub mod plan;

pub use orchestrator::{
    DeployError, DeployOptions, DeployOutcome, Deployer, DeploymentRun, TransferSummary,
};
pub use plan::{
    DEFAULT_EXCLUDES, files_to_deploy, is_deployment_trigger, is_excluded, parse_exclusions,
    remote_target_for,
};
