pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Fakes for the command and filesystem seams, public so integration tests and
// downstream crates can script an environment without Docker.
pub mod test_support;

pub use domain::{
    Command, CommandError, Commander, ComposeConfig, ComposeError, EnvironmentState, Filesystem,
    NetworkConfig, NetworkId, ServiceConfig, ServiceId, ServiceNetworkConfig,
};
pub use infra::{Declaration, LocalFilesystem, ProcessCommander};
pub use services::{CapturedOutput, Environment, NetworkRef, ServiceRef};
