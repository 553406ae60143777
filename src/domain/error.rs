use super::topology::EnvironmentState;
use std::path::PathBuf;
use thiserror::Error;

/// Terminal outcome of an external command that did not succeed.
///
/// `Clone` so a command can hand the same outcome to every `wait` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("{program} {args:?} exited with status {code}")]
    Exit {
        program: String,
        args: Vec<String>,
        code: i32,
    },

    #[error("{program} {args:?} was terminated by signal {signal}")]
    Signaled {
        program: String,
        args: Vec<String>,
        signal: i32,
    },

    #[error("{program} failed: {reason}")]
    Failed { program: String, reason: String },

    #[error("{program} has not been started")]
    NotStarted { program: String },

    #[error("{program} was already started")]
    AlreadyStarted { program: String },
}

/// Recoverable failures of the environment model.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("cannot {action} while the environment is {state}")]
    InvalidState {
        action: &'static str,
        state: EnvironmentState,
    },

    #[error("{context} failed: {source}")]
    ProcessFailed {
        context: String,
        #[source]
        source: CommandError,
        stderr: String,
    },

    #[error("could not find docker image id. Full output:\n{output}")]
    MissingBuildMarker { output: String },

    #[error("ip address not found for {service} in network {network}")]
    IpAddressMissing { service: String, network: String },

    #[error("invalid ip address for {service}, got {found}")]
    InvalidIpAddress { service: String, found: String },

    #[error("could not find ip address for {service} in network {network}")]
    NetworkNotAttached { service: String, network: String },

    #[error("path {0:?} does not exist")]
    PathNotFound(PathBuf),
}
