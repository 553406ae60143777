use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_VERSION: &str = "2.1";
pub const DEFAULT_COMPOSE_PROGRAM: &str = "docker-compose";
pub const DEFAULT_CONTAINER_PROGRAM: &str = "docker";
pub const DEFAULT_WORKSPACE: &str = "composebox";

/// Lifecycle of an environment. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Setup,
    Running,
    Stopped,
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Settings shared by every invocation an environment makes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ComposeConfig {
    /// Version tag written at the top of the compose document
    pub version: String,
    /// Orchestration CLI (`up`, `down`, `exec`, `logs`)
    pub compose_program: String,
    /// Container runtime CLI (`inspect`, `build`)
    pub container_program: String,
    /// Directory under the temp root that holds every environment
    pub workspace: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            compose_program: DEFAULT_COMPOSE_PROGRAM.to_string(),
            container_program: DEFAULT_CONTAINER_PROGRAM.to_string(),
            workspace: DEFAULT_WORKSPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub image: String,
    /// Overrides the image's command when not empty
    pub command: Vec<String>,
    pub privileged: bool,
}

impl ServiceConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,
}

/// Handle to a network declared in an environment.
///
/// Holds no reference to the network itself; resolve it with
/// [`Environment::network`](crate::Environment::network).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkId(pub(crate) String);

impl NetworkId {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Handle to a service declared in an environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) String);

impl ServiceId {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Attachment of a service to one declared network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNetworkConfig {
    pub network: NetworkId,
    pub aliases: Vec<String>,
}

impl ServiceNetworkConfig {
    pub fn new(network: &NetworkId) -> Self {
        Self {
            network: network.clone(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&NetworkId> for ServiceNetworkConfig {
    fn from(network: &NetworkId) -> Self {
        Self::new(network)
    }
}
