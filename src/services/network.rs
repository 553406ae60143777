use super::environment::Environment;
use crate::domain::{NetworkConfig, argv};
use anyhow::{Context, Result};
use tracing::debug;

const SUBNET_FORMAT: &str = "{{(index .IPAM.Config 0).Subnet}}";

#[derive(Debug, Clone)]
pub struct Network {
    pub(crate) name: String,
    pub(crate) config: NetworkConfig,
}

/// A declared network, borrowed from its environment.
#[derive(Clone, Copy)]
pub struct NetworkRef<'a> {
    pub(crate) env: &'a Environment,
    pub(crate) network: &'a Network,
}

impl<'a> NetworkRef<'a> {
    pub fn name(&self) -> &'a str {
        &self.network.name
    }

    pub fn config(&self) -> &'a NetworkConfig {
        &self.network.config
    }

    /// Name the orchestration CLI gives the network: `<project>_<name>`.
    pub fn runtime_name(&self) -> String {
        format!("{}_{}", self.env.project_name(), self.network.name)
    }

    /// Subnet of the network's first IPAM config, as printed by the runtime.
    pub fn cidr(&self) -> Result<String> {
        self.env.require_running("query network subnets")?;

        let runtime_name = self.runtime_name();
        debug!("inspecting subnet of {runtime_name}");
        let cmd = self.env.container_command(argv(&[
            "inspect",
            "-f",
            SUBNET_FORMAT,
            runtime_name.as_str(),
        ]));
        let out = self
            .env
            .capture(cmd, "inspect network subnet")
            .with_context(|| format!("failed to find cidr for {}", self.network.name))?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
