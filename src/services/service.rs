use super::environment::Environment;
use crate::domain::{Command, ComposeError, NetworkId, ServiceConfig, ServiceNetworkConfig, argv};
use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error};

const NETWORK_SETTINGS_FORMAT: &str = "{{json .NetworkSettings.Networks}}";
const NETWORK_LABEL_FORMAT: &str = r#"{{range $key, $value := .Labels}}{{if eq $key "com.docker.compose.network"}}{{$value}}{{end}}{{end}}"#;

#[derive(Debug, Clone)]
pub struct Service {
    pub(crate) name: String,
    pub(crate) container_name: String,
    pub(crate) config: ServiceConfig,
    pub(crate) networks: Vec<ServiceNetworkConfig>,
}

/// A declared service, borrowed from its environment.
#[derive(Clone, Copy)]
pub struct ServiceRef<'a> {
    pub(crate) env: &'a Environment,
    pub(crate) service: &'a Service,
}

impl<'a> ServiceRef<'a> {
    pub fn name(&self) -> &'a str {
        &self.service.name
    }

    pub fn container_name(&self) -> &'a str {
        &self.service.container_name
    }

    pub fn config(&self) -> &'a ServiceConfig {
        &self.service.config
    }

    pub fn networks(&self) -> &'a [ServiceNetworkConfig] {
        &self.service.networks
    }

    /// `<compose> exec -T <service> <program> <args...>` in the working dir.
    /// The command is returned unstarted.
    pub fn exec(&self, program: &str, args: &[&str]) -> Box<dyn Command> {
        self.exec_with(&["exec", "-T"], program, args)
    }

    /// Like [`exec`](Self::exec) with `--privileged`.
    pub fn sudo_exec(&self, program: &str, args: &[&str]) -> Box<dyn Command> {
        self.exec_with(&["exec", "--privileged", "-T"], program, args)
    }

    fn exec_with(&self, prefix: &[&str], program: &str, args: &[&str]) -> Box<dyn Command> {
        let mut full = argv(prefix);
        full.push(self.service.name.clone());
        full.push(program.to_string());
        full.extend(args.iter().map(|arg| (*arg).to_string()));
        self.env.compose_command(full)
    }

    /// Address the running container holds on `network`.
    ///
    /// Every network the container is attached to is inspected for its compose
    /// label; the first one labelled with the declared name wins.
    pub fn ip_address_for_network(&self, network: &NetworkId) -> Result<String> {
        self.env.require_running("query ip addresses")?;
        let network = self.env.network(network);

        let raw = self.env.capture(
            self.env.container_command(argv(&[
                "inspect",
                "-f",
                NETWORK_SETTINGS_FORMAT,
                self.container_name(),
            ])),
            "inspect network settings",
        )?;
        let settings: BTreeMap<String, serde_json::Map<String, Value>> =
            serde_json::from_slice(&raw).context("decoding network settings")?;

        for (network_id, data) in &settings {
            let label = self.env.capture(
                self.env.container_command(argv(&[
                    "inspect",
                    "-f",
                    NETWORK_LABEL_FORMAT,
                    network_id.as_str(),
                ])),
                "inspect network label",
            )?;
            let label = String::from_utf8_lossy(&label);
            let label = label.trim_matches([' ', '\n']);
            debug!("network {network_id} labelled {label:?}");
            if label != network.name() {
                continue;
            }

            return match data.get("IPAddress") {
                Some(Value::String(ip)) => Ok(ip.clone()),
                Some(other) => {
                    error!("ip address is not a string: {other}");
                    bail!(ComposeError::InvalidIpAddress {
                        service: self.name().to_string(),
                        found: json_type(other).to_string(),
                    })
                }
                None => {
                    error!("ip address not found for network {}", network.name());
                    bail!(ComposeError::IpAddressMissing {
                        service: self.name().to_string(),
                        network: network.name().to_string(),
                    })
                }
            };
        }

        error!(
            "service {} is not attached to network {}",
            self.name(),
            network.name()
        );
        bail!(ComposeError::NetworkNotAttached {
            service: self.name().to_string(),
            network: network.name().to_string(),
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_type_names() {
        assert_eq!(json_type(&Value::Null), "null");
        assert_eq!(json_type(&serde_json::json!(12)), "number");
        assert_eq!(json_type(&serde_json::json!({"a": 1})), "object");
    }
}
