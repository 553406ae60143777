use crate::domain::{
    ComposeConfig, NetworkConfig, NetworkId, ServiceConfig, ServiceNetworkConfig,
};
use crate::services::Environment;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::info;

/// An environment described in TOML.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    #[serde(default)]
    pub runtime: ComposeConfig,
    #[serde(default)]
    pub networks: Vec<NetworkDeclaration>,
    #[serde(default)]
    pub services: Vec<ServiceDeclaration>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetworkDeclaration {
    pub name: String,
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceDeclaration {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub privileged: bool,
    pub container_name: Option<String>,
    #[serde(default)]
    pub networks: Vec<AttachmentDeclaration>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AttachmentDeclaration {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Declaration {
    pub fn parse(content: &str) -> Result<Self> {
        let declaration: Declaration = toml::from_str(content).context("parsing declaration")?;
        declaration.validate()?;
        Ok(declaration)
    }

    /// Rejects what [`Environment`] would treat as a contract violation.
    pub fn validate(&self) -> Result<()> {
        let mut networks = HashSet::new();
        for network in &self.networks {
            validate_name("network", &network.name)?;
            if !networks.insert(network.name.as_str()) {
                bail!("network '{}' is declared twice", network.name);
            }
        }

        let mut services = HashSet::new();
        for service in &self.services {
            validate_name("service", &service.name)?;
            if service.image.trim().is_empty() {
                bail!("service '{}' has no image", service.name);
            }
            if !services.insert(service.name.as_str()) {
                bail!("service '{}' is declared twice", service.name);
            }
            if let Some(container_name) = &service.container_name {
                validate_name("container", container_name)?;
            }

            let mut attached = HashSet::new();
            for attachment in &service.networks {
                if !networks.contains(attachment.name.as_str()) {
                    bail!(
                        "service '{}' is attached to undeclared network '{}'",
                        service.name,
                        attachment.name
                    );
                }
                if !attached.insert(attachment.name.as_str()) {
                    bail!(
                        "service '{}' is attached to network '{}' twice",
                        service.name,
                        attachment.name
                    );
                }
            }
        }

        Ok(())
    }

    /// Declares every network, then every service, on a fresh environment.
    pub fn declare_on(&self, mut env: Environment) -> Environment {
        let mut ids: HashMap<&str, NetworkId> = HashMap::new();
        for network in &self.networks {
            let id = env.add_network(
                &network.name,
                NetworkConfig {
                    driver: network.driver.clone(),
                    driver_opts: network.driver_opts.clone(),
                },
            );
            ids.insert(network.name.as_str(), id);
        }

        for service in &self.services {
            let attachments = service
                .networks
                .iter()
                .filter_map(|attachment| {
                    ids.get(attachment.name.as_str()).map(|id| {
                        ServiceNetworkConfig::new(id).with_aliases(attachment.aliases.clone())
                    })
                })
                .collect();
            let config = ServiceConfig {
                image: service.image.clone(),
                command: service.command.clone(),
                privileged: service.privileged,
            };
            let id = env.add_service(&service.name, config, attachments);
            if let Some(container_name) = &service.container_name {
                env.set_container_name(&id, container_name);
            }
        }

        env
    }

    /// Environment with the real backends.
    pub fn build_environment(&self) -> Environment {
        self.declare_on(Environment::new(self.runtime.clone()))
    }
}

pub fn load_declaration(path: &Path) -> Result<Declaration> {
    if !path.exists() {
        bail!("declaration not found at {:?}", path);
    }

    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let declaration =
        Declaration::parse(&content).with_context(|| format!("loading {:?}", path))?;
    info!(
        "loaded {} service(s) and {} network(s) from {:?}",
        declaration.services.len(),
        declaration.networks.len(),
        path
    );
    Ok(declaration)
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        bail!("empty {kind} name");
    };
    if !first.is_ascii_alphanumeric() {
        bail!("{kind} name '{name}' must start with a letter or digit");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '.' | '-'))
    {
        bail!("{kind} name '{name}' contains invalid character '{c}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCommander, FakeFilesystem};
    use std::sync::Arc;

    const SAMPLE: &str = r#"
[runtime]
compose_program = "podman-compose"

[[networks]]
name = "front"
driver = "bridge"

[[networks]]
name = "back"

[[services]]
name = "web"
image = "nginx"
command = ["nginx", "-g", "daemon off;"]
networks = [{ name = "front", aliases = ["www"] }, { name = "back" }]

[[services]]
name = "db"
image = "postgres"
privileged = true
container_name = "db-main"
networks = [{ name = "back" }]
"#;

    #[test]
    fn test_parse_sample() {
        let declaration = Declaration::parse(SAMPLE).unwrap();

        assert_eq!(declaration.runtime.compose_program, "podman-compose");
        assert_eq!(declaration.runtime.version, "2.1");
        assert_eq!(declaration.networks.len(), 2);
        assert_eq!(declaration.services[0].networks[0].aliases, vec!["www"]);
        assert!(declaration.services[1].privileged);
    }

    #[test]
    fn test_declare_on_environment() {
        let declaration = Declaration::parse(SAMPLE).unwrap();
        let env = declaration.declare_on(Environment::with_backends(
            declaration.runtime.clone(),
            Arc::new(FakeCommander::new()),
            Arc::new(FakeFilesystem::new()),
        ));

        let services: Vec<_> = env.services().map(|s| s.name().to_string()).collect();
        assert_eq!(services, vec!["web", "db"]);
        let networks: Vec<_> = env.networks().map(|n| n.name().to_string()).collect();
        assert_eq!(networks, vec!["front", "back"]);

        let db = env.service_by_name("db").unwrap();
        assert_eq!(db.container_name(), "db-main");
        assert_eq!(db.networks()[0].network.name(), "back");
        assert_eq!(
            env.network_by_name("front").unwrap().config().driver.as_deref(),
            Some("bridge")
        );
    }

    #[test]
    fn test_rejects_undeclared_network() {
        let err = Declaration::parse(
            r#"
[[services]]
name = "web"
image = "nginx"
networks = [{ name = "missing" }]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("undeclared network 'missing'"));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = Declaration::parse(
            r#"
[[services]]
name = "web"
image = "nginx"

[[services]]
name = "web"
image = "httpd"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(validate_name("service", "").is_err());
        assert!(validate_name("service", "-web").is_err());
        assert!(validate_name("service", "web app").is_err());
        assert!(validate_name("service", "web_1.internal-a").is_ok());
    }

    #[test]
    fn test_rejects_missing_image() {
        let err = Declaration::parse(
            r#"
[[services]]
name = "web"
image = "  "
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("has no image"));
    }

    #[test]
    fn test_rejects_unknown_runtime_key() {
        let err = Declaration::parse(
            r#"
[runtime]
compose_progam = "podman-compose"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("unknown field `compose_progam`"));
    }

    #[test]
    fn test_load_declaration_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("env.toml");
        fs::write(&path, SAMPLE)?;

        let declaration = load_declaration(&path)?;
        assert_eq!(declaration.services.len(), 2);

        assert!(load_declaration(&dir.path().join("missing.toml")).is_err());
        Ok(())
    }
}
