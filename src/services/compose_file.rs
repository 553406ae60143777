use super::network::Network;
use super::service::Service;
use anyhow::{Context, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Serialize)]
struct ComposeDocument<'a> {
    version: &'a str,
    services: Ordered<'a, ServiceEntry<'a>>,
    networks: Ordered<'a, NetworkEntry<'a>>,
}

#[derive(Serialize)]
struct ServiceEntry<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "no_items")]
    command: &'a [String],
    #[serde(skip_serializing_if = "is_false")]
    privileged: bool,
    container_name: &'a str,
    #[serde(skip_serializing_if = "Ordered::is_empty")]
    networks: Ordered<'a, AttachmentEntry<'a>>,
}

#[derive(Serialize)]
struct AttachmentEntry<'a> {
    #[serde(skip_serializing_if = "no_items")]
    aliases: &'a [String],
}

#[derive(Serialize)]
struct NetworkEntry<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    driver: Option<&'a str>,
    #[serde(skip_serializing_if = "no_opts")]
    driver_opts: &'a BTreeMap<String, String>,
}

/// Map serialized in insertion order.
struct Ordered<'a, V>(Vec<(&'a str, V)>);

impl<V> Ordered<'_, V> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V: Serialize> Serialize for Ordered<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

fn no_items(items: &&[String]) -> bool {
    items.is_empty()
}

fn no_opts(opts: &&BTreeMap<String, String>) -> bool {
    opts.is_empty()
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Renders the compose document, services and networks in declaration order.
pub(crate) fn render(version: &str, services: &[Service], networks: &[Network]) -> Result<String> {
    let document = ComposeDocument {
        version,
        services: Ordered(
            services
                .iter()
                .map(|service| {
                    let entry = ServiceEntry {
                        image: &service.config.image,
                        command: &service.config.command,
                        privileged: service.config.privileged,
                        container_name: &service.container_name,
                        networks: Ordered(
                            service
                                .networks
                                .iter()
                                .map(|attachment| {
                                    (
                                        attachment.network.name(),
                                        AttachmentEntry {
                                            aliases: &attachment.aliases,
                                        },
                                    )
                                })
                                .collect(),
                        ),
                    };
                    (service.name.as_str(), entry)
                })
                .collect(),
        ),
        networks: Ordered(
            networks
                .iter()
                .map(|network| {
                    let entry = NetworkEntry {
                        driver: network.config.driver.as_deref(),
                        driver_opts: &network.config.driver_opts,
                    };
                    (network.name.as_str(), entry)
                })
                .collect(),
        ),
    };

    serde_yml::to_string(&document).context("serializing docker-compose document")
}
