//! Runs against a local Docker daemon and docker-compose.
//! `cargo test -- --ignored` to include them.

use anyhow::Result;
use composebox::{
    ComposeConfig, Environment, EnvironmentState, NetworkConfig, ServiceConfig,
    ServiceNetworkConfig,
};

#[test]
#[ignore]
fn test_environment_round_trip() -> Result<()> {
    let mut env = Environment::new(ComposeConfig::default());
    let front = env.add_network("front", NetworkConfig::default());
    let web = env.add_service(
        "web",
        ServiceConfig::new("busybox").with_command(["sleep", "300"]),
        vec![ServiceNetworkConfig::new(&front).with_aliases(["www"])],
    );

    env.start()?;
    let result = (|| -> Result<()> {
        let ip = env.service(&web).ip_address_for_network(&front)?;
        assert!(ip.parse::<std::net::Ipv4Addr>().is_ok(), "got {ip}");

        let cidr = env.network(&front).cidr()?;
        assert!(cidr.trim().contains('/'), "got {cidr}");

        let output = env.capture_output(env.service(&web).exec("echo", &["hi"]), "echo")?;
        assert_eq!(output.stdout, b"hi\n");
        Ok(())
    })();

    env.stop()?;
    env.clear()?;
    assert_eq!(env.state(), EnvironmentState::Stopped);
    result
}

#[test]
#[ignore]
fn test_build_image_from_script() -> Result<()> {
    let env = Environment::new(ComposeConfig::default());
    let id = env.build_image_from_script("scratch-test", "FROM busybox\nRUN true\n")?;
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    Ok(())
}
