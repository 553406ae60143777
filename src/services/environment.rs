use super::compose_file;
use super::network::{Network, NetworkRef};
use super::service::{Service, ServiceRef};
use crate::domain::{
    Command, Commander, ComposeConfig, ComposeError, EnvironmentState, Filesystem, NetworkConfig,
    NetworkId, ServiceConfig, ServiceId, ServiceNetworkConfig, argv,
};
use crate::infra::{LocalFilesystem, ProcessCommander};
use anyhow::{Context, Result, bail};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
pub(crate) const WORKING_DIR_MODE: u32 = 0o744;

/// Output of a command run through [`Environment::capture_output`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// A declared set of services and networks and its lifecycle.
///
/// Topology is declared in [`EnvironmentState::Setup`]; [`start`](Self::start)
/// materializes it and brings it up, [`stop`](Self::stop) tears it down.
/// Declaring after start, or declaring a name twice, panics.
pub struct Environment {
    id: Uuid,
    config: ComposeConfig,
    working_dir: OnceLock<PathBuf>,
    services: Vec<Service>,
    networks: Vec<Network>,
    state: EnvironmentState,
    pub(crate) commander: Arc<dyn Commander>,
    pub(crate) fs: Arc<dyn Filesystem>,
}

impl Environment {
    /// Environment driving the real CLIs on the local filesystem.
    pub fn new(config: ComposeConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(ProcessCommander::new()),
            Arc::new(LocalFilesystem::new()),
        )
    }

    pub fn with_backends(
        config: ComposeConfig,
        commander: Arc<dyn Commander>,
        fs: Arc<dyn Filesystem>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            working_dir: OnceLock::new(),
            services: Vec::new(),
            networks: Vec::new(),
            state: EnvironmentState::Setup,
            commander,
            fs,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Project name the orchestration CLI derives from the working directory.
    pub fn project_name(&self) -> String {
        self.id.simple().to_string()
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    /// `<temp>/<workspace>/<id>`, computed on first use.
    pub fn working_dir(&self) -> &Path {
        self.working_dir.get_or_init(|| {
            self.fs
                .temp_dir()
                .join(&self.config.workspace)
                .join(self.id.to_string())
        })
    }

    pub fn add_network(&mut self, name: &str, config: NetworkConfig) -> NetworkId {
        if self.state != EnvironmentState::Setup {
            panic!("cannot register a network after started");
        }
        if self.find_network(name).is_some() {
            panic!("registering the same network twice: {name}");
        }
        self.networks.push(Network {
            name: name.to_string(),
            config,
        });
        NetworkId(name.to_string())
    }

    pub fn add_service(
        &mut self,
        name: &str,
        config: ServiceConfig,
        networks: Vec<ServiceNetworkConfig>,
    ) -> ServiceId {
        if self.state != EnvironmentState::Setup {
            panic!("cannot register a service after started");
        }
        if self.find_service(name).is_some() {
            panic!("registering the same service twice: {name}");
        }
        self.check_attachments(name, &networks);
        self.services.push(Service {
            name: name.to_string(),
            container_name: name.to_string(),
            config,
            networks,
        });
        ServiceId(name.to_string())
    }

    /// Replaces the networks a service is attached to.
    pub fn set_service_networks(
        &mut self,
        service: &ServiceId,
        networks: Vec<ServiceNetworkConfig>,
    ) {
        self.check_attachments(service.name(), &networks);
        self.service_mut(service, "change service networks").networks = networks;
    }

    pub fn set_container_name(&mut self, service: &ServiceId, container_name: &str) {
        self.service_mut(service, "rename a container").container_name =
            container_name.to_string();
    }

    /// Resolves a handle from this environment. Panics on a foreign handle.
    pub fn service(&self, id: &ServiceId) -> ServiceRef<'_> {
        match self.find_service(id.name()) {
            Some(service) => ServiceRef { env: self, service },
            None => panic!("service {} is not declared in this environment", id.name()),
        }
    }

    pub fn service_by_name(&self, name: &str) -> Option<ServiceRef<'_>> {
        self.find_service(name)
            .map(|service| ServiceRef { env: self, service })
    }

    /// Declared services, in declaration order.
    pub fn services(&self) -> impl Iterator<Item = ServiceRef<'_>> {
        self.services
            .iter()
            .map(move |service| ServiceRef { env: self, service })
    }

    /// Resolves a handle from this environment. Panics on a foreign handle.
    pub fn network(&self, id: &NetworkId) -> NetworkRef<'_> {
        match self.find_network(id.name()) {
            Some(network) => NetworkRef { env: self, network },
            None => panic!("network {} is not declared in this environment", id.name()),
        }
    }

    pub fn network_by_name(&self, name: &str) -> Option<NetworkRef<'_>> {
        self.find_network(name)
            .map(|network| NetworkRef { env: self, network })
    }

    /// Declared networks, in declaration order.
    pub fn networks(&self) -> impl Iterator<Item = NetworkRef<'_>> {
        self.networks
            .iter()
            .map(move |network| NetworkRef { env: self, network })
    }

    /// The docker-compose document [`start`](Self::start) writes.
    pub fn compose_file(&self) -> Result<String> {
        compose_file::render(&self.config.version, &self.services, &self.networks)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != EnvironmentState::Setup {
            bail!(ComposeError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        self.state = EnvironmentState::Running;

        let dir = self.working_dir().to_path_buf();
        self.fs
            .create_dir_all(&dir, WORKING_DIR_MODE)
            .with_context(|| format!("creating working directory {:?}", dir))?;

        let document = self.compose_file()?;
        let path = dir.join(COMPOSE_FILE_NAME);
        let mut file = self
            .fs
            .create(&path)
            .with_context(|| format!("creating {:?}", path))?;
        file.write_all(document.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("writing {:?}", path))?;
        drop(file);

        info!("starting docker compose");
        self.capture(
            self.compose_command(argv(&["up", "-d"])),
            "start docker compose",
        )
        .context("failed to start docker-compose")?;
        info!("finished starting docker compose");

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if self.state != EnvironmentState::Running {
            bail!(ComposeError::InvalidState {
                action: "stop",
                state: self.state,
            });
        }
        self.state = EnvironmentState::Stopped;

        info!("stopping docker compose");
        self.capture(self.compose_command(argv(&["down"])), "stop docker compose")
            .context("failed to stop docker-compose")?;
        info!("finished stopping docker compose");

        Ok(())
    }

    /// Removes the generated working directory, if one was ever computed.
    pub fn clear(&self) -> Result<()> {
        if self.state == EnvironmentState::Running {
            bail!(ComposeError::InvalidState {
                action: "clear",
                state: self.state,
            });
        }

        let Some(dir) = self.working_dir.get() else {
            return Ok(());
        };

        info!("clearing docker compose");
        self.fs
            .remove_all(dir)
            .with_context(|| format!("removing {:?}", dir))?;
        info!("finished clearing docker compose");
        Ok(())
    }

    /// Logs of the given services, or of every service when empty.
    pub fn logs(&self, services: &[&str]) -> Result<String> {
        let mut args = argv(&["logs", "--no-color"]);
        args.extend(services.iter().map(|s| (*s).to_string()));

        let logs = self
            .capture(self.compose_command(args), "docker compose logs")
            .context("failed to run docker-compose logs")?;
        Ok(String::from_utf8_lossy(&logs).into_owned())
    }

    pub(crate) fn require_running(&self, action: &'static str) -> Result<()> {
        if self.state != EnvironmentState::Running {
            bail!(ComposeError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Orchestration CLI invocation bound to the working directory.
    pub(crate) fn compose_command(&self, args: Vec<String>) -> Box<dyn Command> {
        let mut cmd = self.commander.command(&self.config.compose_program, args);
        cmd.set_dir(self.working_dir());
        cmd
    }

    /// Container runtime CLI invocation.
    pub(crate) fn container_command(&self, args: Vec<String>) -> Box<dyn Command> {
        self.commander.command(&self.config.container_program, args)
    }

    pub(crate) fn capture(&self, cmd: Box<dyn Command>, context: &str) -> Result<Vec<u8>> {
        self.capture_output(cmd, context).map(|output| output.stdout)
    }

    /// Runs an unstarted `cmd` to completion and returns what it printed.
    ///
    /// Stdout and stderr are drained concurrently so neither stream can fill
    /// up and stall the process. A failed run returns
    /// [`ComposeError::ProcessFailed`] carrying the stderr text.
    pub fn capture_output(
        &self,
        mut cmd: Box<dyn Command>,
        context: &str,
    ) -> Result<CapturedOutput> {
        let mut stdout = cmd
            .stdout_pipe()
            .with_context(|| format!("piping stdout of {context}"))?;
        let mut stderr = cmd
            .stderr_pipe()
            .with_context(|| format!("piping stderr of {context}"))?;

        debug!("running {} {:?}", cmd.path(), cmd.args());
        if let Err(source) = cmd.start() {
            error!("failed to start {context}: {source}");
            bail!(ComposeError::ProcessFailed {
                context: context.to_string(),
                source,
                stderr: String::new(),
            });
        }

        let (out, err) = thread::scope(|scope| {
            let stderr_reader = scope.spawn(move || read_all(&mut stderr));
            let out = read_all(&mut stdout);
            let err = stderr_reader
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked")));
            (out, err)
        });
        let outcome = cmd.wait();

        let stderr = match err {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("failed to read stderr {context}: {e}");
                String::new()
            }
        };

        if let Err(source) = outcome {
            error!("failed to {context}: {source}\n{stderr}");
            bail!(ComposeError::ProcessFailed {
                context: context.to_string(),
                source,
                stderr,
            });
        }

        let stdout = out.with_context(|| format!("failed to read stdout {context}"))?;
        Ok(CapturedOutput { stdout, stderr })
    }

    fn find_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.name == name)
    }

    fn find_network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|network| network.name == name)
    }

    fn service_mut(&mut self, id: &ServiceId, action: &str) -> &mut Service {
        if self.state != EnvironmentState::Setup {
            panic!("cannot {action} after started");
        }
        match self.services.iter_mut().find(|service| service.name == id.name()) {
            Some(service) => service,
            None => panic!("service {} is not declared in this environment", id.name()),
        }
    }

    fn check_attachments(&self, service: &str, networks: &[ServiceNetworkConfig]) {
        for attachment in networks {
            if self.find_network(attachment.network.name()).is_none() {
                panic!(
                    "service {service} attached to undeclared network {}",
                    attachment.network.name()
                );
            }
        }
    }
}

fn read_all(stream: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}
