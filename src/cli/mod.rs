pub mod build;
pub mod inspect;
pub mod render;
pub mod run;

use crate::infra::{Declaration, load_declaration};
use crate::services::Environment;
use anyhow::Result;
use build::BuildCommand;
use clap::{Args, Parser, Subcommand};
use inspect::InspectCommand;
use render::RenderCommand;
use run::RunCommand;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "composebox",
    version,
    about = "Throwaway docker-compose environments declared in TOML"
)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG, defaults to info)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Prints the docker-compose document a declaration produces
    Render(RenderCommand),
    /// Starts the environment, runs one command in a service and tears down
    Run(RunCommand),
    /// Starts the environment, prints addresses and subnets and tears down
    Inspect(InspectCommand),
    /// Builds an image from a directory or a Dockerfile
    Build(BuildCommand),
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Render(cmd) => render::run(cmd),
        Commands::Run(cmd) => run::run(cmd),
        Commands::Inspect(cmd) => inspect::run(cmd),
        Commands::Build(cmd) => build::run(cmd),
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeclarationArg {
    /// Environment declaration file
    #[arg(env = "COMPOSEBOX_FILE")]
    pub file: String,
}

impl DeclarationArg {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.file).as_ref())
    }

    pub fn load(&self) -> Result<Declaration> {
        load_declaration(&self.path())
    }
}

/// Starts `env`, runs `work`, then stops and clears it whatever happened.
///
/// The first error wins; teardown failures after an earlier error are logged.
pub(crate) fn with_running<T>(
    env: &mut Environment,
    work: impl FnOnce(&Environment) -> Result<T>,
) -> Result<T> {
    let result = env.start().and_then(|()| work(env));
    let teardown = env.stop().and_then(|()| env.clear());

    match (result, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(teardown)) => {
            warn!("teardown failed: {teardown:#}");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}
