use crate::domain::ComposeConfig;
use crate::domain::topology::DEFAULT_CONTAINER_PROGRAM;
use crate::services::Environment;
use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args};
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
#[command(group(ArgGroup::new("context").required(true).args(["path", "script"])))]
pub struct BuildCommand {
    /// Name used in log output
    pub name: String,

    /// Build context directory
    pub path: Option<String>,

    /// Dockerfile to build in a throwaway context
    #[arg(long)]
    pub script: Option<String>,

    /// Container runtime CLI
    #[arg(long, default_value = DEFAULT_CONTAINER_PROGRAM)]
    pub container_program: String,
}

pub fn run(cmd: BuildCommand) -> Result<()> {
    let env = Environment::new(ComposeConfig {
        container_program: cmd.container_program.clone(),
        ..Default::default()
    });

    let id = match (&cmd.path, &cmd.script) {
        (_, Some(script)) => {
            let script_path = expand(script);
            let script = fs::read_to_string(&script_path)
                .with_context(|| format!("reading {:?}", script_path))?;
            env.build_image_from_script(&cmd.name, &script)?
        }
        (Some(path), None) => env.build_image(&cmd.name, &expand(path))?,
        (None, None) => bail!("either a build context path or --script is required"),
    };

    println!("{id}");
    Ok(())
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
