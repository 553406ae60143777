use super::DeclarationArg;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct RenderCommand {
    #[command(flatten)]
    pub declaration: DeclarationArg,
}

pub fn run(cmd: RenderCommand) -> Result<()> {
    let env = cmd.declaration.load()?.build_environment();
    print!("{}", env.compose_file()?);
    Ok(())
}
