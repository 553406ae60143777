use super::{DeclarationArg, with_running};
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct InspectCommand {
    #[command(flatten)]
    pub declaration: DeclarationArg,
}

pub fn run(cmd: InspectCommand) -> Result<()> {
    let mut env = cmd.declaration.load()?.build_environment();

    with_running(&mut env, |env| {
        for service in env.services() {
            for attachment in service.networks() {
                let ip = service.ip_address_for_network(&attachment.network)?;
                println!("{}\t{}\t{}", service.name(), attachment.network.name(), ip);
            }
        }
        for network in env.networks() {
            println!("{}\t{}", network.name(), network.cidr()?.trim_end());
        }
        Ok(())
    })
}
