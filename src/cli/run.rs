use super::{DeclarationArg, with_running};
use crate::domain::ComposeError;
use anyhow::{Result, anyhow};
use clap::Args;
use std::io::{self, Write};

#[derive(Args)]
pub struct RunCommand {
    #[command(flatten)]
    pub declaration: DeclarationArg,

    /// Service to run the command in
    pub service: String,

    /// Run with extended privileges
    #[arg(long)]
    pub privileged: bool,

    /// Program and arguments, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub fn run(cmd: RunCommand) -> Result<()> {
    let mut env = cmd.declaration.load()?.build_environment();
    if env.service_by_name(&cmd.service).is_none() {
        return Err(anyhow!("service '{}' is not declared", cmd.service));
    }

    let Some((program, args)) = cmd.command.split_first() else {
        return Err(anyhow!("no command given"));
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    with_running(&mut env, |env| {
        let service = env
            .service_by_name(&cmd.service)
            .ok_or_else(|| anyhow!("service '{}' is not declared", cmd.service))?;
        let exec = if cmd.privileged {
            service.sudo_exec(program, &args)
        } else {
            service.exec(program, &args)
        };

        match env.capture_output(exec, &format!("run {program} in {}", cmd.service)) {
            Ok(output) => {
                io::stdout().write_all(&output.stdout)?;
                eprint!("{}", output.stderr);
                Ok(())
            }
            Err(e) => {
                if let Some(ComposeError::ProcessFailed { stderr, .. }) =
                    e.downcast_ref::<ComposeError>()
                {
                    eprint!("{stderr}");
                }
                Err(e)
            }
        }
    })
}
