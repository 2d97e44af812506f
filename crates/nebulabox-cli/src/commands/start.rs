//! `nebulabox start`: Start a created or stopped container.

use clap::Args;

use super::Context;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, not startable, or the
/// runtime fails to start it.
pub async fn execute(args: StartArgs, ctx: &Context) -> anyhow::Result<()> {
    let container = ctx.manager.start(&args.container, &ctx.cancel).await?;
    println!("{}", container.name);
    Ok(())
}
