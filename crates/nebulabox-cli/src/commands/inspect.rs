//! `nebulabox inspect`: Show the full record of a container.

use clap::Args;

use super::Context;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Container ID, unique ID prefix, or name.
    pub container: String,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the container is unknown.
pub fn execute(args: &InspectArgs, ctx: &Context) -> anyhow::Result<()> {
    let container = ctx.manager.inspect(&args.container)?;
    println!("{}", serde_json::to_string_pretty(&container)?);
    Ok(())
}
