//! `nebulabox prune`: Forget removed containers.

use clap::Args;

use super::Context;

/// Arguments for the `prune` command.
#[derive(Args, Debug)]
pub struct PruneArgs {}

/// Executes the `prune` command.
///
/// # Errors
///
/// Never fails today; the signature matches the other commands.
pub fn execute(_args: &PruneArgs, ctx: &Context) -> anyhow::Result<()> {
    let pruned = ctx.manager.prune();
    println!("Pruned {pruned} container(s).");
    Ok(())
}
