//! `nebulabox rm`: Remove stopped or failed containers.

use clap::Args;

use super::Context;
use crate::output::{RED, RESET};

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container IDs or names.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if any container could not be removed.
pub async fn execute(args: RmArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut failed = 0usize;
    for target in &args.containers {
        match ctx.manager.remove(target, &ctx.cancel).await {
            Ok(container) => println!("{}", container.name),
            Err(e) => {
                failed += 1;
                eprintln!("  {RED}Error:{RESET} {e}");
            }
        }
    }
    let _ = ctx.manager.prune();
    if failed > 0 {
        anyhow::bail!("failed to remove {failed} of {} container(s)", args.containers.len());
    }
    Ok(())
}
