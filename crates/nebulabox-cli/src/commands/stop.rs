//! `nebulabox stop`: Stop one or more running containers.

use clap::Args;

use super::Context;
use crate::output::{RED, RESET};

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs or names.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Executes the `stop` command.
///
/// Every target is attempted; failures are reported and do not stop the
/// remaining ones.
///
/// # Errors
///
/// Returns an error if any container could not be stopped.
pub async fn execute(args: StopArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut failed = 0usize;
    for target in &args.containers {
        match ctx.manager.stop(target, &ctx.cancel).await {
            Ok(container) => println!("{}", container.name),
            Err(e) => {
                failed += 1;
                tracing::warn!(target = %target, error = %e, "stop failed");
                eprintln!("  {RED}Error:{RESET} {e}");
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("failed to stop {failed} of {} container(s)", args.containers.len());
    }
    Ok(())
}
