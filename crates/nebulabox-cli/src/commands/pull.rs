//! `nebulabox pull`: Pull an image without running it.

use clap::Args;

use super::Context;

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference, e.g. `nginx:latest`.
    pub image: String,
}

/// Executes the `pull` command.
///
/// # Errors
///
/// Returns an error if the reference is blank or the runtime cannot fetch it.
pub async fn execute(args: PullArgs, ctx: &Context) -> anyhow::Result<()> {
    if args.image.trim().is_empty() {
        anyhow::bail!("an image reference is required");
    }
    ctx.manager.pull(&args.image, &ctx.cancel).await?;
    println!("{}", args.image);
    Ok(())
}
