//! `nebulabox version`: Print version information.

use clap::Args;
use nebulabox_common::constants::{APP_NAME, default_config_file, default_data_dir};

/// Arguments for the `version` command.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Also print the default data and config locations.
    #[arg(long)]
    pub paths: bool,
}

/// Executes the `version` command.
///
/// # Errors
///
/// Never fails; the signature matches the other commands.
pub fn execute(args: &VersionArgs) -> anyhow::Result<()> {
    println!("{APP_NAME} {}", env!("CARGO_PKG_VERSION"));
    if args.paths {
        println!("data dir: {}", default_data_dir().display());
        if let Some(config) = default_config_file() {
            println!("config:   {}", config.display());
        }
    }
    Ok(())
}
