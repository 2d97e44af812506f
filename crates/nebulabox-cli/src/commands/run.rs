//! `nebulabox run`: Pull an image and run a new container.

use clap::Args;
use nebulabox_common::types::{ContainerOptions, EnvVar, PortMapping, VolumeMount};
use nebulabox_runtime::container::Container;
use tokio_util::sync::CancellationToken;

use super::Context;
use crate::output::{BOLD, DIM, GREEN, RESET, format_ports};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image reference, e.g. `nginx:latest`.
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,

    /// Container name (defaults to `<image>-<short id>`).
    #[arg(long)]
    pub name: Option<String>,

    /// Publish a port, `HOST:CONTAINER` or `PORT`.
    #[arg(short, long = "port")]
    pub ports: Vec<PortMapping>,

    /// Set an environment variable, `KEY=VALUE`.
    #[arg(short, long = "env")]
    pub env: Vec<EnvVar>,

    /// Bind mount, `HOST:CONTAINER`.
    #[arg(short, long = "volume")]
    pub volumes: Vec<VolumeMount>,

    /// Return once the container is running instead of following its logs.
    #[arg(short, long)]
    pub detach: bool,
}

impl RunArgs {
    fn options(&self) -> ContainerOptions {
        ContainerOptions {
            name: self.name.clone(),
            ports: self.ports.clone(),
            env: self.env.clone(),
            volumes: self.volumes.clone(),
            detach: self.detach,
        }
    }
}

/// Executes the `run` command.
///
/// Without `--detach`, streams the container's logs until Ctrl+C and then
/// stops it.
///
/// # Errors
///
/// Returns an error if the image is blank or any lifecycle step fails.
pub async fn execute(args: RunArgs, ctx: &Context) -> anyhow::Result<()> {
    if args.image.trim().is_empty() {
        anyhow::bail!("an image reference is required");
    }
    let options = args.options();
    let container = ctx
        .manager
        .run(&args.image, args.command, options, &ctx.cancel)
        .await?;
    report(&container, ctx);

    if args.detach {
        println!("{}", container.id);
        return Ok(());
    }
    follow_until_interrupted(&container, ctx).await
}

fn report(container: &Container, ctx: &Context) {
    eprintln!(
        "  {GREEN}●{RESET} {BOLD}{}{RESET} {DIM}[{}]{RESET} running {}",
        container.name,
        container.id.short(),
        container.image
    );
    if !container.options.ports.is_empty() {
        eprintln!("    ports: {}", format_ports(&container.options.ports));
    }
    eprintln!("  {DIM}state file: {}{RESET}", ctx.config.state_file_path().display());
}

async fn follow_until_interrupted(container: &Container, ctx: &Context) -> anyhow::Result<()> {
    eprintln!("  Press {BOLD}Ctrl+C{RESET} to stop the container...");
    eprintln!();

    let id = container.id.as_str();
    let mut stream = ctx.manager.follow_logs(id, ctx.cancel.clone()).await?;
    while let Some(line) = stream.next().await {
        println!("{line}");
    }

    if !ctx.cancel.is_cancelled() {
        // The container ended on its own.
        return Ok(());
    }
    eprintln!();
    eprintln!("  Stopping {}...", container.name);
    let stopped = ctx.manager.stop(id, &CancellationToken::new()).await?;
    eprintln!("  {GREEN}Stopped {}.{RESET}", stopped.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::super::{Cli, Command};

    #[test]
    fn parses_options_and_trailing_command() {
        let cli = Cli::try_parse_from([
            "nebulabox", "run", "--name", "web", "-p", "8080:80", "-e", "MODE=prod", "-v",
            "/srv:/data", "-d", "nginx:latest", "nginx", "-g", "daemon off;",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.image, "nginx:latest");
        assert_eq!(args.command, vec!["nginx", "-g", "daemon off;"]);
        let options = args.options();
        assert_eq!(options.name.as_deref(), Some("web"));
        assert_eq!(options.ports[0].host, 8080);
        assert_eq!(options.env[0].key, "MODE");
        assert_eq!(options.volumes.len(), 1);
        assert!(options.detach);
    }

    #[test]
    fn malformed_port_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["nebulabox", "run", "-p", "http", "nginx"]).is_err());
    }
}
