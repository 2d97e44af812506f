//! CLI command definitions and dispatch.

pub mod inspect;
pub mod logs;
pub mod prune;
pub mod ps;
pub mod pull;
pub mod rm;
pub mod run;
pub mod start;
pub mod stop;
pub mod version;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use nebulabox_common::config::NebulaboxConfig;
use nebulabox_common::constants::BIN_NAME;
use nebulabox_runtime::backend;
use nebulabox_runtime::manager::LifecycleManager;
use tokio_util::sync::CancellationToken;

/// NebulaBox: container lifecycle manager.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ~/.nebulabox.yaml when present).
    #[arg(long, global = true, env = "NEBULABOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Override the data directory.
    #[arg(long, global = true, env = "NEBULABOX_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Diagnostic log format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Format of diagnostic output on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull an image and run a new container.
    Run(run::RunArgs),
    /// List containers.
    #[command(alias = "list")]
    Ps(ps::PsArgs),
    /// Stop one or more running containers.
    Stop(stop::StopArgs),
    /// Start a created or stopped container.
    Start(start::StartArgs),
    /// Remove stopped or failed containers.
    Rm(rm::RmArgs),
    /// Fetch the logs of a container.
    Logs(logs::LogsArgs),
    /// Pull an image without running it.
    Pull(pull::PullArgs),
    /// Show the full record of a container.
    Inspect(inspect::InspectArgs),
    /// Forget removed containers.
    Prune(prune::PruneArgs),
    /// Print version information.
    Version(version::VersionArgs),
}

/// Everything a command needs from the process: the manager and the
/// Ctrl+C cancellation token.
pub struct Context {
    /// Lifecycle manager over the local runtime backend.
    pub manager: LifecycleManager,
    /// Fires on Ctrl+C.
    pub cancel: CancellationToken,
    /// Effective configuration.
    pub config: NebulaboxConfig,
}

impl Context {
    /// Loads the configuration, opens the backend, and adopts the
    /// containers it already holds.
    async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = NebulaboxConfig::load_or_default(cli.config.as_deref())?;
        if let Some(dir) = &cli.data_dir {
            config.data_dir.clone_from(dir);
        }
        tracing::debug!(
            data_dir = %config.data_dir.display(),
            state_file = %config.state_file_path().display(),
            "configuration loaded"
        );

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        ctrlc::set_handler(move || on_interrupt.cancel())
            .context("failed to set Ctrl+C handler")?;

        let manager = LifecycleManager::new(backend::open_backend(&config), &config);
        let adopted = manager.reconcile(&cancel).await?;
        tracing::debug!(adopted, "known containers loaded");

        Ok(Self {
            manager,
            cancel,
            config,
        })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    if let Command::Version(args) = &cli.command {
        return version::execute(args);
    }

    let ctx = Context::open(&cli).await?;
    match cli.command {
        Command::Run(args) => run::execute(args, &ctx).await,
        Command::Ps(args) => ps::execute(&args, &ctx),
        Command::Stop(args) => stop::execute(args, &ctx).await,
        Command::Start(args) => start::execute(args, &ctx).await,
        Command::Rm(args) => rm::execute(args, &ctx).await,
        Command::Logs(args) => logs::execute(args, &ctx).await,
        Command::Pull(args) => pull::execute(args, &ctx).await,
        Command::Inspect(args) => inspect::execute(&args, &ctx),
        Command::Prune(args) => prune::execute(&args, &ctx),
        Command::Version(args) => version::execute(&args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn binary_name_matches_constant() {
        assert_eq!(Cli::command().get_name(), BIN_NAME);
    }

    #[test]
    fn list_is_an_alias_of_ps() {
        let cli = Cli::try_parse_from(["nebulabox", "list", "-a"]).unwrap();
        assert!(matches!(cli.command, Command::Ps(ps::PsArgs { all: true, .. })));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "nebulabox",
            "ps",
            "--verbose",
            "--log-format",
            "json",
            "--data-dir",
            "/tmp/nb",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/nb")));
    }
}
