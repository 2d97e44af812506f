//! `nebulabox logs`: Fetch the logs of a container.

use std::str::FromStr;

use clap::Args;

use super::Context;
use crate::output::tail;

/// How many trailing lines to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// Every line.
    All,
    /// The last `n` lines.
    Last(usize),
}

impl Tail {
    const fn limit(self) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Last(n) => Some(n),
        }
    }
}

impl FromStr for Tail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse()
            .map(Self::Last)
            .map_err(|_| format!("expected a line count or \"all\", got {s:?}"))
    }
}

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID or name.
    pub container: String,

    /// Follow log output until the container stops or Ctrl+C.
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines to show from the end, or `all`.
    #[arg(long, default_value = "all")]
    pub tail: Tail,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or logs are unavailable.
pub async fn execute(args: LogsArgs, ctx: &Context) -> anyhow::Result<()> {
    let limit = args.tail.limit();
    if !args.follow {
        for line in tail(ctx.manager.logs(&args.container, &ctx.cancel).await?, limit) {
            println!("{line}");
        }
        return Ok(());
    }

    // A followed stream replays existing lines first; skip the ones the
    // tail limit hides.
    let mut skip = match limit {
        Some(n) => {
            let existing = ctx.manager.logs(&args.container, &ctx.cancel).await?.len();
            existing.saturating_sub(n)
        }
        None => 0,
    };
    let mut stream = ctx
        .manager
        .follow_logs(&args.container, ctx.cancel.clone())
        .await?;
    while let Some(line) = stream.next().await {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        println!("{line}");
    }
    Ok(())
}
