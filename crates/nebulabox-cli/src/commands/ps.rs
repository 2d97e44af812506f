//! `nebulabox ps`: List containers.

use chrono::Utc;
use clap::Args;

use super::Context;
use crate::output::{format_age, format_ports, render_table};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped and failed).
    #[arg(short, long)]
    pub all: bool,

    /// Print the records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn execute(args: &PsArgs, ctx: &Context) -> anyhow::Result<()> {
    let containers = ctx.manager.list(args.all);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }
    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    let now = Utc::now();
    let rows: Vec<Vec<String>> = containers
        .iter()
        .map(|c| {
            vec![
                c.id.short().to_string(),
                c.name.clone(),
                c.image.clone(),
                c.state.to_string(),
                format_age(c.created_at, now),
                format_ports(&c.options.ports),
            ]
        })
        .collect();
    print!(
        "{}",
        render_table(&["CONTAINER ID", "NAME", "IMAGE", "STATE", "CREATED", "PORTS"], &rows)
    );
    Ok(())
}
