mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::inspect::InspectArgs;
use commands::run::RunArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "statehold", version, about = "Durable session state service")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Boot the service and serve HTTP until stopped or crashed
    Run(RunArgs),

    /// Print a read-only report of the storage root
    Inspect(InspectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    match cli.command {
        Command::Run(args) => commands::run::cmd_run(opts, &args).await,
        Command::Inspect(args) => commands::inspect::cmd_inspect(opts, &args),
    }
}
