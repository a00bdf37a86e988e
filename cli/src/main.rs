mod commands;
mod terminal;

use commands::{CommandLine, Commands, config, create, env};
use rackctl_common::config::Config;
use terminal::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    logging::init_logging(commands.verbose);

    let mut cfg = Config::default();
    if let Some(path) = commands.storage_path {
        cfg.storage_path = path;
    }

    match commands.command {
        Commands::Create(args) => create::create(args, cfg).await,
        Commands::Config(args) => config::config(args, &cfg).await,
        Commands::Env(args) => env::env(args, &cfg),
    }
}
