mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// cloudshell-relay -- drive a remote cloud shell from the local terminal.
#[derive(Parser)]
#[command(name = "cs", version, about)]
struct Cli {
    /// Config file to use instead of ~/.cloudshell-relay/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in, open a terminal and relay stdin lines as commands (default).
    Connect {
        /// Terminal width in columns.
        #[arg(long)]
        cols: Option<u16>,
        /// Terminal height in rows.
        #[arg(long)]
        rows: Option<u16>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    if cli.json_logs || config.general.json_logs {
        cs_telemetry::logging::init_logging_json("cs", &config.general.log_level);
    } else {
        cs_telemetry::logging::init_logging("cs", &config.general.log_level);
    }

    match cli.command {
        None => commands::connect::run(config, None, None).await?,
        Some(Commands::Connect { cols, rows }) => {
            commands::connect::run(config, cols, rows).await?;
        }
        Some(Commands::Config) => commands::config::run(&config)?,
    }

    Ok(())
}
