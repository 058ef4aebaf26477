use anyhow::Context;
use cs_core::config::Config;

/// Run the `config` subcommand.
pub fn run(config: &Config) -> anyhow::Result<()> {
    let text = config.to_toml().context("failed to render config")?;
    print!("{text}");
    Ok(())
}
