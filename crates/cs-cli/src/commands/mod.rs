pub mod config;
pub mod connect;

use std::path::Path;

use anyhow::Context;
use cs_core::config::Config;

/// Load `path` if given, otherwise the default config location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}
