use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.cloudshell-relay/config.toml`.
///
/// Credentials are never part of the config: access and refresh tokens live
/// only in memory for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cloud_shell: CloudShellConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

impl Config {
    /// Load config from `~/.cloudshell-relay/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.terminal.validate()
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cloudshell-relay")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Identity provider settings for the device-code flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Resource (audience) the issued tokens are scoped to.
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Tenant segment used for the device-code request before any tenant is known.
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            client_id: default_client_id(),
            resource: default_resource(),
            default_tenant: default_tenant(),
        }
    }
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".into()
}
fn default_client_id() -> String {
    "04b07795-8ddb-461a-bbee-02f9e1bf7b46".into()
}
fn default_resource() -> String {
    "https://management.core.windows.net/".into()
}
fn default_tenant() -> String {
    "common".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudShellConfig {
    #[serde(default = "default_management_url")]
    pub management_url: String,
    #[serde(default = "default_os_type")]
    pub os_type: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_terminal_api_version")]
    pub terminal_api_version: String,
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for CloudShellConfig {
    fn default() -> Self {
        Self {
            management_url: default_management_url(),
            os_type: default_os_type(),
            user_agent: default_user_agent(),
            terminal_api_version: default_terminal_api_version(),
            shell: default_shell(),
        }
    }
}

fn default_management_url() -> String {
    "https://management.azure.com".into()
}
fn default_os_type() -> String {
    "linux".into()
}
fn default_user_agent() -> String {
    format!("cloudshell-relay/{}", env!("CARGO_PKG_VERSION"))
}
fn default_terminal_api_version() -> String {
    "2019-01-01".into()
}
fn default_shell() -> String {
    "bash".into()
}

/// Startup handshake and relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Launches the remote interpreter; its echo triggers the welcome banner.
    #[serde(default = "default_start_shell_command")]
    pub start_shell_command: String,
    /// Installs the prompt; its echo marks the session as initialized.
    #[serde(default = "default_set_prompt_command")]
    pub set_prompt_command: String,
    /// The prompt line the remote interpreter prints after each command.
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_motd_marker")]
    pub motd_marker: String,
    #[serde(default = "default_verbose_marker")]
    pub verbose_marker: String,
    #[serde(default = "default_welcome_banner")]
    pub welcome_banner: String,
    /// Pause between the start-shell and set-prompt commands so profile scripts can finish.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Maximum number of socket frames buffered between the ingest and line pumps.
    #[serde(default = "default_pipeline_capacity")]
    pub pipeline_capacity: usize,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            start_shell_command: default_start_shell_command(),
            set_prompt_command: default_set_prompt_command(),
            prompt: default_prompt(),
            motd_marker: default_motd_marker(),
            verbose_marker: default_verbose_marker(),
            welcome_banner: default_welcome_banner(),
            settle_delay_ms: default_settle_delay_ms(),
            startup_timeout_secs: default_startup_timeout_secs(),
            pipeline_capacity: default_pipeline_capacity(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

impl TerminalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("terminal.prompt", &self.prompt),
            ("terminal.start_shell_command", &self.start_shell_command),
            ("terminal.set_prompt_command", &self.set_prompt_command),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        if self.pipeline_capacity == 0 {
            return Err(ConfigError::Validation(
                "terminal.pipeline_capacity must be greater than zero".into(),
            ));
        }
        if self.startup_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "terminal.startup_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_start_shell_command() -> String {
    "pwsh -noninteractive -nologo -command -".into()
}
fn default_set_prompt_command() -> String {
    "function prompt { \"PS> `n\" }".into()
}
fn default_prompt() -> String {
    "PS> ".into()
}
fn default_motd_marker() -> String {
    "MOTD:".into()
}
fn default_verbose_marker() -> String {
    "VERBOSE:".into()
}
fn default_welcome_banner() -> String {
    "Welcome to Cloud Shell. Type `exit` to end the session.".into()
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_startup_timeout_secs() -> u64 {
    120
}
fn default_pipeline_capacity() -> usize {
    256
}
fn default_cols() -> u16 {
    120
}
fn default_rows() -> u16 {
    30
}
