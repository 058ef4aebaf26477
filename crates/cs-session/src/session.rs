use std::sync::Arc;
use std::time::Duration;

use cs_core::config::Config;
use cs_core::types::{Credential, DeviceCodeChallenge, TerminalEndpoint};
use cs_integrations::azure::cloud_shell::{CloudShellProvisioner, ProvisionError};
use cs_integrations::azure::oauth::{AuthError, TokenAuthenticator};
use thiserror::Error;
use tracing::{info, warn};

use crate::relay::{RelayError, TerminalRelay, END_OF_TRANSMISSION};
use crate::sink::OutputSink;

/// Printed to the sink after the end-of-input byte is sent.
pub const SESSION_ENDED_NOTICE: &str = "Cloud Shell session ended.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// The public session lifecycle: connect, execute, exit.
pub struct SessionController {
    config: Config,
    sink: Arc<dyn OutputSink>,
    credential: Option<Credential>,
    relay: Option<TerminalRelay>,
}

impl SessionController {
    pub fn new(config: Config, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            config,
            sink,
            credential: None,
            relay: None,
        }
    }

    /// Sign in, provision a shell, open a `cols` x `rows` terminal and run
    /// the startup handshake. The first failing stage's error is returned.
    pub async fn connect(&mut self, cols: u16, rows: u16) -> Result<()> {
        let auth = TokenAuthenticator::new(
            self.config.auth.clone(),
            &self.config.cloud_shell.user_agent,
        )?;
        let provisioner = CloudShellProvisioner::new(self.config.cloud_shell.clone())?;

        let sink = self.sink.clone();
        let initial = auth
            .authenticate(|challenge| sink.write_line(&sign_in_message(challenge)))
            .await?;

        let tenant_id = provisioner.resolve_tenant_id(&initial.access_token).await?;
        let credential = auth
            .refresh_access_token(&tenant_id, &initial.refresh_token)
            .await?;
        info!(%tenant_id, expires_at = ?credential.expires_at(), "credential scoped to tenant");

        let shell_uri = provisioner.provision_shell(&credential.access_token).await?;
        let endpoint = provisioner
            .open_terminal(&shell_uri, &credential.access_token, cols, rows)
            .await?;
        self.credential = Some(credential);

        self.connect_endpoint(&endpoint).await
    }

    /// Attach to an already-opened terminal and run the startup handshake:
    /// start the shell, let profile scripts settle, install the prompt, then
    /// wait for the prompt command's echo and the first prompt after it.
    pub async fn connect_endpoint(&mut self, endpoint: &TerminalEndpoint) -> Result<()> {
        if self.relay.take().is_some() {
            warn!("replacing an existing terminal session");
        }
        let terminal = &self.config.terminal;
        let relay = TerminalRelay::connect(endpoint, terminal, self.sink.clone()).await?;

        relay.submit_command(&terminal.start_shell_command, false).await?;
        tokio::time::sleep(Duration::from_millis(terminal.settle_delay_ms)).await;
        relay.submit_command(&terminal.set_prompt_command, false).await?;

        let limit = Duration::from_secs(terminal.startup_timeout_secs);
        tokio::time::timeout(limit, relay.wait_ready())
            .await
            .map_err(|_| RelayError::StartupTimeout(limit))??;

        info!(socket_uri = %endpoint.socket_uri, "terminal session ready");
        self.relay = Some(relay);
        Ok(())
    }

    /// Run `command` and suspend until the remote prompt returns.
    pub async fn execute(&self, command: &str) -> Result<()> {
        self.relay()?.submit_command(command, true).await?;
        Ok(())
    }

    /// Send end-of-input to the remote shell and tell the user.
    pub async fn exit(&self) -> Result<()> {
        self.relay()?
            .submit_raw_bytes(&[END_OF_TRANSMISSION], false)
            .await?;
        self.sink.write_line(SESSION_ENDED_NOTICE);
        Ok(())
    }

    fn relay(&self) -> std::result::Result<&TerminalRelay, RelayError> {
        self.relay.as_ref().ok_or(RelayError::SessionClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.relay.is_some()
    }

    pub fn terminal(&self) -> Option<&TerminalRelay> {
        self.relay.as_ref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }
}

fn sign_in_message(challenge: &DeviceCodeChallenge) -> String {
    if challenge.message.is_empty() {
        format!(
            "To sign in, open {} and enter the code {}",
            challenge.verification_url, challenge.user_code
        )
    } else {
        challenge.message.clone()
    }
}
