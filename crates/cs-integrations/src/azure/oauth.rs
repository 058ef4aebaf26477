//! OAuth 2.0 device-code flow against the identity provider.
//!
//! 1. Request a device code; the provider answers with a short user code
//!    and instructions for the user to sign in on another device
//! 2. Poll the token endpoint at the provider-dictated interval until the
//!    user completes sign-in, the provider rejects the request, or the
//!    attempt budget (`expires_in / interval`) runs out
//! 3. Exchange the refresh token for a tenant-scoped credential

use std::future::Future;
use std::time::Duration;

use cs_core::config::AuthConfig;
use cs_core::types::{Credential, DeviceCodeChallenge};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::trim_base;

/// Errors that can occur during the device-code flow or a token refresh.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Network failures, connection errors, timeouts and other
    /// transport-layer issues when talking to the identity provider.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an OAuth error code other than
    /// `authorization_pending` (e.g. `expired_token`, `invalid_grant`).
    #[error("identity provider returned an error: {error}: {description}")]
    Provider { error: String, description: String },

    /// The provider answered with a non-success status and no OAuth error body.
    #[error("identity provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Device-code polling exhausted its attempt budget.
    #[error("device code authorization timed out after {attempts} attempts")]
    Timeout { attempts: u64 },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// OAuth error body. The provider reports pending authorization this way,
/// sometimes with a success status, so the body is always inspected.
#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

const AUTHORIZATION_PENDING: &str = "authorization_pending";
const SLOW_DOWN: &str = "slow_down";

/// Result of a single token poll.
#[derive(Debug)]
pub enum PollOutcome {
    Pending,
    Complete(Credential),
}

/// Obtains and refreshes bearer credentials via the device-code flow.
pub struct TokenAuthenticator {
    config: AuthConfig,
    http: Client,
}

impl TokenAuthenticator {
    pub fn new(config: AuthConfig, user_agent: &str) -> Result<Self> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, tenant: &str, path: &str) -> String {
        format!(
            "{}/{}/oauth2/{path}",
            trim_base(&self.config.authority),
            urlencoding::encode(tenant)
        )
    }

    /// Issue the device-code request.
    ///
    /// The caller is responsible for showing `challenge.message` to the user.
    pub async fn request_device_code(&self) -> Result<DeviceCodeChallenge> {
        let url = self.endpoint(&self.config.default_tenant, "devicecode");
        debug!(%url, "requesting device code");

        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("resource", self.config.resource.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if let Some(err) = provider_error(&body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<DeviceCodeChallenge>(&body)
            .map_err(|e| AuthError::Parse(format!("{e}: {body}")))
    }

    /// Poll the token endpoint until the user completes sign-in.
    ///
    /// Sleeps `challenge.interval` seconds before each attempt and gives up
    /// with [`AuthError::Timeout`] after `floor(expires_in / interval)` attempts.
    pub async fn poll_for_token(&self, challenge: &DeviceCodeChallenge) -> Result<Credential> {
        let interval = Duration::from_secs(challenge.poll_interval());
        poll_until_complete(challenge.max_attempts(), interval, || {
            self.poll_once(&challenge.device_code)
        })
        .await
    }

    /// A single poll of the token endpoint.
    pub async fn poll_once(&self, device_code: &str) -> Result<PollOutcome> {
        let url = self.endpoint(&self.config.default_tenant, "token");
        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "device_code"),
                ("client_id", self.config.client_id.as_str()),
                ("resource", self.config.resource.as_str()),
                ("code", device_code),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if let Ok(err) = serde_json::from_str::<ProviderError>(&body) {
            match err.error.as_str() {
                "" => {}
                AUTHORIZATION_PENDING | SLOW_DOWN => return Ok(PollOutcome::Pending),
                _ => {
                    return Err(AuthError::Provider {
                        error: err.error,
                        description: err.error_description,
                    })
                }
            }
        }
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_credential(&body).map(PollOutcome::Complete)
    }

    /// Exchange a refresh token for a fresh access/refresh pair scoped to `tenant_id`.
    pub async fn refresh_access_token(
        &self,
        tenant_id: &str,
        refresh_token: &str,
    ) -> Result<Credential> {
        let url = self.endpoint(tenant_id, "token");
        debug!(%tenant_id, "refreshing access token");

        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("resource", self.config.resource.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if let Some(err) = provider_error(&body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_credential(&body)
    }

    /// Run the full device-code flow, handing the challenge to `on_challenge`
    /// so the caller can display the sign-in instructions.
    pub async fn authenticate<F>(&self, on_challenge: F) -> Result<Credential>
    where
        F: FnOnce(&DeviceCodeChallenge),
    {
        let challenge = self.request_device_code().await?;
        on_challenge(&challenge);
        let credential = self.poll_for_token(&challenge).await?;
        info!("device code authorization completed");
        Ok(credential)
    }
}

fn provider_error(body: &str) -> Option<AuthError> {
    let err = serde_json::from_str::<ProviderError>(body).ok()?;
    if err.error.is_empty() {
        return None;
    }
    Some(AuthError::Provider {
        error: err.error,
        description: err.error_description,
    })
}

fn parse_credential(body: &str) -> Result<Credential> {
    serde_json::from_str::<Credential>(body).map_err(|e| AuthError::Parse(e.to_string()))
}

/// Drive `poll` until it yields a credential, fails, or `max_attempts` polls
/// have come back pending. Each attempt is preceded by an awaitable sleep of
/// `interval`, so other tasks keep running while we wait.
pub async fn poll_until_complete<F, Fut>(
    max_attempts: u64,
    interval: Duration,
    mut poll: F,
) -> Result<Credential>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome>>,
{
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;
        match poll().await? {
            PollOutcome::Complete(credential) => {
                debug!(attempt, "token issued");
                return Ok(credential);
            }
            PollOutcome::Pending => debug!(attempt, max_attempts, "authorization pending"),
        }
    }
    warn!(max_attempts, "device code polling budget exhausted");
    Err(AuthError::Timeout {
        attempts: max_attempts,
    })
}
