//! Cloud Shell provisioning: tenant discovery, console provisioning and
//! terminal creation. Plain request/response calls with no retries.

use cs_core::config::CloudShellConfig;
use cs_core::types::TerminalEndpoint;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use super::trim_base;

const TENANTS_API_VERSION: &str = "2018-01-01";
const CONSOLE_API_VERSION: &str = "2017-12-01-preview";

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no tenants found for the signed-in account")]
    NoTenant,

    #[error("tenant listing failed (HTTP {status}): {body}")]
    Tenants { status: u16, body: String },

    #[error("cloud shell provisioning failed (HTTP {status}): {body}")]
    Provision { status: u16, body: String },

    #[error("terminal request failed (HTTP {status}): {body}")]
    Terminal { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tenant {
    tenant_id: String,
}

/// The tenant listing is normally wrapped in `{"value": [...]}`; a bare array is accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TenantList {
    Wrapped { value: Vec<Tenant> },
    Bare(Vec<Tenant>),
}

impl TenantList {
    fn into_vec(self) -> Vec<Tenant> {
        match self {
            TenantList::Wrapped { value } => value,
            TenantList::Bare(tenants) => tenants,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConsoleResource {
    properties: ConsoleProperties,
}

#[derive(Debug, Deserialize)]
struct ConsoleProperties {
    uri: String,
}

/// Provisions a cloud shell and a terminal endpoint for a bearer token.
pub struct CloudShellProvisioner {
    config: CloudShellConfig,
    http: Client,
}

impl CloudShellProvisioner {
    pub fn new(config: CloudShellConfig) -> Result<Self> {
        let http = Client::builder().user_agent(&config.user_agent).build()?;
        Ok(Self { config, http })
    }

    /// Build a request with the JSON accept header and exactly one bearer
    /// `Authorization` header.
    fn request(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("Accept", "application/json")
            .bearer_auth(token)
    }

    /// Return the first tenant visible to `token`.
    ///
    /// Multi-tenant identities always get the first entry; there is no
    /// selection policy beyond that.
    pub async fn resolve_tenant_id(&self, token: &str) -> Result<String> {
        let url = format!(
            "{}/tenants?api-version={TENANTS_API_VERSION}",
            trim_base(&self.config.management_url)
        );
        let resp = self.request(Method::GET, &url, token).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProvisionError::Tenants {
                status: status.as_u16(),
                body,
            });
        }

        let tenants = serde_json::from_str::<TenantList>(&body)
            .map_err(|e| ProvisionError::Parse(format!("{e}: {body}")))?
            .into_vec();
        debug!(count = tenants.len(), "listed tenants");

        tenants
            .into_iter()
            .next()
            .map(|t| t.tenant_id)
            .ok_or(ProvisionError::NoTenant)
    }

    /// Request (or reuse) the user's cloud shell console and return its URI.
    pub async fn provision_shell(&self, token: &str) -> Result<String> {
        let url = format!(
            "{}/providers/Microsoft.Portal/consoles/default?api-version={CONSOLE_API_VERSION}",
            trim_base(&self.config.management_url)
        );
        let resp = self
            .request(Method::PUT, &url, token)
            .json(&serde_json::json!({
                "properties": { "osType": self.config.os_type }
            }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProvisionError::Provision {
                status: status.as_u16(),
                body,
            });
        }

        let console = serde_json::from_str::<ConsoleResource>(&body)
            .map_err(|e| ProvisionError::Parse(format!("{e}: {body}")))?;
        info!(uri = %console.properties.uri, "cloud shell provisioned");
        Ok(console.properties.uri)
    }

    /// Ask the shell for a terminal sized `cols` x `rows`.
    pub async fn open_terminal(
        &self,
        shell_uri: &str,
        token: &str,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalEndpoint> {
        let url = format!(
            "{}/terminals?cols={cols}&rows={rows}&version={}&shell={}",
            trim_base(shell_uri),
            urlencoding::encode(&self.config.terminal_api_version),
            urlencoding::encode(&self.config.shell),
        );
        let resp = self
            .request(Method::POST, &url, token)
            .json(&serde_json::json!({ "tokens": [] }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProvisionError::Terminal {
                status: status.as_u16(),
                body,
            });
        }

        let endpoint = serde_json::from_str::<TerminalEndpoint>(&body)
            .map_err(|e| ProvisionError::Parse(format!("{e}: {body}")))?;
        debug!(socket_uri = %endpoint.socket_uri, cols, rows, "terminal opened");
        Ok(endpoint)
    }
}
