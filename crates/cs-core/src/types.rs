use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Bearer credentials issued by the identity provider.
///
/// Held in memory only; replaced wholesale on every refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds as reported by the provider (`expires_in`).
    #[serde(
        rename = "expires_in",
        default,
        deserialize_with = "de::opt_u64_from_str_or_number"
    )]
    pub expiry_hint: Option<u64>,
    #[serde(skip, default = "Utc::now")]
    pub acquired_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Credential {
    /// Absolute expiry derived from the provider's lifetime hint.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_hint
            .map(|secs| self.acquired_at + Duration::seconds(secs as i64))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expiry_hint", &self.expiry_hint)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DeviceCodeChallenge
// ---------------------------------------------------------------------------

/// The device-code issuance response. `message` is the human-readable
/// instruction the caller should display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeChallenge {
    pub user_code: String,
    pub device_code: String,
    #[serde(alias = "verification_uri")]
    pub verification_url: String,
    #[serde(deserialize_with = "de::u64_from_str_or_number")]
    pub expires_in: u64,
    #[serde(default = "default_interval", deserialize_with = "de::u64_from_str_or_number")]
    pub interval: u64,
    #[serde(default)]
    pub message: String,
}

fn default_interval() -> u64 {
    5
}

impl DeviceCodeChallenge {
    /// Seconds between polls. A zero interval from the provider is treated as one second.
    pub fn poll_interval(&self) -> u64 {
        self.interval.max(1)
    }

    /// Number of polls that fit in the challenge lifetime: `floor(expires_in / interval)`.
    pub fn max_attempts(&self) -> u64 {
        self.expires_in / self.poll_interval()
    }
}

// ---------------------------------------------------------------------------
// TerminalEndpoint
// ---------------------------------------------------------------------------

/// A provisioned terminal: the socket to connect to plus provider metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalEndpoint {
    pub socket_uri: String,
    #[serde(default, deserialize_with = "de::opt_u64_from_str_or_number")]
    pub idle_timeout: Option<u64>,
    #[serde(default)]
    pub root_directory: Option<String>,
}

// ---------------------------------------------------------------------------
// Tolerant numeric decoding
// ---------------------------------------------------------------------------

/// Deserializers for numeric fields the provider sends either as JSON
/// numbers or as numeric strings.
pub mod de {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    impl NumberOrString {
        fn into_u64<E: Error>(self) -> Result<u64, E> {
            match self {
                NumberOrString::Number(n) => Ok(n),
                NumberOrString::String(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("expected a numeric string, got {s:?}"))),
            }
        }
    }

    pub fn u64_from_str_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        NumberOrString::deserialize(deserializer)?.into_u64()
    }

    pub fn opt_u64_from_str_or_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<NumberOrString>::deserialize(deserializer)?
            .map(NumberOrString::into_u64)
            .transpose()
    }
}
