//! Outbound HTTP integrations: the identity provider (device-code OAuth)
//! and the cloud shell provisioning API.

pub mod azure;
