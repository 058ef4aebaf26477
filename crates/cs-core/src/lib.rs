//! Shared building blocks for the cloud shell relay.
//!
//! - `config`: TOML configuration with per-section defaults
//! - `types`: credentials, device-code challenges and terminal endpoints
//!   exchanged between the auth, provisioning and relay layers

pub mod config;
pub mod types;
