//! Logging setup for the cloud shell relay.
//!
//! Log records go to stderr; stdout is reserved for relayed shell output.

pub mod logging;
