//! Terminal relay and session lifecycle for a remote cloud shell.
//!
//! A session pumps raw socket frames into a bounded byte pipeline,
//! reassembles them into lines, classifies each line against the startup
//! handshake, and forwards steady-state output to an [`sink::OutputSink`].
//! Command completion is inferred from the remote prompt.
//!
//! Key components:
//! - `line_buffer`: frame-boundary-independent line reassembly
//! - `classifier`: startup / steady-state line classification
//! - `completion`: the single "has the last command finished?" handle
//! - `relay`: socket connection, ingest and line pumps, command submission
//! - `session`: auth → provisioning → relay orchestration

pub mod classifier;
pub mod completion;
pub mod line_buffer;
pub mod relay;
pub mod session;
pub mod sink;
