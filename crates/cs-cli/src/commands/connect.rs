use std::sync::Arc;

use anyhow::Context;
use cs_core::config::Config;
use cs_session::relay::RelayError;
use cs_session::session::{SessionController, SessionError};
use cs_session::sink::ConsoleSink;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// What a line typed at the local prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Skip,
    Exit,
    Command(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let command = line.trim_end_matches(['\r', '\n']);
    match command.trim() {
        "" => Input::Skip,
        "exit" => Input::Exit,
        _ => Input::Command(command),
    }
}

/// Run the `connect` subcommand: open a session, then relay stdin lines
/// until `exit`, end of input, or Ctrl-C.
pub async fn run(config: Config, cols: Option<u16>, rows: Option<u16>) -> anyhow::Result<()> {
    let cols = cols.unwrap_or(config.terminal.default_cols);
    let rows = rows.unwrap_or(config.terminal.default_rows);

    let mut session = SessionController::new(config, Arc::new(ConsoleSink));
    session
        .connect(cols, rows)
        .await
        .context("failed to open cloud shell session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Skip => continue,
            Input::Exit => break,
            Input::Command(command) => match session.execute(command).await {
                Ok(()) => {}
                Err(SessionError::Relay(RelayError::SessionClosed)) => {
                    anyhow::bail!("the remote session closed");
                }
                Err(e) => return Err(e).with_context(|| format!("command failed: {command}")),
            },
        }
    }

    if let Err(e) = session.exit().await {
        warn!(error = %e, "could not send end-of-input to the remote shell");
    }
    Ok(())
}
