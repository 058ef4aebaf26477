//! End-to-end session tests against a scripted in-process terminal socket
//! and stub provisioning endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Form;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use cs_core::config::{Config, TerminalConfig};
use cs_core::types::TerminalEndpoint;
use cs_session::relay::{RelayError, SocketState, TerminalRelay};
use cs_session::session::{SessionController, SessionError, SESSION_ENDED_NOTICE};
use cs_session::sink::ChannelSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

// ===========================================================================
// Test helpers
// ===========================================================================

fn test_config() -> Config {
    let mut config = Config::default();
    config.terminal.settle_delay_ms = 10;
    config.terminal.startup_timeout_secs = 5;
    config
}

/// Accept one socket connection and hand it to `script`.
async fn terminal_server<F, Fut>(script: F) -> TerminalEndpoint
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    TerminalEndpoint {
        socket_uri: format!("ws://{addr}"),
        idle_timeout: Some(1200),
        root_directory: Some("/home/user".to_string()),
    }
}

/// A remote shell that echoes the handshake, answers each command with one
/// output line and the prompt, and records every frame it receives.
async fn fake_shell(mut ws: WebSocketStream<TcpStream>, received: flume::Sender<String>) {
    let terminal = TerminalConfig::default();
    while let Some(Ok(msg)) = ws.next().await {
        let text = match msg {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        let _ = received.send(text.clone());
        let command = text.trim_end();

        let reply = if command == terminal.start_shell_command {
            format!(
                "Requesting a Cloud Shell.Succeeded.\r\n\
                 user@cc-1234:~$ {command}\r\n\
                 MOTD: Welcome to Cloud Shell\r\n\
                 VERBOSE: Mounting drive\r\n"
            )
        } else if command == terminal.set_prompt_command {
            format!("PS /home/user> {command}\r\nPS> \r\n")
        } else if command == "\u{4}" || command == "crash" {
            let _ = ws.close(None).await;
            break;
        } else if command == "slow" {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "slow done\r\nPS> \r\n".to_string()
        } else if command == "mixed" {
            "PS> \r\nafter prompt\r\nPS> \r\n".to_string()
        } else {
            format!("output of {command}\r\nPS> \r\n")
        };
        if ws.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }
}

async fn fake_shell_endpoint() -> (TerminalEndpoint, flume::Receiver<String>) {
    let (tx, rx) = flume::unbounded();
    let endpoint = terminal_server(move |ws| fake_shell(ws, tx)).await;
    (endpoint, rx)
}

async fn connected_session() -> (SessionController, flume::Receiver<String>, flume::Receiver<String>) {
    let (endpoint, received) = fake_shell_endpoint().await;
    let (sink, output) = ChannelSink::new();
    let mut session = SessionController::new(test_config(), Arc::new(sink));
    session.connect_endpoint(&endpoint).await.unwrap();
    (session, received, output)
}

// ===========================================================================
// Handshake
// ===========================================================================

#[tokio::test]
async fn handshake_sends_startup_commands_and_becomes_ready() {
    let (session, received, output) = connected_session().await;
    let terminal = TerminalConfig::default();

    let relay = session.terminal().unwrap();
    assert!(relay.is_initialized());
    assert_eq!(relay.socket_state(), SocketState::Open);

    assert_eq!(
        received.try_iter().collect::<Vec<_>>(),
        vec![
            format!("{}\n\n", terminal.start_shell_command),
            format!("{}\n\n", terminal.set_prompt_command),
        ]
    );
    assert_eq!(
        output.try_iter().collect::<Vec<_>>(),
        vec![
            terminal.welcome_banner.clone(),
            "MOTD: Welcome to Cloud Shell".to_string(),
            "VERBOSE: Mounting drive".to_string(),
        ]
    );
}

/// A remote shell whose prompt trails the set-prompt echo in a separate
/// frame, and whose command output arrives only after a delay.
async fn lagging_shell(mut ws: WebSocketStream<TcpStream>) {
    let terminal = TerminalConfig::default();
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let command = text.as_str().trim_end().to_owned();

        if command == terminal.set_prompt_command {
            let echo = format!("PS /home> {command}\r\n");
            if ws.send(Message::Text(echo.into())).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            if ws.send(Message::Text("PS> \r\n".to_string().into())).await.is_err() {
                break;
            }
        } else if command != terminal.start_shell_command {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let reply = format!("output of {command}\r\nPS> \r\n");
            if ws.send(Message::Text(reply.into())).await.is_err() {
                break;
            }
        }
    }
}

#[tokio::test]
async fn trailing_startup_prompt_does_not_complete_first_command() {
    let endpoint = terminal_server(lagging_shell).await;
    let (sink, output) = ChannelSink::new();
    let mut session = SessionController::new(test_config(), Arc::new(sink));

    session.connect_endpoint(&endpoint).await.unwrap();
    session.execute("Get-Date").await.unwrap();

    let lines: Vec<String> = output.try_iter().collect();
    assert_eq!(lines, vec!["output of Get-Date"]);
}

#[tokio::test]
async fn handshake_times_out_without_prompt_echo() {
    // Accepts everything, answers nothing.
    let endpoint = terminal_server(|mut ws| async move {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    let mut config = test_config();
    config.terminal.startup_timeout_secs = 1;
    let (sink, _output) = ChannelSink::new();
    let mut session = SessionController::new(config, Arc::new(sink));

    let err = session.connect_endpoint(&endpoint).await.unwrap_err();
    assert!(
        matches!(err, SessionError::Relay(RelayError::StartupTimeout(_))),
        "{err}"
    );
    assert!(!session.is_connected());
}

#[tokio::test]
async fn handshake_fails_when_socket_closes_early() {
    let endpoint = terminal_server(|mut ws| async move {
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    })
    .await;
    let (sink, _output) = ChannelSink::new();
    let mut session = SessionController::new(test_config(), Arc::new(sink));

    let err = session.connect_endpoint(&endpoint).await.unwrap_err();
    assert!(
        matches!(
            err,
            SessionError::Relay(RelayError::SessionClosed | RelayError::Socket(_))
        ),
        "{err}"
    );
}

#[tokio::test]
async fn connect_to_unreachable_socket_fails() {
    let endpoint = TerminalEndpoint {
        socket_uri: "ws://127.0.0.1:1".to_string(),
        idle_timeout: None,
        root_directory: None,
    };
    let (sink, _output) = ChannelSink::new();
    let mut session = SessionController::new(test_config(), Arc::new(sink));

    let err = session.connect_endpoint(&endpoint).await.unwrap_err();
    assert!(matches!(err, SessionError::Relay(RelayError::Socket(_))), "{err}");
}

// ===========================================================================
// Execute / Exit
// ===========================================================================

#[tokio::test]
async fn execute_waits_for_prompt_and_forwards_output() {
    let (session, received, output) = connected_session().await;
    received.drain().for_each(drop);
    output.drain().for_each(drop);

    session.execute("Get-Date").await.unwrap();
    assert_eq!(received.try_recv().unwrap(), "Get-Date\n\n");
    assert_eq!(output.try_recv().unwrap(), "output of Get-Date");

    // A second command reuses the same session.
    session.execute("Get-Location\n").await.unwrap();
    assert_eq!(received.try_recv().unwrap(), "Get-Location\n\n");
    assert_eq!(output.try_recv().unwrap(), "output of Get-Location");
}

#[tokio::test]
async fn prompt_inside_output_does_not_end_command_early() {
    let (session, _received, output) = connected_session().await;
    output.drain().for_each(drop);

    session.execute("mixed").await.unwrap();
    assert_eq!(output.try_iter().collect::<Vec<_>>(), vec!["after prompt"]);
}

#[tokio::test]
async fn second_tracked_command_is_rejected_while_first_pending() {
    let (session, received, output) = connected_session().await;
    received.drain().for_each(drop);
    output.drain().for_each(drop);

    let (first, second) = tokio::join!(session.execute("slow"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.execute("Get-Date").await
    });

    first.unwrap();
    assert!(matches!(
        second,
        Err(SessionError::Relay(RelayError::CompletionPending))
    ));
    assert_eq!(received.try_iter().collect::<Vec<_>>(), vec!["slow\n\n"]);
    assert_eq!(output.try_recv().unwrap(), "slow done");
}

#[tokio::test]
async fn execute_fails_when_socket_closes_mid_command() {
    let (session, _received, _output) = connected_session().await;

    let err = tokio::time::timeout(Duration::from_secs(5), session.execute("crash"))
        .await
        .expect("pending completion must not hang")
        .unwrap_err();
    assert!(
        matches!(err, SessionError::Relay(RelayError::SessionClosed)),
        "{err}"
    );

    assert_eq!(
        session.terminal().unwrap().socket_state(),
        SocketState::Closed
    );
    assert!(matches!(
        session.execute("Get-Date").await,
        Err(SessionError::Relay(RelayError::SessionClosed))
    ));
}

#[tokio::test]
async fn exit_sends_end_of_transmission_and_notifies() {
    let (session, received, output) = connected_session().await;
    received.drain().for_each(drop);
    output.drain().for_each(drop);

    session.exit().await.unwrap();
    assert_eq!(output.try_recv().unwrap(), SESSION_ENDED_NOTICE);

    let frame = tokio::time::timeout(Duration::from_secs(5), received.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, "\u{4}");
}

#[tokio::test]
async fn raw_bytes_are_sent_unframed() {
    let (endpoint, received) = fake_shell_endpoint().await;
    let (sink, output) = ChannelSink::new();
    let relay = TerminalRelay::connect(&endpoint, &TerminalConfig::default(), Arc::new(sink))
        .await
        .unwrap();

    relay.submit_raw_bytes(b"echo hi", false).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), received.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, "echo hi");

    // Nothing is forwarded before the handshake completes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(output.try_recv().is_err());
    assert!(!relay.is_initialized());
}

#[tokio::test]
async fn close_finalizes_the_relay() {
    let (endpoint, _received) = fake_shell_endpoint().await;
    let (sink, _output) = ChannelSink::new();
    let relay = TerminalRelay::connect(&endpoint, &TerminalConfig::default(), Arc::new(sink))
        .await
        .unwrap();

    relay.close().await.unwrap();
    assert!(matches!(
        relay.wait_ready().await,
        Err(RelayError::SessionClosed)
    ));
    assert_ne!(relay.socket_state(), SocketState::Open);
    assert!(matches!(
        relay.submit_command("Get-Date", true).await,
        Err(RelayError::SessionClosed)
    ));
}

// ===========================================================================
// Full connect through stub provisioning endpoints
// ===========================================================================

/// Serve the identity provider, management API and shell API from one stub.
/// The provisioned shell URI points back at the same server.
async fn serve_provider(socket_uri: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = provider_router(format!("{base}/shell"), socket_uri);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn provider_router(shell_uri: String, socket_uri: String) -> Router {
    Router::new()
        .route(
            "/{tenant}/oauth2/devicecode",
            post(|| async {
                Json(json!({
                    "user_code": "ABCD-1234",
                    "device_code": "device-xyz",
                    "verification_url": "https://microsoft.com/devicelogin",
                    "expires_in": "30",
                    "interval": "1",
                    "message": "Open https://microsoft.com/devicelogin and enter ABCD-1234"
                }))
            }),
        )
        .route(
            "/{tenant}/oauth2/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let access = match form.get("grant_type").map(String::as_str) {
                    Some("refresh_token") => "tenant-access",
                    _ => "initial-access",
                };
                Json(json!({
                    "access_token": access,
                    "refresh_token": "refresh",
                    "token_type": "Bearer",
                    "expires_in": 3599
                }))
            }),
        )
        .route(
            "/tenants",
            get(|| async { Json(json!({ "value": [{ "tenantId": "tenant-1" }] })) }),
        )
        .route(
            "/providers/Microsoft.Portal/consoles/default",
            put(move || async move { Json(json!({ "properties": { "uri": shell_uri } })) }),
        )
        .route(
            "/shell/terminals",
            post(move || async move {
                Json(json!({
                    "socketUri": socket_uri,
                    "idleTimeout": "1200",
                    "rootDirectory": "/home/user"
                }))
            }),
        )
}

#[tokio::test]
async fn full_connect_execute_exit() {
    let (endpoint, received) = fake_shell_endpoint().await;
    let base = serve_provider(endpoint.socket_uri.clone()).await;

    let mut config = test_config();
    config.auth.authority = base.clone();
    config.cloud_shell.management_url = base;
    let (sink, output) = ChannelSink::new();
    let mut session = SessionController::new(config, Arc::new(sink));

    session.connect(100, 40).await.unwrap();
    assert!(session.is_connected());
    assert_eq!(session.credential().unwrap().access_token, "tenant-access");
    assert_eq!(
        output.try_recv().unwrap(),
        "Open https://microsoft.com/devicelogin and enter ABCD-1234"
    );
    output.drain().for_each(drop);

    session.execute("Get-Date").await.unwrap();
    assert_eq!(output.try_recv().unwrap(), "output of Get-Date");

    session.exit().await.unwrap();
    let frames: Vec<String> = received.try_iter().collect();
    assert!(frames.contains(&"Get-Date\n\n".to_string()));
}
