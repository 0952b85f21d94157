mod config;
mod dispatcher;
mod rate_limit;

use anyhow::Result;
use clap::Parser;
use config::Settings;
use dispatcher::AppState;
use futures_util::{SinkExt, StreamExt};
use rate_limit::TokenBucket;
use shared_protocol::{ClientMessage, ErrorCode, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use streaming_core::backend::{Backend, StubBackend};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "transcriber")]
struct Args {
    #[arg(short, long, default_value = "[::]", help = "address to listen on")]
    address: String,

    #[arg(short, long, default_value = "8001", help = "port to listen on")]
    port: u16,

    #[arg(short, long, help = "path to a JSON config file")]
    config: Option<String>,

    #[arg(long, help = "path to whisper model file (requires the whisper-backend feature)")]
    model: Option<String>,

    #[arg(long, help = "override the configured backend (stub|whisper)")]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(backend) = &args.backend {
        settings.transcription.backend = backend.clone();
    }

    let (backend, backend_name): (Arc<dyn Backend>, String) = match settings.transcription.backend.as_str() {
        "whisper" => build_whisper_backend(args.model.as_deref())?,
        _ => (Arc::new(StubBackend::new()), "stub".to_string()),
    };
    info!(backend = %backend_name, "loading transcription backend");
    backend.load().await?;

    let session_timeout_seconds = settings.streaming.session_timeout_seconds;
    let state = Arc::new(AppState::new(backend, backend_name, settings));

    spawn_idle_reaper(state.clone(), session_timeout_seconds);

    info!(%addr, "listening");
    let listener = TcpListener::bind(addr).await?;
    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!(%peer_addr, "connection accepted");
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                error!(%peer_addr, error = %e, "connection ended with error");
            }
        });
    }
    Ok(())
}

#[cfg(feature = "whisper-backend")]
fn build_whisper_backend(model: Option<&str>) -> Result<(Arc<dyn Backend>, String)> {
    let model = model.ok_or_else(|| anyhow::anyhow!("--model is required for the whisper backend"))?;
    info!(model, "loading whisper model");
    let backend = streaming_core::backend::WhisperBackend::new(model)?;
    Ok((Arc::new(backend), "whisper".to_string()))
}

#[cfg(not(feature = "whisper-backend"))]
fn build_whisper_backend(_model: Option<&str>) -> Result<(Arc<dyn Backend>, String)> {
    warn!("whisper backend requested but this binary was built without the whisper-backend feature, falling back to stub");
    Ok((Arc::new(StubBackend::new()), "stub".to_string()))
}

/// Periodically evict sessions that have seen no `feed_pcm`/`feed_opus`
/// activity for `session_timeout_seconds`, per the dispatcher's session
/// registry (C7). Runs for the lifetime of the process.
fn spawn_idle_reaper(state: Arc<AppState>, session_timeout_seconds: f64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let expired = state.registry.sweep_idle(session_timeout_seconds).await;
            if !expired.is_empty() {
                info!(count = expired.len(), sessions = ?expired, "reaped idle sessions");
            }
        }
    });
}

async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = Uuid::new_v4().to_string();
    let rate = &state.settings.rate_limit;
    let mut limiter = TokenBucket::new(rate.burst_chunks_per_second, rate.sustained_chunks_per_second);
    let mut binary_session: Option<String> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(%client_id, error = %e, "websocket error");
                break;
            }
        };

        let responses = match msg {
            Message::Text(text) => {
                let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        vec_error(None, ErrorCode::InternalError, format!("failed to parse message: {e}"))
                    }
                };
                handle_parsed(&state, &client_id, parsed, &mut binary_session, &mut limiter).await
            }
            Message::Binary(data) => {
                if !limiter.try_acquire() {
                    rate_limited(binary_session.as_deref())
                } else {
                    dispatcher::dispatch_binary(&state, &binary_session, &data).await
                }
            }
            Message::Ping(data) => {
                ws_sender.send(Message::Pong(data)).await?;
                Vec::new()
            }
            Message::Pong(_) | Message::Frame(_) => Vec::new(),
            Message::Close(_) => break,
        };

        for response in responses {
            let json = serde_json::to_string(&response)?;
            ws_sender.send(Message::Text(json)).await?;
        }
    }

    state.registry.abort_client(&client_id).await;
    let _ = ws_sender.send(Message::Close(None)).await;
    info!(%client_id, "connection closed");
    Ok(())
}

/// Placeholder returned when a message is somehow unparseable but still
/// needs an error surfaced; extracted so the match arm above stays short.
fn vec_error(session_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Vec<ServerMessage> {
    vec![ServerMessage::Error {
        session_id,
        code,
        message: message.into(),
    }]
}

fn rate_limited(session_id: Option<&str>) -> Vec<ServerMessage> {
    vec_error(
        session_id.map(str::to_string),
        ErrorCode::RateLimited,
        "chunk rate limit exceeded",
    )
}

/// Chunk-bearing messages are metered against the per-connection token
/// bucket before reaching the dispatcher; everything else (start_stream,
/// end_stream, abort_stream, ping) passes straight through.
async fn handle_parsed(
    state: &AppState,
    client_id: &str,
    msg: ClientMessage,
    binary_session: &mut Option<String>,
    limiter: &mut TokenBucket,
) -> Vec<ServerMessage> {
    let is_chunk = matches!(msg, ClientMessage::PcmChunk { .. } | ClientMessage::AudioChunk { .. });
    if is_chunk && !limiter.try_acquire() {
        let session_id = match &msg {
            ClientMessage::PcmChunk { session_id, .. } | ClientMessage::AudioChunk { session_id, .. } => {
                Some(session_id.as_str())
            }
            _ => None,
        };
        return rate_limited(session_id);
    }

    dispatcher::dispatch(state, client_id, msg, binary_session).await
}
