//! Client for the MusicGPT generation server.
//!
//! One WebSocket connection per clip: send a `GenerateAudioNewChat` request,
//! follow `Generation` events until a `Result` arrives, then fetch the rendered
//! file over HTTP. No retries here; a failed clip is reported and the caller
//! decides what happens next.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    net::TcpStream,
    time::{timeout, timeout_at, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_SERVICE_ADDR: &str = "localhost:8642";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to render one clip.
pub struct ClipJob<'a> {
    pub prompt: &'a str,
    pub duration_seconds: u32,
    pub output_path: &'a Path,
    /// Called with values in `0.0..=1.0` as the service reports progress.
    pub on_progress: &'a (dyn Fn(f32) + Send + Sync),
}

/// Blocking-per-clip generation seam; the orchestrator awaits each call before
/// starting the next ordinal.
#[async_trait]
pub trait ClipGenerator: Send + Sync {
    async fn generate(&self, job: &ClipJob<'_>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    service_addr: String,
    clip_timeout: Duration,
}

impl Client {
    pub fn new(service_addr: &str, clip_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| Error::config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http, service_addr: service_addr.to_string(), clip_timeout })
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}/ws", self.service_addr)
    }

    pub fn file_url(&self, relpath: &str) -> String {
        format!("http://{}/files/{}", self.service_addr, relpath.trim_start_matches('/'))
    }

    pub fn service_addr(&self) -> &str {
        &self.service_addr
    }

    /// Plain TCP reachability check used before a run starts.
    pub async fn probe(&self) -> Result<()> {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.service_addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                Err(Error::Connection(format!("cannot reach {}: {err}", self.service_addr)))
            }
            Err(_) => Err(Error::Connection(format!(
                "timed out connecting to {}",
                self.service_addr
            ))),
        }
    }

    async fn download(&self, relpath: &str, output_path: &Path) -> Result<u64> {
        let url = self.file_url(relpath);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| Error::Download(format!("GET {url} failed: {err}")))?;
        if !response.status().is_success() {
            return Err(Error::Download(format!("GET {url} returned {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| Error::Download(format!("reading {url} failed: {err}")))?;
        if bytes.is_empty() {
            return Err(Error::Download(format!("{url} returned an empty file")));
        }

        let partial = partial_path(output_path);
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, output_path).await?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl ClipGenerator for Client {
    #[instrument(skip(self, job), fields(output = %job.output_path.display(), secs = job.duration_seconds))]
    async fn generate(&self, job: &ClipJob<'_>) -> Result<()> {
        let url = self.websocket_url();
        let (mut socket, _) = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {url}")))?
            .map_err(|err| Error::Connection(format!("websocket connect to {url} failed: {err}")))?;

        let request = ClientMessage::GenerateAudioNewChat(GenerateAudioNewChat {
            id: Uuid::new_v4().to_string(),
            chat_id: Uuid::new_v4().to_string(),
            prompt: job.prompt.to_string(),
            secs: job.duration_seconds,
        });
        let payload = serde_json::to_string(&request)?;
        socket
            .send(Message::Text(payload.into()))
            .await
            .map_err(|err| Error::Connection(format!("failed to send request: {err}")))?;
        debug!("generation request sent");

        let deadline = Instant::now() + self.clip_timeout;
        let mut started = false;
        let mut last_progress = 0.0f32;

        loop {
            let frame = match timeout_at(deadline, socket.next()).await {
                Err(_) => {
                    let reason = if started {
                        "generation timed out"
                    } else {
                        "generation never started"
                    };
                    return Err(Error::Timeout { after: self.clip_timeout, reason: reason.into() });
                }
                Ok(None) => {
                    return Err(Error::Connection("server closed the connection".into()));
                }
                Ok(Some(Err(err))) => {
                    return Err(Error::Connection(format!("websocket error: {err}")));
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(Error::Connection("server closed the connection".into()));
                }
                _ => continue,
            };

            let message: ServerMessage = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(err) => {
                    debug!("ignoring unrecognised server message: {err}");
                    continue;
                }
            };

            match message {
                ServerMessage::Info(info) => debug!(?info, "server info"),
                ServerMessage::Chats(_) => {}
                ServerMessage::Error(error) => {
                    return Err(Error::Service(format!("server error: {error}")));
                }
                ServerMessage::Generation(GenerationEvent::Start(_)) => {
                    started = true;
                    info!("generation started");
                }
                ServerMessage::Generation(GenerationEvent::Progress(progress)) => {
                    started = true;
                    let ratio = progress.progress.clamp(0.0, 1.0);
                    if ratio > last_progress {
                        last_progress = ratio;
                        (job.on_progress)(ratio);
                    }
                }
                ServerMessage::Generation(GenerationEvent::Error(failure)) => {
                    return Err(Error::Service(failure.error));
                }
                ServerMessage::Generation(GenerationEvent::Result(result)) => {
                    (job.on_progress)(1.0);
                    let size = self.download(&result.relpath, job.output_path).await?;
                    info!(bytes = size, "clip saved");
                    if let Err(err) = socket.close(None).await {
                        warn!("failed to close websocket cleanly: {err}");
                    }
                    return Ok(());
                }
            }
        }
    }
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".part");
    output_path.with_file_name(name)
}

#[derive(Debug, Serialize)]
enum ClientMessage {
    GenerateAudioNewChat(GenerateAudioNewChat),
}

#[derive(Debug, Serialize)]
struct GenerateAudioNewChat {
    id: String,
    chat_id: String,
    prompt: String,
    secs: u32,
}

#[derive(Debug, Deserialize)]
enum ServerMessage {
    Info(serde_json::Value),
    Chats(IgnoredAny),
    Generation(GenerationEvent),
    Error(serde_json::Value),
}

#[derive(Debug, Deserialize)]
enum GenerationEvent {
    Start(IgnoredAny),
    Progress(ProgressPayload),
    Result(ResultPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Deserialize)]
struct ProgressPayload {
    progress: f32,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    relpath: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}
