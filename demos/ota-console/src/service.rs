//! Simulated update service.
//!
//! Speaks the wire protocol over WebSocket and pretends to search, download
//! and flash. Nothing is written to disk.

use futures_util::{SinkExt, StreamExt};
use ota_core::{Channel, DownloadResult, Message, Progress, Request, Response, UpdateCandidate};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// How the simulated service behaves.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub os_version: String,
    /// Report the system as current instead of offering an update.
    pub up_to_date: bool,
    /// Fail content validation of every download.
    pub corrupt: bool,
    /// Delay between progress reports.
    pub step: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            os_version: "23.4".to_string(),
            up_to_date: false,
            corrupt: false,
            step: Duration::from_millis(150),
        }
    }
}

pub async fn run(listener: TcpListener, options: ServiceOptions) -> anyhow::Result<()> {
    tracing::info!("Update service listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let options = options.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, options).await {
                tracing::warn!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    options: ServiceOptions,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::debug!("New client from {}", addr);

    // Replies from request workers are funneled through one writer.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let text = serde_json::to_string(&reply)?;
            sink.send(WsMessage::Text(text.into())).await?;
        }
        anyhow::Ok(())
    });

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let message: Message = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                continue;
            }
        };
        let request = match Request::from_message(&message) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Rejected request: {}", e);
                continue;
            }
        };
        tracing::info!(
            "{} from {} (request {:?})",
            request.kind(),
            message.reply_to.as_ref().map(|r| r.as_str()).unwrap_or("?"),
            message.request_id
        );

        let replies = reply_tx.clone();
        let options = options.clone();
        tokio::spawn(async move {
            handle_request(request, message.request_id, &options, &replies).await;
        });
    }

    drop(reply_tx);
    writer.await??;
    tracing::debug!("Client {} left", addr);
    Ok(())
}

async fn handle_request(
    request: Request,
    request_id: Option<u64>,
    options: &ServiceOptions,
    replies: &mpsc::UnboundedSender<Message>,
) {
    let send = |response: Response| {
        let _ = replies.send(response.into_message(request_id));
    };

    match request {
        Request::QueryOsVersion => send(Response::OsVersion {
            version: options.os_version.clone(),
        }),
        Request::SearchUpdates {
            include_all_channels,
        } => {
            tokio::time::sleep(options.step).await;
            if options.up_to_date {
                send(Response::UpToDate);
            } else {
                send(Response::SearchResult {
                    candidates: catalog(include_all_channels),
                });
            }
        }
        Request::DownloadUpdate { candidate } => {
            send(Response::DownloadProgress(Progress::Indeterminate));
            for percent in (0..=100).step_by(25) {
                tokio::time::sleep(options.step).await;
                send(Response::DownloadProgress(Progress::Percent(percent)));
            }
            send(Response::DownloadSuccess(DownloadResult::new(
                format!("/data/ota/{}.zip", candidate.version_id),
                !options.corrupt,
            )));
        }
        Request::InstallUpdate { artifact_path, .. } => {
            if !artifact_path.starts_with("/data/ota/") {
                send(Response::InstallError {
                    message: format!("unknown package {artifact_path}"),
                });
                return;
            }
            for percent in (0..=100).step_by(50) {
                tokio::time::sleep(options.step).await;
                send(Response::InstallProgress(Progress::Percent(percent)));
            }
            send(Response::RebootRequired);
        }
        Request::SetChannelPreference { .. } | Request::SetConnectionPreference { .. } => {
            send(Response::PreferenceUpdated);
        }
    }
}

fn catalog(include_all_channels: bool) -> Vec<UpdateCandidate> {
    let mut candidates =
        vec![UpdateCandidate::new("24.0", Channel::Live, 734_003_200).with_hash("9f2c41d0")];
    if include_all_channels {
        candidates.push(UpdateCandidate::new("24.1-rc2", Channel::Rc, 741_220_352));
        candidates.push(UpdateCandidate::new("25.0-dev7", Channel::Dev, 760_817_664));
    }
    candidates
}
