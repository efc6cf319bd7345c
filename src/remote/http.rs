//! Document store gateway client
//!
//! Writes go over REST; subscriptions are WebSocket streams that push the
//! full result set as JSON on connect and after every change:
//!
//! ```text
//! {"type":"snapshot","items":[...]}
//! {"type":"error","code":"permission-denied","message":"..."}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::{RemoteEvent, RemoteStore, Subscription};
use crate::config::RemoteConfig;
use crate::error::{RemoteError, RemoteErrorKind};
use crate::model::{CounselingSession, Report};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Frames pushed on a subscription stream.
///
/// Items stay untyped until [`decode_items`] converts them one at a time.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamFrame {
    Snapshot { items: Vec<Value> },
    Error { code: String, message: Option<String> },
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// HTTP + WebSocket client for the shared document store
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    ws_url: String,
    api_key: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| {
                    RemoteError::new(RemoteErrorKind::AuthNotConfigured, "invalid API key")
                })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        // Per-operation bounds are applied by callers; this is a backstop
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.upload_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ws_url: config.resolved_ws_url(),
            api_key: config.api_key.clone(),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::new(
            RemoteErrorKind::from_status(status.as_u16()),
            format!("gateway returned {}: {}", status, body),
        ))
    }

    fn stream<T>(&self, collection: &str) -> Subscription<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = format!("{}/v1/{}/stream", self.ws_url, collection);
        let api_key = self.api_key.clone();
        Subscription::spawn(move |tx| async move {
            if let Err(e) = stream_collection(&url, api_key.as_deref(), &tx).await {
                let _ = tx.send(RemoteEvent::Error(e)).await;
            }
        })
    }
}

/// Connect to one collection stream and forward frames until it ends.
async fn stream_collection<T>(
    url: &str,
    api_key: Option<&str>,
    tx: &mpsc::Sender<RemoteEvent<T>>,
) -> Result<(), RemoteError>
where
    T: DeserializeOwned,
{
    let mut request = url
        .into_client_request()
        .map_err(|e| RemoteError::network(format!("invalid stream URL {}: {}", url, e)))?;
    if let Some(key) = api_key {
        let value = format!("Bearer {}", key)
            .parse()
            .map_err(|_| RemoteError::new(RemoteErrorKind::AuthNotConfigured, "invalid API key"))?;
        request
            .headers_mut()
            .insert(tungstenite::http::header::AUTHORIZATION, value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(classify_handshake)?;
    info!(url, "Subscribed to document stream");

    let (mut write, mut read) = ws_stream.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(vec![])).await {
                    return Err(RemoteError::network(format!("ping failed: {}", e)));
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = match serde_json::from_str::<StreamFrame>(&text) {
                            Ok(StreamFrame::Snapshot { items }) => {
                                let items = decode_items::<T>(url, items);
                                debug!(url, items = items.len(), "Snapshot received");
                                RemoteEvent::Snapshot(items)
                            }
                            Ok(StreamFrame::Error { code, message }) => {
                                return Err(RemoteError::new(
                                    RemoteErrorKind::from_code(&code),
                                    message.unwrap_or(code),
                                ));
                            }
                            Err(e) => {
                                warn!(url, error = %e, "Ignoring malformed stream frame");
                                continue;
                            }
                        };
                        if tx.send(event).await.is_err() {
                            // Subscriber went away
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_default();
                        return Err(RemoteError::new(
                            RemoteErrorKind::from_code(&reason),
                            format!("stream closed by server: {}", reason),
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(RemoteError::network(format!("stream error: {}", e)));
                    }
                    None => {
                        return Err(RemoteError::network("stream ended"));
                    }
                }
            }
        }
    }
}

/// Convert snapshot items one by one, dropping the ones that don't parse.
fn decode_items<T: DeserializeOwned>(url: &str, items: Vec<Value>) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str).map(str::to_string);
            match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(url, id = ?id, error = %e, "Skipping malformed document");
                    None
                }
            }
        })
        .collect();
    if decoded.len() < total {
        warn!(url, skipped = total - decoded.len(), total, "Snapshot had unreadable documents");
    }
    decoded
}

fn classify_handshake(err: tungstenite::Error) -> RemoteError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            RemoteError::new(
                RemoteErrorKind::from_status(status),
                format!("stream handshake rejected with {}", status),
            )
        }
        other => RemoteError::network(format!("stream connect failed: {}", other)),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn is_enabled(&self) -> bool {
        true
    }

    fn subscribe_reports(&self) -> Subscription<Report> {
        self.stream("reports")
    }

    fn subscribe_sessions(&self) -> Subscription<CounselingSession> {
        self.stream("sessions")
    }

    async fn write_report(&self, report: &Report) -> Result<(), RemoteError> {
        let url = format!("{}/v1/reports/{}", self.base_url, report.id);
        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(report)
            .send()
            .await?;
        Self::check_status(response).await?;
        debug!(report_id = %report.id, "Report written to document store");
        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String, RemoteError> {
        let url = format!("{}/v1/media", self.base_url);
        let size = bytes.len();
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Err(RemoteError::network("upload returned no URL"));
        }
        let body: UploadResponse = response.json().await?;
        debug!(size, url = %body.url, "Media uploaded");
        Ok(body.url)
    }
}
