use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use offers::OfferRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/offer_relay.sock";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "payload")]
pub enum AdminRequest {
    Status,
    Pause,
    Resume,
    /// Zeroes this session's offer counters.
    ResetCounts,
    /// One scrape batch, in page order.
    SubmitOffers(Vec<OfferRecord>),
    /// Partial settings document, camelCase keys.
    UpdateSettings(Value),
    /// Sends a test message. Missing fields fall back to the saved credentials.
    TestTelegram {
        token: Option<String>,
        chat_id: Option<String>,
        message: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdminStatus {
    pub run_id: String,
    pub monitoring_active: bool,
    pub offers_detected: u64,
    pub notified: u64,
    pub accepted: u64,
    pub accept_failed: u64,
    pub ledger_size: usize,
    pub last_check_time: Option<String>,
    pub last_offer_time: Option<String>,
    pub polling_active: bool,
    pub p2p_rate: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OfferDisposition {
    pub offer_id: String,
    pub outcome: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "payload")]
pub enum AdminResponse {
    Status(AdminStatus),
    Dispatched {
        dispositions: Vec<OfferDisposition>,
        handled: usize,
    },
    SettingsUpdated(Vec<String>),
    Telegram {
        ok: bool,
        description: Option<String>,
    },
    Ack,
    Error(String),
}

/// Serves one newline-delimited JSON request per connection until the listener fails.
pub async fn run_server<F, Fut>(socket_path: &str, handler: F) -> Result<()>
where
    F: Fn(AdminRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AdminResponse>> + Send + 'static,
{
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    let handler = Arc::new(handler);
    info!(socket = socket_path, "admin ipc listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, handler).await {
                warn!(error = ?err, "admin ipc handler error");
            }
        });
    }
}

async fn handle_stream<F, Fut>(stream: UnixStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(AdminRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AdminResponse>> + Send + 'static,
{
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let resp = match serde_json::from_str::<AdminRequest>(buf.trim()) {
        Ok(req) => handler(req)
            .await
            .unwrap_or_else(|err| AdminResponse::Error(format!("{err:#}"))),
        Err(err) => AdminResponse::Error(format!("malformed request: {err}")),
    };
    let line = serde_json::to_string(&resp)? + "\n";
    write_half.write_all(line.as_bytes()).await?;
    Ok(())
}

pub async fn send_request(socket_path: &str, req: &AdminRequest) -> Result<AdminResponse> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let line = serde_json::to_string(req)? + "\n";
    stream.write_all(line.as_bytes()).await?;
    let (read_half, _) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = String::new();
    let _ = reader.read_line(&mut buf).await?;
    let resp: AdminResponse = serde_json::from_str(buf.trim())?;
    Ok(resp)
}
