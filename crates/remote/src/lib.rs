//! Polls the bot server for accept commands issued from Telegram buttons.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use settings::{Settings, SettingsHandle};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

pub const ACCEPT_OFFER: &str = "ACCEPT_OFFER";

const MAX_BACKOFF_EXPONENT: u32 = 4;
const MAX_POLL_DELAY: Duration = Duration::from_secs(300);
const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("invalid bot server url: {0}")]
    InvalidUrl(String),
    #[error("bot server request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("bot server returned {0}")]
    Status(StatusCode),
    #[error("malformed command list: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommand {
    pub action: String,
    #[serde(default)]
    pub offer_id: Option<String>,
}

impl RemoteCommand {
    pub fn accept_target(&self) -> Option<&str> {
        if self.action != ACCEPT_OFFER {
            return None;
        }
        self.offer_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Receiver of accept commands; the daemon routes them into the dispatcher.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn accept_offer(&self, offer_id: &str);

    /// Called after every poll attempt made by [`run_poller`].
    fn poll_completed(&self, _result: Result<&PollSummary, &PollError>) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub forwarded: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct CommandClient {
    client: Client,
}

impl CommandClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// `{server}?userId=..&timestamp=..`, the timestamp defeating intermediary caches.
    pub fn command_url(server_url: &str, user_id: &str, timestamp_ms: i64) -> Result<Url, PollError> {
        let mut url = Url::parse(server_url.trim())
            .map_err(|err| PollError::InvalidUrl(format!("{server_url}: {err}")))?;
        url.query_pairs_mut()
            .append_pair("userId", user_id.trim())
            .append_pair("timestamp", &timestamp_ms.to_string());
        Ok(url)
    }

    /// Raw command entries. Only the list itself must be well-formed; entries are
    /// decoded one by one in [`poll_once`].
    pub async fn fetch(&self, server_url: &str, user_id: &str) -> Result<Vec<Value>, PollError> {
        let url = Self::command_url(server_url, user_id, Utc::now().timestamp_millis())?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status));
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entries: Option<Vec<Value>> = serde_json::from_str(&body)?;
        Ok(entries.unwrap_or_default())
    }
}

/// Runs one poll cycle. Does nothing unless polling is enabled in `settings`.
pub async fn poll_once(
    client: &CommandClient,
    settings: &Settings,
    sink: &dyn CommandSink,
) -> Result<PollSummary, PollError> {
    let mut summary = PollSummary::default();
    if !settings.polling_enabled() {
        return Ok(summary);
    }

    let entries = client
        .fetch(&settings.bot_server_url, &settings.user_id_for_polling)
        .await?;
    summary.received = entries.len();
    if !entries.is_empty() {
        info!(count = entries.len(), "received remote commands");
    }

    for entry in entries {
        let command = match serde_json::from_value::<RemoteCommand>(entry) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "skipping undecodable remote command");
                summary.skipped += 1;
                continue;
            }
        };
        match command.accept_target() {
            Some(offer_id) => {
                sink.accept_offer(offer_id).await;
                summary.forwarded += 1;
            }
            None => {
                warn!(action = %command.action, offer_id = ?command.offer_id, "unknown remote command or missing offer id");
                summary.skipped += 1;
            }
        }
    }
    Ok(summary)
}

/// Base interval doubled per consecutive failure, capped.
pub fn backoff_delay(base: Duration, consecutive_failures: u32) -> Duration {
    let factor = 1u32 << consecutive_failures.min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(factor).min(MAX_POLL_DELAY.max(base))
}

pub fn with_jitter(delay: Duration) -> Duration {
    let fraction = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
    delay + delay.mul_f64(fraction)
}

type PollKey = (bool, String, String, Duration);

fn poll_key(settings: &Settings) -> PollKey {
    (
        settings.polling_enabled(),
        settings.bot_server_url.clone(),
        settings.user_id_for_polling.clone(),
        settings.polling_interval(),
    )
}

fn shutdown_requested(changed: Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

/// Poll loop. Idles while polling is disabled, polls right away when the polling
/// configuration changes, and backs off with jitter on consecutive failures.
pub async fn run_poller(
    client: CommandClient,
    settings: SettingsHandle,
    sink: Arc<dyn CommandSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut settings_rx = settings.subscribe();
    let mut failures: u32 = 0;
    let mut was_active = false;

    loop {
        let snapshot = settings_rx.borrow_and_update().clone();
        let key = poll_key(&snapshot);

        if !snapshot.polling_enabled() {
            if was_active {
                info!("stopped polling for remote commands (disabled or settings incomplete)");
                was_active = false;
            }
            failures = 0;
            tokio::select! {
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = shutdown.changed() => {
                    if shutdown_requested(changed, &shutdown) {
                        return;
                    }
                }
            }
            continue;
        }

        if !was_active {
            info!(interval_secs = snapshot.polling_interval().as_secs(), "started polling for remote commands");
            was_active = true;
        }

        let result = poll_once(&client, &snapshot, sink.as_ref()).await;
        sink.poll_completed(result.as_ref());
        match result {
            Ok(summary) => {
                failures = 0;
                debug!(?summary, "remote command poll complete");
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                warn!(error = %err, failures, "remote command poll failed");
            }
        }

        let delay = with_jitter(backoff_delay(snapshot.polling_interval(), failures));
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if poll_key(&settings_rx.borrow()) != key {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if shutdown_requested(changed, &shutdown) {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_url_appends_user_and_timestamp() {
        let url = CommandClient::command_url("https://bot.example/commands", "u-1", 1700000000000)
            .expect("url should build");
        assert_eq!(
            url.as_str(),
            "https://bot.example/commands?userId=u-1&timestamp=1700000000000"
        );
    }

    #[test]
    fn command_url_keeps_existing_query() {
        let url = CommandClient::command_url("https://bot.example/c?key=k", "u", 1)
            .expect("url should build");
        assert_eq!(url.as_str(), "https://bot.example/c?key=k&userId=u&timestamp=1");
    }

    #[test]
    fn command_url_rejects_garbage() {
        assert!(matches!(
            CommandClient::command_url("not a url", "u", 1),
            Err(PollError::InvalidUrl(_))
        ));
    }

    #[test]
    fn accept_target_requires_known_action_and_id() {
        let ok = RemoteCommand {
            action: ACCEPT_OFFER.into(),
            offer_id: Some("o1".into()),
        };
        assert_eq!(ok.accept_target(), Some("o1"));
        let missing = RemoteCommand {
            action: ACCEPT_OFFER.into(),
            offer_id: Some(" ".into()),
        };
        assert_eq!(missing.accept_target(), None);
        let unknown = RemoteCommand {
            action: "IGNORE_OFFER".into(),
            offer_id: Some("o1".into()),
        };
        assert_eq!(unknown.accept_target(), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(240));
        assert_eq!(backoff_delay(base, 4), MAX_POLL_DELAY);
        assert_eq!(backoff_delay(base, 40), MAX_POLL_DELAY);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(30);
        for _ in 0..100 {
            let delay = with_jitter(base);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_secs(3));
        }
    }
}
