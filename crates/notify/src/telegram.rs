use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use settings::Settings;
use tracing::debug;

use crate::notice::{Notice, ReplyAction};
use crate::{ChannelKind, NotificationChannel, SenderError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const PARSE_MODE: &str = "Markdown";

/// Subset of the Bot API reply the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_API_BASE)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Calls `sendMessage`. API-level refusals come back as `ok: false`; only transport
    /// failures and unreadable replies are errors.
    pub async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
        actions: &[ReplyAction],
    ) -> Result<SendReport, SenderError> {
        let url = format!("{}/bot{token}/sendMessage", self.base_url);
        let reply_markup = if actions.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup {
                inline_keyboard: vec![actions
                    .iter()
                    .map(|a| InlineKeyboardButton {
                        text: &a.text,
                        callback_data: &a.callback_data,
                    })
                    .collect()],
            })
        };
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: PARSE_MODE,
            reply_markup,
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        match response.json::<SendReport>().await {
            Ok(report) => {
                debug!(%status, ok = report.ok, "telegram replied");
                Ok(report)
            }
            Err(err) if status.is_success() => Err(SenderError::SendFailed(format!(
                "unreadable Telegram reply: {err}"
            ))),
            Err(_) => Ok(SendReport {
                ok: false,
                description: Some(format!("Telegram API returned {status}")),
            }),
        }
    }
}

pub struct TelegramChannel {
    client: TelegramClient,
}

impl TelegramChannel {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn enabled(&self, settings: &Settings) -> bool {
        settings.telegram_notifications
    }

    async fn send(&self, notice: &Notice, settings: &Settings) -> Result<(), SenderError> {
        let (token, chat_id) = settings.telegram_credentials().ok_or_else(|| {
            SenderError::NotConfigured("telegram token or chat id not set".to_string())
        })?;
        let report = self
            .client
            .send_message(token, chat_id, &notice.markdown(), &notice.actions)
            .await?;
        if report.ok {
            Ok(())
        } else {
            Err(SenderError::SendFailed(
                report
                    .description
                    .unwrap_or_else(|| "unknown Telegram API error".to_string()),
            ))
        }
    }
}
