use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use settings::Settings;
use thiserror::Error;

pub mod desktop;
pub mod notice;
pub mod telegram;

pub use desktop::DesktopChannel;
pub use notice::{Notice, NoticeKind, ReplyAction};
pub use telegram::{SendReport, TelegramChannel, TelegramClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Desktop,
    Telegram,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Desktop => "desktop",
            ChannelKind::Telegram => "telegram",
        }
    }
}

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("channel not configured: {0}")]
    NotConfigured(String),
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// One delivery channel for user-facing notices.
///
/// `enabled` reads the gate from the settings snapshot; `send` is only called when it
/// returns true.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn enabled(&self, settings: &Settings) -> bool;

    async fn send(&self, notice: &Notice, settings: &Settings) -> Result<(), SenderError>;
}
