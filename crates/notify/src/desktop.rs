use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use settings::Settings;

use crate::notice::{Notice, NoticeKind};
use crate::{ChannelKind, NotificationChannel, SenderError};

/// Desktop notifications, shown by the extension when the page bridge receives them.
pub struct DesktopChannel {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DesktopNotification<'a> {
    kind: NoticeKind,
    title: &'a str,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    offer_id: Option<&'a str>,
}

impl DesktopChannel {
    pub fn new(client: Client, bridge_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/notifications", bridge_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Desktop
    }

    fn enabled(&self, settings: &Settings) -> bool {
        settings.chrome_notifications
    }

    async fn send(&self, notice: &Notice, _settings: &Settings) -> Result<(), SenderError> {
        let payload = DesktopNotification {
            kind: notice.kind,
            title: &notice.title,
            body: notice.plain_body(),
            offer_id: notice.offer_id.as_deref(),
        };
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SenderError::SendFailed(format!(
                "page bridge returned non-success status: {status}"
            )));
        }
        Ok(())
    }
}
