use admin_ipc::{AdminRequest, AdminResponse, AdminStatus, OfferDisposition};
use anyhow::Result;
use dispatch::DispatchHandle;
use notify::notice::test_notice;
use notify::TelegramClient;
use rates::RateHandle;
use settings::SettingsHandle;
use tracing::{info, warn};

use crate::relay::{outcome_detail, Recorder};

/// Everything the admin socket can reach.
#[derive(Clone)]
pub struct AdminContext {
    pub run_id: String,
    pub settings: SettingsHandle,
    pub dispatch: DispatchHandle,
    pub rates: RateHandle,
    pub telegram: TelegramClient,
    pub recorder: Recorder,
}

impl AdminContext {
    pub async fn handle(&self, req: AdminRequest) -> Result<AdminResponse> {
        match req {
            AdminRequest::Status => self.status().await,
            AdminRequest::Pause => {
                if self.settings.pause() {
                    info!("monitoring paused");
                }
                Ok(AdminResponse::Ack)
            }
            AdminRequest::Resume => {
                if self.settings.resume() {
                    info!("monitoring resumed");
                }
                Ok(AdminResponse::Ack)
            }
            AdminRequest::ResetCounts => {
                let snapshot = self.dispatch.reset_stats().await?;
                self.recorder.metrics().set_ledger_size(snapshot.ledger_size);
                Ok(AdminResponse::Ack)
            }
            AdminRequest::SubmitOffers(offers) => {
                let dispositions = self.dispatch.submit(offers).await?;
                for disposition in &dispositions {
                    self.recorder.record("scrape", disposition).await;
                }
                if let Ok(snapshot) = self.dispatch.snapshot().await {
                    self.recorder.metrics().set_ledger_size(snapshot.ledger_size);
                }
                let handled = dispositions.iter().filter(|d| d.outcome.handled()).count();
                Ok(AdminResponse::Dispatched {
                    handled,
                    dispositions: dispositions
                        .into_iter()
                        .map(|d| OfferDisposition {
                            outcome: d.outcome.state_name().to_string(),
                            detail: outcome_detail(&d.outcome),
                            offer_id: d.offer_id,
                        })
                        .collect(),
                })
            }
            AdminRequest::UpdateSettings(patch) => {
                let changed = self.settings.apply_patch(&patch)?;
                if !changed.is_empty() {
                    info!(keys = ?changed, "settings updated");
                }
                Ok(AdminResponse::SettingsUpdated(changed))
            }
            AdminRequest::TestTelegram {
                token,
                chat_id,
                message,
            } => self.test_telegram(token, chat_id, message).await,
        }
    }

    async fn status(&self) -> Result<AdminResponse> {
        let snapshot = self.dispatch.snapshot().await?;
        let settings = self.settings.snapshot();
        Ok(AdminResponse::Status(AdminStatus {
            run_id: self.run_id.clone(),
            monitoring_active: settings.monitoring_active,
            offers_detected: snapshot.stats.offers_detected,
            notified: snapshot.stats.notified,
            accepted: snapshot.stats.accepted,
            accept_failed: snapshot.stats.accept_failed,
            ledger_size: snapshot.ledger_size,
            last_check_time: snapshot.stats.last_check_at.map(|t| t.to_rfc3339()),
            last_offer_time: snapshot.stats.last_offer_at.map(|t| t.to_rfc3339()),
            polling_active: settings.polling_enabled(),
            p2p_rate: self.rates.rate(),
        }))
    }

    // Supplied credentials are used as-is and never saved.
    async fn test_telegram(
        &self,
        token: Option<String>,
        chat_id: Option<String>,
        message: Option<String>,
    ) -> Result<AdminResponse> {
        let saved = self.settings.snapshot();
        let token = token.unwrap_or(saved.telegram_token);
        let chat_id = chat_id.unwrap_or(saved.telegram_chat_id);
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return Ok(AdminResponse::Telegram {
                ok: false,
                description: Some("telegram token or chat id not set".to_string()),
            });
        }

        let notice = test_notice(message.as_deref());
        match self
            .telegram
            .send_message(token.trim(), chat_id.trim(), &notice.markdown(), &[])
            .await
        {
            Ok(report) => {
                info!(ok = report.ok, "test telegram message sent");
                Ok(AdminResponse::Telegram {
                    ok: report.ok,
                    description: report.description,
                })
            }
            Err(err) => {
                warn!(error = %err, "test telegram message failed");
                Ok(AdminResponse::Telegram {
                    ok: false,
                    description: Some(err.to_string()),
                })
            }
        }
    }
}
