//! Per-offer dispatch: dedup, auto-accept, filter, notify.
//!
//! A [`Coordinator`] owns the ledger and must only be driven by one task at a time;
//! [`spawn_dispatcher`] wraps it in an actor so the scrape path and the remote
//! command path share it without locking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use execution::{AcceptExecutor, AcceptMode, AcceptResult};
use filters::{evaluate_auto_accept, evaluate_filter, Rejection, Verdict};
use ledger::DedupLedger;
use notify::notice::{accept_attempt_notice, accept_outcome_notice, new_offer_notice};
use notify::{ChannelKind, Notice, NotificationChannel};
use offers::OfferRecord;
use rates::RateHandle;
use serde::Serialize;
use settings::Settings;
use tracing::{debug, info, warn};

mod actor;

pub use actor::{spawn_dispatcher, DispatchCommand, DispatchError, DispatchHandle};

/// Terminal state of one offer (or one remote accept command).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    Duplicate,
    Ignored { reason: Rejection },
    Accepted { mode: AcceptMode, detail: String },
    AcceptFailed { mode: AcceptMode, detail: String },
    NotifyDispatched { delivered: Vec<ChannelKind> },
}

impl DispatchOutcome {
    pub fn state_name(&self) -> &'static str {
        match self {
            DispatchOutcome::Duplicate => "DUPLICATE",
            DispatchOutcome::Ignored { .. } => "IGNORED",
            DispatchOutcome::Accepted { .. } => "ACCEPTED",
            DispatchOutcome::AcceptFailed { .. } => "ACCEPT_FAILED",
            DispatchOutcome::NotifyDispatched { .. } => "NOTIFY_DISPATCHED",
        }
    }

    /// Notified or accept attempted.
    pub fn handled(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Accepted { .. }
                | DispatchOutcome::AcceptFailed { .. }
                | DispatchOutcome::NotifyDispatched { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disposition {
    pub offer_id: String,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub offers_detected: u64,
    pub notified: u64,
    pub accepted: u64,
    pub accept_failed: u64,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_offer_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub stats: SessionStats,
    pub ledger_size: usize,
    pub ledger_capacity: usize,
}

pub struct Coordinator {
    ledger: DedupLedger,
    accepted: DedupLedger,
    channels: Vec<Arc<dyn NotificationChannel>>,
    executor: Arc<dyn AcceptExecutor>,
    rates: Option<RateHandle>,
    stats: SessionStats,
}

impl Coordinator {
    pub fn new(executor: Arc<dyn AcceptExecutor>) -> Self {
        Self {
            ledger: DedupLedger::new(),
            accepted: DedupLedger::new(),
            channels: Vec::new(),
            executor,
            rates: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger = DedupLedger::with_capacity(capacity);
        self.accepted = DedupLedger::with_capacity(capacity);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_rates(mut self, rates: RateHandle) -> Self {
        self.rates = Some(rates);
        self
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            stats: self.stats.clone(),
            ledger_size: self.ledger.len(),
            ledger_capacity: self.ledger.capacity(),
        }
    }

    /// Zeroes this session's counters. The ledger is kept, so already-seen offers
    /// stay duplicates.
    pub fn reset_stats(&mut self) {
        self.stats = SessionStats::default();
        info!("session counters reset");
    }

    /// Processes a scrape batch strictly in order, so each offer sees the marks left
    /// by the ones before it.
    pub async fn process_batch(
        &mut self,
        offers: Vec<OfferRecord>,
        settings: &Settings,
    ) -> Vec<Disposition> {
        self.stats.last_check_at = Some(Utc::now());
        let mut dispositions = Vec::with_capacity(offers.len());
        for offer in offers {
            let outcome = self.process_offer(&offer, settings).await;
            dispositions.push(Disposition {
                offer_id: offer.id,
                outcome,
            });
        }
        dispositions
    }

    pub async fn process_offer(&mut self, offer: &OfferRecord, settings: &Settings) -> DispatchOutcome {
        if let Err(err) = offer.validate() {
            warn!(error = %err, "invalid offer structure");
            return DispatchOutcome::Ignored {
                reason: Rejection::MalformedOffer,
            };
        }
        if self.ledger.has(&offer.id) {
            debug!(offer_id = %offer.id, "duplicate offer");
            return DispatchOutcome::Duplicate;
        }

        self.stats.offers_detected += 1;
        self.stats.last_offer_at = Some(offer.timestamp);

        match evaluate_auto_accept(offer, settings, &self.ledger) {
            Verdict::Pass => {
                info!(offer_id = %offer.id, amount = offer.amount, "offer meets auto-accept criteria");
                let attempt = accept_attempt_notice(offer);
                self.broadcast(&attempt, settings, Some(ChannelKind::Telegram))
                    .await;
                return self.attempt_accept(&offer.id, AcceptMode::Auto, settings).await;
            }
            Verdict::Reject(reason) => {
                if settings.auto_accept_enabled {
                    debug!(offer_id = %offer.id, %reason, "not auto-accepted");
                }
            }
        }

        match evaluate_filter(offer, settings) {
            Verdict::Pass => self.notify_new_offer(offer, settings).await,
            Verdict::Reject(reason) => {
                debug!(offer_id = %offer.id, %reason, "offer ignored");
                DispatchOutcome::Ignored { reason }
            }
        }
    }

    /// Handles an `ACCEPT_OFFER` command from the bot server. Ids already accepted
    /// this session are skipped; anything else is forwarded because the user asked
    /// for it explicitly.
    pub async fn remote_accept(&mut self, offer_id: &str, settings: &Settings) -> DispatchOutcome {
        if self.accepted.has(offer_id) {
            info!(offer_id, "remote accept skipped, offer already accepted");
            return DispatchOutcome::Duplicate;
        }
        self.attempt_accept(offer_id, AcceptMode::Remote, settings)
            .await
    }

    // The id is marked before the executor runs and stays marked whatever the
    // result, for both modes.
    async fn attempt_accept(
        &mut self,
        offer_id: &str,
        mode: AcceptMode,
        settings: &Settings,
    ) -> DispatchOutcome {
        self.ledger.add(offer_id);
        info!(offer_id, mode = mode.label(), "attempting accept");
        let result: AcceptResult = self.executor.execute(offer_id).await;

        let outcome = if result.success {
            self.accepted.add(offer_id);
            self.stats.accepted += 1;
            info!(offer_id, mode = mode.label(), detail = %result.detail, "accept succeeded");
            DispatchOutcome::Accepted {
                mode,
                detail: result.detail.clone(),
            }
        } else {
            self.stats.accept_failed += 1;
            warn!(offer_id, mode = mode.label(), detail = %result.detail, "accept failed");
            DispatchOutcome::AcceptFailed {
                mode,
                detail: result.detail.clone(),
            }
        };

        let notice = accept_outcome_notice(offer_id, mode, &result);
        self.broadcast(&notice, settings, None).await;
        outcome
    }

    async fn notify_new_offer(&mut self, offer: &OfferRecord, settings: &Settings) -> DispatchOutcome {
        let notice = new_offer_notice(offer, self.egp_rate(settings));
        let mut delivered = Vec::new();
        for channel in &self.channels {
            if !channel.enabled(settings) {
                continue;
            }
            match channel.send(&notice, settings).await {
                Ok(()) => {
                    // first success marks; later ones are no-ops
                    self.ledger.add(offer.id.as_str());
                    delivered.push(channel.kind());
                }
                Err(err) => warn!(
                    offer_id = %offer.id,
                    channel = channel.kind().as_str(),
                    error = %err,
                    "notification failed"
                ),
            }
        }
        if !delivered.is_empty() {
            self.stats.notified += 1;
        }
        info!(offer_id = %offer.id, delivered = delivered.len(), "new offer dispatched");
        DispatchOutcome::NotifyDispatched { delivered }
    }

    async fn broadcast(
        &self,
        notice: &Notice,
        settings: &Settings,
        only: Option<ChannelKind>,
    ) -> Vec<ChannelKind> {
        let mut delivered = Vec::new();
        for channel in &self.channels {
            if only.is_some_and(|kind| kind != channel.kind()) || !channel.enabled(settings) {
                continue;
            }
            match channel.send(notice, settings).await {
                Ok(()) => delivered.push(channel.kind()),
                Err(err) => warn!(
                    channel = channel.kind().as_str(),
                    kind = ?notice.kind,
                    error = %err,
                    "notice delivery failed"
                ),
            }
        }
        delivered
    }

    fn egp_rate(&self, settings: &Settings) -> Option<f64> {
        if settings.usd_to_egp_rate.is_finite() && settings.usd_to_egp_rate > 0.0 {
            return Some(settings.usd_to_egp_rate);
        }
        self.rates.as_ref().and_then(RateHandle::rate)
    }
}
