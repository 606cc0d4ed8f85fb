use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dispatch::{spawn_dispatcher, Coordinator, DispatchOutcome};
use execution::{AcceptExecutor, AcceptMode, AcceptResult};
use filters::Rejection;
use notify::{ChannelKind, Notice, NoticeKind, NotificationChannel, SenderError};
use offers::OfferRecord;
use settings::{Settings, SettingsHandle};

struct RecordingChannel {
    kind: ChannelKind,
    fail: bool,
    sent: Mutex<Vec<Notice>>,
}

impl RecordingChannel {
    fn new(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn failing(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn kinds(&self) -> Vec<NoticeKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn enabled(&self, settings: &Settings) -> bool {
        match self.kind {
            ChannelKind::Desktop => settings.chrome_notifications,
            ChannelKind::Telegram => settings.telegram_notifications,
        }
    }

    async fn send(&self, notice: &Notice, _settings: &Settings) -> Result<(), SenderError> {
        self.sent.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(SenderError::SendFailed("boom".into()));
        }
        Ok(())
    }
}

struct ScriptedExecutor {
    succeed: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AcceptExecutor for ScriptedExecutor {
    async fn execute(&self, offer_id: &str) -> AcceptResult {
        self.calls.lock().unwrap().push(offer_id.to_string());
        if self.succeed {
            AcceptResult::succeeded("accepted on page")
        } else {
            AcceptResult::failed("accept button not found")
        }
    }
}

fn base_settings() -> Settings {
    Settings {
        monitoring_active: true,
        auto_accept_enabled: false,
        payment_methods: "instapay".into(),
        min_amount: 5.0,
        max_amount: Some(100.0),
        chrome_notifications: true,
        telegram_notifications: false,
        ..Settings::default()
    }
}

fn a1() -> OfferRecord {
    OfferRecord::new("a1", 20.0).with_payment_method("InstaPay")
}

struct Rig {
    coordinator: Coordinator,
    desktop: Arc<RecordingChannel>,
    telegram: Arc<RecordingChannel>,
    executor: Arc<ScriptedExecutor>,
}

fn rig(accept_succeeds: bool) -> Rig {
    let desktop = RecordingChannel::new(ChannelKind::Desktop);
    let telegram = RecordingChannel::new(ChannelKind::Telegram);
    let executor = ScriptedExecutor::new(accept_succeeds);
    let coordinator = Coordinator::new(executor.clone())
        .with_channel(desktop.clone())
        .with_channel(telegram.clone());
    Rig {
        coordinator,
        desktop,
        telegram,
        executor,
    }
}

#[tokio::test]
async fn matching_offer_notifies_desktop_only() {
    let mut rig = rig(true);
    let outcome = rig.coordinator.process_offer(&a1(), &base_settings()).await;

    assert_eq!(
        outcome,
        DispatchOutcome::NotifyDispatched {
            delivered: vec![ChannelKind::Desktop]
        }
    );
    assert!(rig.coordinator.ledger().has("a1"));
    assert_eq!(rig.desktop.kinds(), vec![NoticeKind::NewOffer]);
    assert!(rig.telegram.kinds().is_empty());
    assert!(rig.executor.calls().is_empty());
}

#[tokio::test]
async fn resubmitted_offer_is_duplicate_without_channel_calls() {
    let mut rig = rig(true);
    let settings = base_settings();
    rig.coordinator.process_offer(&a1(), &settings).await;

    let outcome = rig.coordinator.process_offer(&a1(), &settings).await;

    assert_eq!(outcome, DispatchOutcome::Duplicate);
    assert_eq!(rig.desktop.kinds().len(), 1);
    assert_eq!(rig.coordinator.ledger().len(), 1);
    assert_eq!(rig.coordinator.stats().offers_detected, 1);
}

#[tokio::test]
async fn auto_accept_replaces_new_offer_notice() {
    let mut rig = rig(true);
    let settings = Settings {
        auto_accept_enabled: true,
        manual_balance: 50.0,
        ..base_settings()
    };

    let outcome = rig.coordinator.process_offer(&a1(), &settings).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Accepted {
            mode: AcceptMode::Auto,
            detail: "accepted on page".into()
        }
    );
    assert_eq!(rig.executor.calls(), vec!["a1"]);
    assert!(rig.coordinator.ledger().has("a1"));
    assert_eq!(rig.desktop.kinds(), vec![NoticeKind::AcceptOutcome]);
    assert_eq!(rig.coordinator.stats().accepted, 1);
}

#[tokio::test]
async fn failed_auto_accept_keeps_the_id_consumed() {
    let mut rig = rig(false);
    let settings = Settings {
        auto_accept_enabled: true,
        manual_balance: 50.0,
        telegram_notifications: true,
        ..base_settings()
    };

    let outcome = rig.coordinator.process_offer(&a1(), &settings).await;
    assert!(matches!(outcome, DispatchOutcome::AcceptFailed { mode: AcceptMode::Auto, .. }));
    assert!(rig.coordinator.ledger().has("a1"));
    assert_eq!(
        rig.telegram.kinds(),
        vec![NoticeKind::AcceptAttempt, NoticeKind::AcceptOutcome]
    );
    assert_eq!(rig.desktop.kinds(), vec![NoticeKind::AcceptOutcome]);

    let again = rig.coordinator.process_offer(&a1(), &settings).await;
    assert_eq!(again, DispatchOutcome::Duplicate);
    assert_eq!(rig.executor.calls().len(), 1);
}

#[tokio::test]
async fn offer_below_minimum_is_ignored_and_re_evaluable() {
    let mut rig = rig(true);
    let offer = OfferRecord::new("a2", 2.0).with_payment_method("InstaPay");

    let outcome = rig.coordinator.process_offer(&offer, &base_settings()).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Ignored {
            reason: Rejection::AmountOutOfRange
        }
    );
    assert!(!rig.coordinator.ledger().has("a2"));

    let widened = Settings {
        min_amount: 1.0,
        ..base_settings()
    };
    let later = rig.coordinator.process_offer(&offer, &widened).await;
    assert!(matches!(later, DispatchOutcome::NotifyDispatched { .. }));
}

#[tokio::test]
async fn both_channels_yield_a_single_mark() {
    let mut rig = rig(true);
    let settings = Settings {
        telegram_notifications: true,
        ..base_settings()
    };

    let outcome = rig.coordinator.process_offer(&a1(), &settings).await;

    assert_eq!(
        outcome,
        DispatchOutcome::NotifyDispatched {
            delivered: vec![ChannelKind::Desktop, ChannelKind::Telegram]
        }
    );
    assert_eq!(rig.coordinator.ledger().len(), 1);
    assert_eq!(rig.coordinator.stats().notified, 1);
}

#[tokio::test]
async fn failing_channel_does_not_block_the_other() {
    let desktop = RecordingChannel::failing(ChannelKind::Desktop);
    let telegram = RecordingChannel::new(ChannelKind::Telegram);
    let mut coordinator = Coordinator::new(ScriptedExecutor::new(true))
        .with_channel(desktop.clone())
        .with_channel(telegram.clone());
    let settings = Settings {
        telegram_notifications: true,
        ..base_settings()
    };

    let outcome = coordinator.process_offer(&a1(), &settings).await;

    assert_eq!(
        outcome,
        DispatchOutcome::NotifyDispatched {
            delivered: vec![ChannelKind::Telegram]
        }
    );
    assert!(coordinator.ledger().has("a1"));
}

#[tokio::test]
async fn undelivered_offer_stays_unmarked() {
    let desktop = RecordingChannel::failing(ChannelKind::Desktop);
    let mut coordinator = Coordinator::new(ScriptedExecutor::new(true)).with_channel(desktop.clone());

    let outcome = coordinator.process_offer(&a1(), &base_settings()).await;

    assert_eq!(outcome, DispatchOutcome::NotifyDispatched { delivered: vec![] });
    assert!(!coordinator.ledger().has("a1"));
    let retry = coordinator.process_offer(&a1(), &base_settings()).await;
    assert!(matches!(retry, DispatchOutcome::NotifyDispatched { .. }));
    assert_eq!(desktop.kinds().len(), 2);
}

#[tokio::test]
async fn batch_is_processed_in_order() {
    let mut rig = rig(true);
    let batch = vec![
        a1(),
        a1(),
        OfferRecord::new("a2", 2.0),
        OfferRecord::new("", 10.0),
    ];

    let dispositions = rig.coordinator.process_batch(batch, &base_settings()).await;

    let states: Vec<&str> = dispositions.iter().map(|d| d.outcome.state_name()).collect();
    assert_eq!(states, vec!["NOTIFY_DISPATCHED", "DUPLICATE", "IGNORED", "IGNORED"]);
    assert_eq!(
        dispositions[3].outcome,
        DispatchOutcome::Ignored {
            reason: Rejection::MalformedOffer
        }
    );
    assert!(rig.coordinator.stats().last_check_at.is_some());
}

#[tokio::test]
async fn inactive_monitoring_dispatches_nothing() {
    let mut rig = rig(true);
    let settings = Settings {
        monitoring_active: false,
        auto_accept_enabled: true,
        manual_balance: 50.0,
        ..base_settings()
    };

    let outcome = rig.coordinator.process_offer(&a1(), &settings).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Ignored {
            reason: Rejection::MonitoringInactive
        }
    );
    assert!(rig.desktop.kinds().is_empty());
    assert!(rig.executor.calls().is_empty());
}

#[tokio::test]
async fn remote_accept_marks_and_skips_already_accepted() {
    let mut rig = rig(true);
    let settings = base_settings();

    let first = rig.coordinator.remote_accept("r1", &settings).await;
    assert_eq!(
        first,
        DispatchOutcome::Accepted {
            mode: AcceptMode::Remote,
            detail: "accepted on page".into()
        }
    );
    assert!(rig.coordinator.ledger().has("r1"));

    let second = rig.coordinator.remote_accept("r1", &settings).await;
    assert_eq!(second, DispatchOutcome::Duplicate);
    assert_eq!(rig.executor.calls(), vec!["r1"]);
}

#[tokio::test]
async fn remote_accept_of_notified_offer_is_forwarded() {
    let mut rig = rig(false);
    let settings = base_settings();
    rig.coordinator.process_offer(&a1(), &settings).await;

    let outcome = rig.coordinator.remote_accept("a1", &settings).await;

    assert!(matches!(outcome, DispatchOutcome::AcceptFailed { mode: AcceptMode::Remote, .. }));
    assert!(rig.coordinator.ledger().has("a1"));
    let retry = rig.coordinator.remote_accept("a1", &settings).await;
    assert!(matches!(retry, DispatchOutcome::AcceptFailed { .. }));
    assert_eq!(rig.executor.calls().len(), 2);
}

#[tokio::test]
async fn actor_serializes_commands_against_current_settings() {
    let rig = rig(true);
    let settings = SettingsHandle::new(base_settings());
    let (handle, task) = spawn_dispatcher(rig.coordinator, settings.clone());

    let first = handle.submit(vec![a1()]).await.expect("actor should reply");
    assert_eq!(first[0].outcome.state_name(), "NOTIFY_DISPATCHED");

    settings.pause();
    let paused = handle
        .submit(vec![OfferRecord::new("a3", 20.0).with_payment_method("InstaPay")])
        .await
        .expect("actor should reply");
    assert_eq!(paused[0].outcome.state_name(), "IGNORED");

    let snapshot = handle.snapshot().await.expect("actor should reply");
    assert_eq!(snapshot.ledger_size, 1);
    assert_eq!(snapshot.stats.offers_detected, 2);

    drop(handle);
    task.await.expect("actor should stop cleanly");
}

#[test]
fn outcomes_serialize_with_state_tag() {
    let value = serde_json::to_value(DispatchOutcome::Ignored {
        reason: Rejection::AmountOutOfRange,
    })
    .expect("outcome should serialize");
    assert_eq!(
        value,
        serde_json::json!({"state": "IGNORED", "reason": "amount_out_of_range"})
    );
}

#[tokio::test]
async fn reset_clears_counters_but_keeps_dedup() {
    let rig = rig(true);
    let settings = SettingsHandle::new(base_settings());
    let (handle, task) = spawn_dispatcher(rig.coordinator, settings);

    handle.submit(vec![a1()]).await.expect("actor should reply");
    let reset = handle.reset_stats().await.expect("actor should reply");
    assert_eq!(reset.stats.offers_detected, 0);
    assert_eq!(reset.stats.notified, 0);
    assert_eq!(reset.ledger_size, 1);

    let again = handle.submit(vec![a1()]).await.expect("actor should reply");
    assert_eq!(again[0].outcome, DispatchOutcome::Duplicate);
    let snapshot = handle.snapshot().await.expect("actor should reply");
    assert_eq!(snapshot.stats.offers_detected, 0);

    drop(handle);
    task.await.expect("actor should stop cleanly");
}
