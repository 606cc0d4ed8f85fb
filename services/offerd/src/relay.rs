use async_trait::async_trait;
use dispatch::{DispatchHandle, DispatchOutcome, Disposition};
use metrics::MetricsHandle;
use remote::{CommandSink, PollError, PollSummary};
use storage::Store;
use tracing::{info, warn};

/// Records every dispatch outcome in the metrics registry and the run's event log.
#[derive(Clone)]
pub struct Recorder {
    run_id: String,
    store: Store,
    metrics: MetricsHandle,
}

impl Recorder {
    pub fn new(run_id: String, store: Store, metrics: MetricsHandle) -> Self {
        Self {
            run_id,
            store,
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    pub async fn record(&self, source: &str, disposition: &Disposition) {
        let state = disposition.outcome.state_name();
        info!(offer_id = %disposition.offer_id, state, source, "offer outcome");
        self.metrics.record_offer(state);
        let payload = match serde_json::to_string(disposition) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = ?err, "failed to encode disposition");
                return;
            }
        };
        if let Err(err) = self
            .store
            .log_event(&self.run_id, source, "offer_outcome", &payload)
            .await
        {
            warn!(error = ?err, "failed to log offer outcome");
        }
    }

    pub async fn record_incident(&self, severity: &str, kind: &str, message: &str) {
        if let Err(err) = self
            .store
            .log_incident(&self.run_id, severity, kind, message)
            .await
        {
            warn!(error = ?err, kind, "failed to record incident");
        }
    }
}

/// Short human-readable detail for an outcome, if it has one.
pub fn outcome_detail(outcome: &DispatchOutcome) -> Option<String> {
    match outcome {
        DispatchOutcome::Duplicate => None,
        DispatchOutcome::Ignored { reason } => Some(reason.as_str().to_string()),
        DispatchOutcome::Accepted { detail, .. } | DispatchOutcome::AcceptFailed { detail, .. } => {
            Some(detail.clone()).filter(|d| !d.is_empty())
        }
        DispatchOutcome::NotifyDispatched { delivered } => Some(
            delivered
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// Routes bot-server commands into the dispatch actor.
pub struct DispatchSink {
    dispatch: DispatchHandle,
    recorder: Recorder,
}

impl DispatchSink {
    pub fn new(dispatch: DispatchHandle, recorder: Recorder) -> Self {
        Self { dispatch, recorder }
    }
}

#[async_trait]
impl CommandSink for DispatchSink {
    async fn accept_offer(&self, offer_id: &str) {
        info!(offer_id, "remote accept command received");
        match self.dispatch.remote_accept(offer_id).await {
            Ok(outcome) => {
                let disposition = Disposition {
                    offer_id: offer_id.to_string(),
                    outcome,
                };
                self.recorder.record("remote", &disposition).await;
                if let Ok(snapshot) = self.dispatch.snapshot().await {
                    self.recorder.metrics().set_ledger_size(snapshot.ledger_size);
                }
            }
            Err(err) => warn!(offer_id, error = %err, "remote accept not dispatched"),
        }
    }

    fn poll_completed(&self, result: Result<&PollSummary, &PollError>) {
        let label = match result {
            Ok(_) => "ok",
            Err(PollError::Status(_)) => "http_error",
            Err(PollError::Malformed(_)) => "malformed",
            Err(_) => "network_error",
        };
        self.recorder.metrics().record_poll(label);
    }
}
