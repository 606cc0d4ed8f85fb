use offers::OfferRecord;
use settings::SettingsHandle;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Coordinator, Disposition, DispatchOutcome, SessionSnapshot};

const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch actor stopped")]
    Closed,
}

pub enum DispatchCommand {
    Batch {
        offers: Vec<OfferRecord>,
        reply: oneshot::Sender<Vec<Disposition>>,
    },
    RemoteAccept {
        offer_id: String,
        reply: oneshot::Sender<DispatchOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    ResetStats {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cloneable sender side of the dispatch actor.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchCommand>,
}

impl DispatchHandle {
    pub async fn submit(&self, offers: Vec<OfferRecord>) -> Result<Vec<Disposition>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchCommand::Batch { offers, reply }).await?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    pub async fn remote_accept(&self, offer_id: impl Into<String>) -> Result<DispatchOutcome, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchCommand::RemoteAccept {
            offer_id: offer_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    /// Returns the snapshot taken right after the reset.
    pub async fn reset_stats(&self) -> Result<SessionSnapshot, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchCommand::ResetStats { reply }).await?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    async fn send(&self, command: DispatchCommand) -> Result<(), DispatchError> {
        self.tx.send(command).await.map_err(|_| DispatchError::Closed)
    }
}

/// Moves `coordinator` onto its own task. Commands run one at a time to completion;
/// each captures the settings snapshot current when it starts.
pub fn spawn_dispatcher(
    mut coordinator: Coordinator,
    settings: SettingsHandle,
) -> (DispatchHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                DispatchCommand::Batch { offers, reply } => {
                    let snapshot = settings.snapshot();
                    debug!(count = offers.len(), "dispatching batch");
                    let dispositions = coordinator.process_batch(offers, &snapshot).await;
                    let _ = reply.send(dispositions);
                }
                DispatchCommand::RemoteAccept { offer_id, reply } => {
                    let snapshot = settings.snapshot();
                    let outcome = coordinator.remote_accept(&offer_id, &snapshot).await;
                    let _ = reply.send(outcome);
                }
                DispatchCommand::Snapshot { reply } => {
                    let _ = reply.send(coordinator.snapshot());
                }
                DispatchCommand::ResetStats { reply } => {
                    coordinator.reset_stats();
                    let _ = reply.send(coordinator.snapshot());
                }
            }
        }
        info!("dispatch actor stopped");
    });
    (DispatchHandle { tx }, task)
}
