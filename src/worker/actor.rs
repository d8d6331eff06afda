//! Worker task and its message channel.
//!
//! The worker lives on its own task and is only reached through
//! [`WorkerHandle`]. Lifecycle messages are processed in order; fetches are
//! answered concurrently on their own tasks.
//!
//! An update installs the new version on a background task while the
//! current worker keeps serving, then activates it and swaps it in.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::worker::{
    FetchRequest, FetchResponse, InstallReport, ServiceWorker, UpdateReport, WorkerStatus,
};

/// Pending messages the worker accepts before senders wait
pub const MAILBOX_CAPACITY: usize = 256;

// == Control Message ==
/// Messages a page may post to the worker. Fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Delete every cache partition
    ClearCache,
}

pub enum WorkerMessage {
    Install {
        reply: oneshot::Sender<Result<InstallReport>>,
    },
    Activate {
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Fetch {
        request: FetchRequest,
        reply: oneshot::Sender<FetchResponse>,
    },
    /// Replace the running worker with one for `version`
    Update {
        version: String,
        reply: oneshot::Sender<Result<UpdateReport>>,
    },
    Control(ControlMessage),
    Status {
        reply: oneshot::Sender<WorkerStatus>,
    },
}

// == Worker Handle ==
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    pub async fn install(&self) -> Result<InstallReport> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerMessage::Install { reply }).await?;
        response.await.map_err(|_| CacheError::WorkerUnavailable)?
    }

    pub async fn activate(&self) -> Result<Vec<String>> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerMessage::Activate { reply }).await?;
        response.await.map_err(|_| CacheError::WorkerUnavailable)?
    }

    /// Installs then activates right away, without waiting for old clients.
    pub async fn register(&self) -> Result<InstallReport> {
        let report = self.install().await?;
        let deleted = self.activate().await?;
        debug!("Registration removed {} stale partitions", deleted.len());
        Ok(report)
    }

    /// Runs a request through the worker. A dead worker yields the offline
    /// response like any other failure.
    pub async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        let (reply, response) = oneshot::channel();
        if self
            .send(WorkerMessage::Fetch { request, reply })
            .await
            .is_err()
        {
            return FetchResponse::offline();
        }
        response.await.unwrap_or_else(|_| FetchResponse::offline())
    }

    /// Installs `version` beside the running worker, then activates it. The
    /// old worker serves requests until the new one takes over.
    pub async fn update(&self, version: impl Into<String>) -> Result<UpdateReport> {
        let (reply, response) = oneshot::channel();
        let version = version.into();
        self.send(WorkerMessage::Update { version, reply }).await?;
        response.await.map_err(|_| CacheError::WorkerUnavailable)?
    }

    pub async fn post_message(&self, message: ControlMessage) -> Result<()> {
        self.send(WorkerMessage::Control(message)).await
    }

    pub async fn status(&self) -> Result<WorkerStatus> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerMessage::Status { reply }).await?;
        response.await.map_err(|_| CacheError::WorkerUnavailable)
    }

    async fn send(&self, message: WorkerMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| CacheError::WorkerUnavailable)
    }
}

// == Pending Update ==
struct PendingUpdate {
    worker: Arc<ServiceWorker>,
    install: JoinHandle<Result<InstallReport>>,
    reply: oneshot::Sender<Result<UpdateReport>>,
}

/// Resolves when the pending install finishes; never resolves without one.
async fn installed(pending: &mut Option<PendingUpdate>) -> Result<InstallReport> {
    match pending {
        Some(update) => match (&mut update.install).await {
            Ok(result) => result,
            Err(e) => Err(CacheError::Internal(format!("install task failed: {}", e))),
        },
        None => std::future::pending().await,
    }
}

// == Spawn ==
/// Starts the worker task. It runs until every handle is dropped.
pub fn spawn_worker(worker: Arc<ServiceWorker>) -> (WorkerHandle, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(MAILBOX_CAPACITY);

    let task = tokio::spawn(async move {
        info!("Worker task started");
        let mut worker = worker;
        let mut pending: Option<PendingUpdate> = None;

        loop {
            tokio::select! {
                message = receiver.recv() => {
                    let Some(message) = message else { break };
                    handle_message(&worker, &mut pending, message).await;
                }
                result = installed(&mut pending) => {
                    if let Some(update) = pending.take() {
                        if let Some(next) = promote(update, result).await {
                            worker = next;
                        }
                    }
                }
            }
        }

        info!("Worker task stopped");
    });

    (WorkerHandle { sender }, task)
}

async fn handle_message(
    worker: &Arc<ServiceWorker>,
    pending: &mut Option<PendingUpdate>,
    message: WorkerMessage,
) {
    match message {
        WorkerMessage::Install { reply } => {
            let _ = reply.send(worker.install().await);
        }
        WorkerMessage::Activate { reply } => {
            let _ = reply.send(worker.activate().await);
        }
        WorkerMessage::Fetch { request, reply } => {
            let worker = worker.clone();
            tokio::spawn(async move {
                let response = worker.handle_fetch(request).await;
                if reply.send(response).is_err() {
                    debug!("Fetch caller went away before the response");
                }
            });
        }
        WorkerMessage::Update { version, reply } => {
            if let Some(update) = pending.as_ref() {
                let _ = reply.send(Err(CacheError::InvalidState(format!(
                    "update to {} already in progress",
                    update.worker.config().version
                ))));
                return;
            }
            let next = match worker.successor(&version) {
                Ok(next) => Arc::new(next),
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            };
            info!("Updating worker {} -> {}", worker.config().version, version);
            let installing = next.clone();
            *pending = Some(PendingUpdate {
                worker: next,
                install: tokio::spawn(async move { installing.install().await }),
                reply,
            });
        }
        WorkerMessage::Control(ControlMessage::ClearCache) => {
            warn!("CLEAR_CACHE received");
            worker.clear_all().await;
        }
        WorkerMessage::Status { reply } => {
            let _ = reply.send(worker.status().await);
        }
    }
}

/// Activates an installed successor. Returns it when it should replace the
/// running worker.
async fn promote(
    update: PendingUpdate,
    installed: Result<InstallReport>,
) -> Option<Arc<ServiceWorker>> {
    let version = update.worker.config().version.clone();
    let outcome = match installed {
        Ok(install) => update
            .worker
            .activate()
            .await
            .map(|deleted| UpdateReport {
                version: version.clone(),
                install,
                deleted,
            }),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(report) => {
            info!("Worker {} took over", version);
            let _ = update.reply.send(Ok(report));
            Some(update.worker)
        }
        Err(e) => {
            warn!("Update to {} failed: {}", version, e);
            let names = update.worker.names();
            for name in [&names.static_name, &names.dynamic_name] {
                update.worker.storage().delete(name).await;
            }
            let _ = update.reply.send(Err(e));
            None
        }
    }
}
