//! Authentication-to-execution pipeline and its bounded worker pool
//!
//! A delivery moves through
//! `Received -> Authenticated -> Resolved -> Executing -> Done`,
//! or stops early at `Rejected` or `SkippedNoScript`. Everything up to
//! `Resolved` runs on the request task; execution runs on a worker. Nothing is
//! retried.

use axum::body::Bytes;
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::HookConfig;
use crate::error::HookError;
use crate::executor::{
    ExecutionResult, ExecutionStatus, ScriptExecutor, ScriptJob, wait_for_shutdown,
};
use crate::provider::{Provider, WebhookRequest, user_agent};
use crate::script::{ResolveError, ScriptTarget};

const RESULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Authenticated,
    Resolved,
    Executing,
    Done,
    Rejected,
    SkippedNoScript,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchState::Done | DispatchState::Rejected | DispatchState::SkippedNoScript
        )
    }
}

/// What the request task learned before handing off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Script found and queued for a worker
    Queued { id: String, path: PathBuf },
    /// Authenticated, but no script is configured for this repo and event
    SkippedNoScript { id: String, path: PathBuf },
}

fn transition(id: &str, state: DispatchState) {
    debug!(delivery = id, state = ?state, terminal = state.is_terminal(), "Dispatch state");
}

/// One async mutex per repository, created on first use.
#[derive(Default)]
struct RepoLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    fn get(&self, repo: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(repo.to_string()).or_default())
    }
}

pub struct Dispatcher {
    config: Arc<HookConfig>,
    sender: mpsc::Sender<ScriptJob>,
    results: broadcast::Sender<ExecutionResult>,
    shutdown: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start `dispatch.workers` workers behind a queue of
    /// `dispatch.queue_capacity` jobs. Must be called inside a tokio runtime.
    pub fn start(config: Arc<HookConfig>) -> Self {
        let (sender, receiver) = mpsc::channel(config.dispatch.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let executor = ScriptExecutor::new(config.script.launcher.clone());
        let repo_locks = config
            .dispatch
            .serialize_per_repo
            .then(|| Arc::new(RepoLocks::default()));

        let workers = (0..config.dispatch.workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    receiver: Arc::clone(&receiver),
                    executor: executor.clone(),
                    results: results.clone(),
                    shutdown: shutdown.subscribe(),
                    repo_locks: repo_locks.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            "Dispatcher started with {} workers, queue capacity {}{}",
            config.dispatch.workers,
            config.dispatch.queue_capacity,
            if config.dispatch.serialize_per_repo {
                ", serialized per repo"
            } else {
                ""
            }
        );

        Self {
            config,
            sender,
            results,
            shutdown,
            workers: StdMutex::new(workers),
        }
    }

    /// Receive finished executions. Results are not kept anywhere else.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionResult> {
        self.results.subscribe()
    }

    /// Take a delivery straight from HTTP parts.
    ///
    /// The agent is checked before the event header or body is looked at, so
    /// a foreign caller gets an identity rejection whatever else is wrong.
    pub fn receive(
        &self,
        provider: Provider,
        repo: String,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<DispatchOutcome, HookError> {
        let id = Uuid::now_v7().to_string();
        transition(&id, DispatchState::Received);

        let parsed = provider
            .verify_agent(self.config.provider(provider), user_agent(headers))
            .and_then(|()| provider.parse_request(repo, headers, body));
        match parsed {
            Ok(request) => self.process(id, request),
            Err(e) => {
                transition(&id, DispatchState::Rejected);
                Err(e)
            }
        }
    }

    /// Authenticate, resolve, and queue one delivery.
    ///
    /// Returns as soon as the job is queued; the script's outcome never
    /// reaches the caller.
    pub fn dispatch(&self, request: WebhookRequest) -> Result<DispatchOutcome, HookError> {
        let id = Uuid::now_v7().to_string();
        transition(&id, DispatchState::Received);
        self.process(id, request)
    }

    fn process(&self, id: String, request: WebhookRequest) -> Result<DispatchOutcome, HookError> {
        if let Err(e) = request.authenticate(&self.config) {
            transition(&id, DispatchState::Rejected);
            return Err(e);
        }
        transition(&id, DispatchState::Authenticated);

        let target =
            match ScriptTarget::new(&self.config.script.path, &request.repo, &request.event) {
                Ok(target) => target,
                Err(e) => {
                    warn!("Delivery {} from {} rejected: {}", id, request.provider, e);
                    transition(&id, DispatchState::Rejected);
                    return Err(HookError::InvalidScriptTarget(e.to_string()));
                }
            };

        let path = match target.locate() {
            Ok(path) => path,
            Err(ResolveError::NotFound(path)) => {
                info!(
                    "No script for {} repo '{}' event '{}' at '{}', skipping",
                    request.provider,
                    request.repo,
                    request.event,
                    path.display()
                );
                transition(&id, DispatchState::SkippedNoScript);
                return Ok(DispatchOutcome::SkippedNoScript { id, path });
            }
            Err(e) => {
                transition(&id, DispatchState::Rejected);
                return Err(HookError::InvalidScriptTarget(e.to_string()));
            }
        };
        transition(&id, DispatchState::Resolved);

        let job = ScriptJob {
            id: id.clone(),
            provider: request.provider,
            repo: request.repo,
            event: request.event,
            path: path.clone(),
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                info!("Delivery {} queued '{}'", id, path.display());
                Ok(DispatchOutcome::Queued { id, path })
            }
            Err(TrySendError::Full(job)) => {
                warn!(
                    "Dispatch queue full ({} slots), dropping delivery {} for '{}'",
                    self.config.dispatch.queue_capacity, job.id, job.repo
                );
                transition(&id, DispatchState::Rejected);
                Err(HookError::QueueFull(job.repo))
            }
            Err(TrySendError::Closed(job)) => {
                error!("Dispatcher is shut down, dropping delivery {}", job.id);
                transition(&id, DispatchState::Rejected);
                Err(HookError::QueueFull(job.repo))
            }
        }
    }

    /// Signal workers to stop and wait for them. Running scripts are not killed.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Dispatch worker ended abnormally: {}", e);
            }
        }
        info!("Dispatcher stopped");
    }
}

struct Worker {
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ScriptJob>>>,
    executor: ScriptExecutor,
    results: broadcast::Sender<ExecutionResult>,
    shutdown: watch::Receiver<bool>,
    repo_locks: Option<Arc<RepoLocks>>,
}

impl Worker {
    async fn run(mut self) {
        debug!("Dispatch worker {} started", self.index);
        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut self.shutdown) => None,
                    job = receiver.recv() => job,
                }
            };
            let Some(job) = job else {
                break;
            };

            let result = self.run_job(&job).await;
            transition(&job.id, DispatchState::Done);
            let interrupted = result.status == ExecutionStatus::Interrupted;
            let _ = self.results.send(result);
            if interrupted {
                break;
            }
        }
        debug!("Dispatch worker {} stopped", self.index);
    }

    async fn run_job(&mut self, job: &ScriptJob) -> ExecutionResult {
        let _guard = match &self.repo_locks {
            Some(locks) => {
                let lock = locks.get(&job.repo);
                tokio::select! {
                    guard = lock.lock_owned() => Some(guard),
                    _ = wait_for_shutdown(&mut self.shutdown) => {
                        warn!("Job {} - interrupted while waiting for repo '{}'", job.id, job.repo);
                        return ExecutionResult::interrupted(job);
                    }
                }
            }
            None => None,
        };

        transition(&job.id, DispatchState::Executing);
        self.executor.execute(job, &mut self.shutdown).await
    }
}
