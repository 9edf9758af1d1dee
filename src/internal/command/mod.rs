//! The command applier: every mutating operation, expressed as a value and
//! serialized through one in-process queue.
//!
//! A single consumer task executes commands in arrival order, so within one
//! node all registry transitions and all commits are totally ordered.
//! Commands may carry an idempotency token; the applier remembers recent
//! successful outputs by token, so a retried command returns its original
//! result instead of executing twice. Cross-node ordering belongs to an
//! external replicated log feeding this queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::errors::DogmaError;
use crate::internal::registry::ProjectRegistry;
use crate::model::{Author, Change, CommitMessage, Project, PushResult, Repository, Revision};

const QUEUE_DEPTH: usize = 256;
const RECENT_TOKENS: usize = 1024;

/// A mutating operation on the registry or a repository.
#[derive(Debug, Clone)]
pub enum Command {
    CreateProject { name: String },
    RemoveProject { name: String },
    UnremoveProject { name: String },
    PurgeProject { name: String },
    CreateRepository { project: String, name: String },
    RemoveRepository { project: String, name: String },
    UnremoveRepository { project: String, name: String },
    PurgeRepository { project: String, name: String },
    Push {
        project: String,
        repo: String,
        base: Revision,
        message: CommitMessage,
        changes: Vec<Change>,
    },
}

/// A command plus who issued it and an optional idempotency token.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub token: Option<Uuid>,
    pub author: Author,
    pub command: Command,
}

/// The result of a successfully applied command.
#[derive(Debug, Clone)]
pub enum CommandOutput {
    Project(Project),
    Repository(Repository),
    Pushed(PushResult),
    Done,
}

struct RecentOutputs {
    by_token: HashMap<Uuid, CommandOutput>,
    order: VecDeque<Uuid>,
}

impl RecentOutputs {
    fn new() -> RecentOutputs {
        RecentOutputs {
            by_token: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, token: &Uuid) -> Option<CommandOutput> {
        self.by_token.get(token).cloned()
    }

    fn remember(&mut self, token: Uuid, output: CommandOutput) {
        if self.by_token.insert(token, output).is_none() {
            self.order.push_back(token);
            while self.order.len() > RECENT_TOKENS {
                if let Some(evicted) = self.order.pop_front() {
                    self.by_token.remove(&evicted);
                }
            }
        }
    }
}

enum Job {
    Execute {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Result<CommandOutput, DogmaError>>,
    },
    Shutdown,
}

/// The process-wide write serializer. Created with [`CommandApplier::start`]
/// and torn down with [`CommandApplier::stop`].
pub struct CommandApplier {
    tx: mpsc::Sender<Job>,
    registry: Arc<ProjectRegistry>,
    running: AtomicBool,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CommandApplier {
    /// Spawn the applier loop over a registry.
    pub fn start(registry: Arc<ProjectRegistry>) -> Arc<CommandApplier> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(applier_loop(rx, registry.clone()));
        Arc::new(CommandApplier {
            tx,
            registry,
            running: AtomicBool::new(true),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    /// Submit a command and wait for its result.
    pub async fn submit(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<CommandOutput, DogmaError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(DogmaError::ShuttingDown);
        }
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Job::Execute { envelope, reply })
            .await
            .map_err(|_| DogmaError::ShuttingDown)?;
        response.await.map_err(|_| DogmaError::ShuttingDown)?
    }

    /// Refuse new commands, drain the queue and shut the registry down.
    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Job::Shutdown).await;
            let worker = self.worker.lock().expect("worker lock poisoned").take();
            if let Some(worker) = worker {
                let _ = worker.await;
            }
            self.registry.shutdown().await;
            tracing::info!("command applier stopped");
        }
    }
}

async fn applier_loop(mut rx: mpsc::Receiver<Job>, registry: Arc<ProjectRegistry>) {
    let mut recent = RecentOutputs::new();
    while let Some(job) = rx.recv().await {
        match job {
            Job::Shutdown => break,
            Job::Execute { envelope, reply } => {
                if let Some(token) = envelope.token
                    && let Some(output) = recent.get(&token)
                {
                    tracing::debug!(%token, "replayed idempotent command result");
                    let _ = reply.send(Ok(output));
                    continue;
                }
                let result = execute(&registry, envelope.author, envelope.command).await;
                if let (Some(token), Ok(output)) = (envelope.token, &result) {
                    recent.remember(token, output.clone());
                }
                let _ = reply.send(result);
            }
        }
    }
    // Anything still queued after shutdown is refused.
    while let Ok(job) = rx.try_recv() {
        if let Job::Execute { reply, .. } = job {
            let _ = reply.send(Err(DogmaError::ShuttingDown));
        }
    }
}

async fn execute(
    registry: &ProjectRegistry,
    author: Author,
    command: Command,
) -> Result<CommandOutput, DogmaError> {
    match command {
        Command::CreateProject { name } => registry
            .create_project(&name, author)
            .await
            .map(CommandOutput::Project),
        Command::RemoveProject { name } => registry
            .remove_project(&name)
            .await
            .map(|()| CommandOutput::Done),
        Command::UnremoveProject { name } => registry
            .unremove_project(&name)
            .await
            .map(CommandOutput::Project),
        Command::PurgeProject { name } => registry
            .purge_project(&name)
            .await
            .map(|()| CommandOutput::Done),
        Command::CreateRepository { project, name } => registry
            .create_repo(&project, &name, author)
            .await
            .map(CommandOutput::Repository),
        Command::RemoveRepository { project, name } => registry
            .remove_repo(&project, &name)
            .await
            .map(|()| CommandOutput::Done),
        Command::UnremoveRepository { project, name } => registry
            .unremove_repo(&project, &name)
            .await
            .map(CommandOutput::Repository),
        Command::PurgeRepository { project, name } => registry
            .purge_repo(&project, &name)
            .await
            .map(|()| CommandOutput::Done),
        Command::Push {
            project,
            repo,
            base,
            message,
            changes,
        } => {
            let engine = registry.repo(&project, &repo).await?;
            engine
                .push(base, author, message, changes)
                .await
                .map(CommandOutput::Pushed)
        }
    }
}
