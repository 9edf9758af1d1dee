//! Shared scaffolding for the end-to-end tests: an in-memory registry with
//! one project and one repository, plus push helpers.
#![allow(dead_code)]

use std::sync::Arc;

use dogma_internal::internal::command::{Command, CommandApplier, CommandEnvelope, CommandOutput};
use dogma_internal::internal::registry::ProjectRegistry;
use dogma_internal::internal::repo::Repo;
use dogma_internal::model::{Author, Change, CommitMessage, PushResult, Revision};

pub const PROJECT: &str = "p1";
pub const REPO: &str = "r1";

pub struct TestContext {
    pub registry: Arc<ProjectRegistry>,
    pub applier: Arc<CommandApplier>,
}

pub fn author() -> Author {
    Author::new("tester", "tester@example.com")
}

pub async fn setup() -> TestContext {
    let registry = Arc::new(ProjectRegistry::in_memory());
    let applier = CommandApplier::start(registry.clone());

    applier
        .submit(envelope(Command::CreateProject {
            name: PROJECT.to_string(),
        }))
        .await
        .expect("failed to create test project");
    applier
        .submit(envelope(Command::CreateRepository {
            project: PROJECT.to_string(),
            name: REPO.to_string(),
        }))
        .await
        .expect("failed to create test repository");

    TestContext { registry, applier }
}

pub fn envelope(command: Command) -> CommandEnvelope {
    CommandEnvelope {
        token: None,
        author: author(),
        command,
    }
}

impl TestContext {
    pub async fn repo(&self) -> Arc<Repo> {
        self.registry
            .repo(PROJECT, REPO)
            .await
            .expect("test repository missing")
    }

    /// Push one batch of changes against HEAD through the command applier.
    pub async fn push(
        &self,
        summary: &str,
        changes: Vec<Change>,
    ) -> Result<PushResult, dogma_internal::errors::DogmaError> {
        let output = self
            .applier
            .submit(envelope(Command::Push {
                project: PROJECT.to_string(),
                repo: REPO.to_string(),
                base: Revision::HEAD,
                message: CommitMessage::summary_only(summary),
                changes,
            }))
            .await?;
        match output {
            CommandOutput::Pushed(result) => Ok(result),
            other => panic!("unexpected command output: {other:?}"),
        }
    }
}
