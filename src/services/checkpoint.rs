use crate::core::io::Storage;
use crate::core::state::{Checkpoint, Step, WorkflowState};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, session: &str) -> Result<Option<Checkpoint>>;
    async fn put(&self, session: &str, state: &WorkflowState, next_step: Option<Step>)
        -> Result<()>;
}

/// One JSON document per session under the state folder.
pub struct FileCheckpointStore {
    state_folder: String,
    storage: Arc<dyn Storage>,
}

impl FileCheckpointStore {
    pub fn new(state_folder: &str, storage: Arc<dyn Storage>) -> Self {
        Self { state_folder: state_folder.to_string(), storage }
    }

    fn path_for(&self, session: &str) -> Result<String> {
        if session.is_empty()
            || session.contains(['/', '\\'])
            || session == "."
            || session == ".."
        {
            return Err(anyhow!("invalid session identifier: {:?}", session));
        }
        let path = Path::new(&self.state_folder).join(format!("{}.json", session));
        Ok(path.to_string_lossy().to_string())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, session: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(session)?;
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let content = self.storage.read_to_string(&path).await?;
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file {}", path))?;
        Ok(Some(checkpoint))
    }

    async fn put(
        &self,
        session: &str,
        state: &WorkflowState,
        next_step: Option<Step>,
    ) -> Result<()> {
        let path = self.path_for(session)?;
        let checkpoint = Checkpoint { state: state.clone(), next_step };
        let content = serde_json::to_string_pretty(&checkpoint)?;
        self.storage.write(&path, content.as_bytes()).await?;
        Ok(())
    }
}

/// Where a run enters the state machine, computed once from the checkpoint read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption {
    FreshStart,
    ResumeAtStep(Step, WorkflowState),
    /// A previous run quit cleanly; continue with its progress at a new cycle.
    ResumeFromCheckpointBoundary(WorkflowState),
}

impl Resumption {
    pub fn decide(saved: Option<Checkpoint>) -> Self {
        match saved {
            Some(Checkpoint { state, next_step }) if state.has_progressed() => match next_step {
                Some(step) => Resumption::ResumeAtStep(step, state),
                None => Resumption::ResumeFromCheckpointBoundary(state),
            },
            _ => Resumption::FreshStart,
        }
    }
}
