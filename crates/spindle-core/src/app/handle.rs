//! Handle - 結果のポーリングと型付き submit
//!
//! `TaskHandle` は id だけを持ち、読むたびに store を引きます。

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::status::TaskStatus;
use crate::domain::{SpindleError, TaskId, TaskState};
use crate::queue::Engine;
use crate::typed::{Task, TaskDefinition};

/// Handle to one submitted task.
///
/// Every read takes the store lock, so each call sees a consistent record.
/// Unknown ids (e.g. from another process) read as PENDING.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    engine: Engine,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, engine: Engine) -> Self {
        Self { id, engine }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn state(&self) -> TaskState {
        self.engine
            .with_record(self.id, |r| r.state)
            .await
            .unwrap_or(TaskState::Pending)
    }

    /// Success value, once the task succeeded.
    pub async fn result(&self) -> Option<serde_json::Value> {
        self.engine
            .with_record(self.id, |r| r.result.clone())
            .await
            .flatten()
    }

    pub async fn info(&self) -> Option<String> {
        self.engine
            .with_record(self.id, |r| r.info.clone())
            .await
            .flatten()
    }

    pub async fn retries(&self) -> u32 {
        self.engine
            .with_record(self.id, |r| r.retries)
            .await
            .unwrap_or(0)
    }

    pub async fn cancel(&self) -> bool {
        self.engine.cancel(self.id).await
    }

    pub async fn status(&self) -> TaskStatus {
        let id = self.id;
        match self
            .engine
            .with_record(id, |r| TaskStatus::from_record(id, Some(r)))
            .await
        {
            Some(status) => status,
            None => TaskStatus::from_record(id, None),
        }
    }

    /// Poll every `interval` until the task reaches a terminal state.
    ///
    /// Never returns for an unknown id; wrap in `tokio::time::timeout`.
    pub async fn wait(&self, interval: Duration) -> TaskState {
        loop {
            let state = self.state().await;
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(interval).await;
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

/// Typed submission reference for a registered `T`.
pub struct TaskRef<T: Task> {
    definition: Arc<TaskDefinition>,
    engine: Engine,
    _marker: PhantomData<fn(T)>,
}

impl<T: Task> TaskRef<T> {
    pub(crate) fn new(definition: Arc<TaskDefinition>, engine: Engine) -> Self {
        Self {
            definition,
            engine,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub async fn submit(&self, args: T) -> Result<TaskHandle, SpindleError> {
        let args = serde_json::to_value(&args)?;
        self.engine
            .enqueue(Arc::clone(&self.definition), args)
            .await
    }
}

impl<T: Task> Clone for TaskRef<T> {
    fn clone(&self) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            engine: self.engine.clone(),
            _marker: PhantomData,
        }
    }
}
