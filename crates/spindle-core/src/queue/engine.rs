//! Execution engine: submission, leasing, completion and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::{Completion, Dispatch, Lease, TaskStore};
use super::worker::WorkerGroup;
use crate::app::{TaskCounts, TaskHandle, TaskRef};
use crate::config::EngineConfig;
use crate::domain::{SpindleError, TaskEvent, TaskId, TaskRecord, TaskResult, TaskState};
use crate::ports::{Clock, IdGenerator, UlidGenerator};
use crate::typed::{Task, TaskDefinition, TaskRegistry, task_name};

struct EngineInner {
    store: Mutex<TaskStore>,
    notify: Notify,
    registry: TaskRegistry,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    events: broadcast::Sender<TaskEvent>,
    open: AtomicBool,
    workers: std::sync::Mutex<Option<WorkerGroup>>,
}

/// Handle to a running engine. Cheap to clone.
///
/// Workers are spawned on construction and run until [`Engine::shutdown`].
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine reference, held by task contexts.
#[derive(Clone, Default)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl Engine {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub(crate) fn start(registry: TaskRegistry, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let ids = UlidGenerator::new(Arc::clone(&clock));
        let workers = config.max_workers;
        let engine = Engine {
            inner: Arc::new(EngineInner {
                store: Mutex::new(TaskStore::new(events.clone())),
                notify: Notify::new(),
                registry,
                config,
                clock,
                ids: Box::new(ids),
                events,
                open: AtomicBool::new(true),
                workers: std::sync::Mutex::new(None),
            }),
        };

        let group = WorkerGroup::spawn(workers, engine.clone());
        *engine
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(group);

        info!(
            workers,
            tasks = engine.inner.registry.len(),
            "engine started"
        );
        engine
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Typed submission handle for `T`, if `T` is registered.
    pub fn task<T: Task>(&self) -> Option<TaskRef<T>> {
        let definition = self.inner.registry.get(task_name::<T>())?;
        if !definition.accepts::<T>() {
            return None;
        }
        Some(TaskRef::new(definition, self.clone()))
    }

    /// Submit by registered name with JSON arguments.
    pub async fn submit_by_name(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<TaskHandle, SpindleError> {
        let definition = self
            .inner
            .registry
            .get(name)
            .ok_or_else(|| SpindleError::UnknownTask(name.to_string()))?;
        self.enqueue(definition, args).await
    }

    pub(crate) async fn enqueue(
        &self,
        definition: Arc<TaskDefinition>,
        args: serde_json::Value,
    ) -> Result<TaskHandle, SpindleError> {
        if !self.is_open() {
            return Err(SpindleError::ShutDown);
        }
        let task_id = {
            let mut store = self.inner.store.lock().await;
            let capacity = self.inner.config.queue_capacity;
            if store.ready_len() >= capacity {
                return Err(SpindleError::QueueFull { capacity });
            }

            let task_id = self.inner.ids.generate_task_id();
            let record = TaskRecord::new(
                task_id,
                definition.name(),
                definition.policy().max_retries,
                self.inner.clock.now(),
            );
            debug!(task_id = %task_id, name = definition.name(), "task submitted");
            store.insert(
                record,
                Dispatch {
                    task_id,
                    definition,
                    args,
                },
            );
            task_id
        };
        self.inner.notify.notify_one();
        Ok(self.async_result(task_id))
    }

    /// Handle for any id. Unknown ids read as PENDING.
    pub fn async_result(&self, task_id: TaskId) -> TaskHandle {
        TaskHandle::new(task_id, self.clone())
    }

    /// Snapshot of one record.
    pub async fn record(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.with_record(task_id, TaskRecord::clone).await
    }

    pub(crate) async fn with_record<R>(
        &self,
        task_id: TaskId,
        f: impl FnOnce(&TaskRecord) -> R,
    ) -> Option<R> {
        let store = self.inner.store.lock().await;
        store.get(&task_id).map(f)
    }

    /// Request cancellation. `false` for unknown or terminal records.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let accepted = {
            let mut store = self.inner.store.lock().await;
            store.cancel(&task_id, self.inner.clock.now())
        };
        if accepted {
            info!(task_id = %task_id, "cancel requested");
        }
        accepted
    }

    pub async fn counts(&self) -> TaskCounts {
        self.inner.store.lock().await.counts()
    }

    /// Stream of state transitions, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Close submissions and wait for the workers to stop.
    ///
    /// In-flight bodies run to completion. Queued records stay as they are.
    pub async fn shutdown(&self) {
        self.inner.open.store(false, Ordering::Release);
        let group = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(group) = group {
            group.shutdown_and_join().await;
            info!("engine stopped");
        }
    }

    /// Wait for the next runnable dispatch.
    pub(crate) async fn lease(&self, worker: usize) -> Lease {
        loop {
            let next_wake = {
                let mut store = self.inner.store.lock().await;
                store.promote_due(Instant::now());

                if let Some(lease) = store.lease_next(worker, self.inner.clock.now()) {
                    let more = store.has_ready();
                    drop(store);
                    if more {
                        self.inner.notify.notify_one();
                    }
                    debug!(
                        task_id = %lease.dispatch.task_id,
                        name = lease.dispatch.definition.name(),
                        retries = lease.retries,
                        worker,
                        "task leased"
                    );
                    return lease;
                }

                store.next_wake()
            };

            match next_wake {
                Some(at) => {
                    tokio::select! {
                        _ = self.inner.notify.notified() => {},
                        _ = tokio::time::sleep_until(at) => {},
                    }
                }
                None => self.inner.notify.notified().await,
            }
        }
    }

    /// Record the outcome of a leased attempt.
    pub(crate) async fn complete(&self, lease: Lease, outcome: TaskResult) {
        let task_id = lease.dispatch.task_id;
        let name = lease.dispatch.definition.name().to_string();
        let worker = lease.worker;

        let (completion, record) = {
            let mut store = self.inner.store.lock().await;
            let completion = store.finish(lease, outcome, self.inner.clock.now(), Instant::now());
            let record = store.get(&task_id).map(|r| (r.retries, r.info.clone()));
            (completion, record)
        };
        let (retries, info) = record.unwrap_or_default();

        match completion {
            Completion::RetryScheduled(delay) => {
                warn!(task_id = %task_id, name = %name, retries, worker, ?delay, info = ?info, "retry scheduled");
                self.inner.notify.notify_one();
            }
            Completion::Finished(TaskState::Success) => {
                info!(task_id = %task_id, name = %name, retries, worker, "task succeeded");
            }
            Completion::Finished(state) => {
                info!(task_id = %task_id, name = %name, retries, worker, %state, info = ?info, "task finished");
            }
            Completion::Missing => {
                warn!(task_id = %task_id, name = %name, "completed task has no record");
            }
        }
    }
}
