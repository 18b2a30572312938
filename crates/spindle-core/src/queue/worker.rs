use std::any::Any;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::engine::Engine;
use super::store::Lease;
use crate::domain::{TaskError, TaskResult};
use crate::typed::TaskContext;

/// Worker group handle.
/// - `request_shutdown()` stops new leases
/// - `shutdown_and_join()` waits for every worker to exit
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub(crate) fn spawn(n: usize, engine: Engine) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let engine = engine.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, engine, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers.
    /// In-flight bodies are not cancelled; workers just stop leasing.
    pub(crate) fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(worker_id: usize, engine: Engine, shutdown_rx: &mut watch::Receiver<bool>) {
    debug!(worker = worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease may park, so race it against shutdown
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = engine.lease(worker_id) => lease,
        };

        // the store lock is released inside lease(); never held across the body
        let outcome = run_body(&engine, &lease).await;
        engine.complete(lease, outcome).await;
    }
    debug!(worker = worker_id, "worker stopped");
}

/// Run one attempt in its own tokio task so a panic only fails that task.
async fn run_body(engine: &Engine, lease: &Lease) -> TaskResult {
    let definition = Arc::clone(&lease.dispatch.definition);
    let ctx = definition.binds_context().then(|| {
        TaskContext::new(
            lease.dispatch.task_id,
            lease.retries,
            lease.max_retries,
            definition.policy().default_retry_delay,
            engine.downgrade(),
        )
    });
    let body = definition.body();
    let args = lease.dispatch.args.clone();

    match tokio::spawn(async move { body.call(ctx, args).await }).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(
                task_id = %lease.dispatch.task_id,
                name = definition.name(),
                worker = lease.worker,
                panic = %message,
                "task panicked"
            );
            Err(TaskError::Fatal(format!("task panicked: {message}")))
        }
        Err(e) => Err(TaskError::Fatal(format!("task aborted: {e}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }
}
