use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::protocol::{BackendEvent, RunMessage};
use super::traits::{BackendChannel, BackendLauncher, ProvisionError};
use crate::registry::RuntimeDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Ready,
    Busy,
    Disposed,
}

/// One long-lived execution environment, keyed by the runtime id it serves.
/// Created lazily on the first run of that runtime and reused afterwards.
#[derive(Debug)]
pub struct ExecutionContext {
    runtime_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    state: ContextState,
    channel: BackendChannel,
}

type Slot = Arc<Mutex<Option<ExecutionContext>>>;

/// Exclusive borrow of a context for the duration of one run.
///
/// Holding the lease holds the runtime's slot lock, so concurrent runs of
/// the same runtime queue FIFO behind it instead of interleaving messages
/// on a busy context. The engine must hand the lease back via
/// [`BackendPool::release`] or [`BackendPool::terminate`] and must not
/// retain any reference afterwards.
#[derive(Debug)]
pub struct ContextLease {
    guard: OwnedMutexGuard<Option<ExecutionContext>>,
}

impl ContextLease {
    pub fn runtime_id(&self) -> Option<&str> {
        self.guard.as_ref().map(|cx| cx.runtime_id.as_str())
    }

    pub fn state(&self) -> ContextState {
        self.guard
            .as_ref()
            .map(|cx| cx.state)
            .unwrap_or(ContextState::Disposed)
    }

    /// Sends the run command. An error means the environment already went
    /// away; the caller should terminate the lease.
    pub async fn send_run(&mut self, message: RunMessage) -> Result<(), ()> {
        match self.guard.as_mut() {
            Some(cx) => cx.channel.commands.send(message).await.map_err(|_| ()),
            None => Err(()),
        }
    }

    /// Next event from the environment; `None` means the event channel
    /// closed without a terminal message.
    pub async fn recv_event(&mut self) -> Option<BackendEvent> {
        match self.guard.as_mut() {
            Some(cx) => cx.channel.events.recv().await,
            None => None,
        }
    }
}

/// Owns every execution context, exactly one slot per runtime id.
///
/// Constructed explicitly at session start and injected into the engine;
/// there is no global singleton, and teardown is an explicit `shutdown`.
#[derive(Debug)]
pub struct BackendPool {
    launcher: Arc<dyn BackendLauncher>,
    slots: DashMap<String, Slot>,
    provisioned: AtomicUsize,
}

impl BackendPool {
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Self {
        Self {
            launcher,
            slots: DashMap::new(),
            provisioned: AtomicUsize::new(0),
        }
    }

    /// Returns the warm context for the runtime, provisioning one if the
    /// slot is empty. Waits FIFO if another run currently holds the slot.
    #[tracing::instrument(skip(self, descriptor), fields(runtime = %descriptor.id))]
    pub async fn acquire(
        &self,
        descriptor: &RuntimeDescriptor,
    ) -> Result<ContextLease, ProvisionError> {
        let slot = self
            .slots
            .entry(descriptor.id.clone())
            .or_default()
            .clone();
        let mut guard = slot.lock_owned().await;

        if guard.is_none() {
            tracing::debug!("provisioning new execution context");
            let channel = self.launcher.launch(descriptor).await?;
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            *guard = Some(ExecutionContext {
                runtime_id: descriptor.id.clone(),
                created_at: chrono::Utc::now(),
                state: ContextState::Ready,
                channel,
            });
        }

        if let Some(cx) = guard.as_mut() {
            cx.state = ContextState::Busy;
        }
        Ok(ContextLease { guard })
    }

    /// Normal completion: the context goes back to `Ready` for reuse.
    pub fn release(&self, mut lease: ContextLease) {
        if let Some(cx) = lease.guard.as_mut() {
            cx.state = ContextState::Ready;
            tracing::debug!(runtime = %cx.runtime_id, "released execution context");
        }
    }

    /// Forcible disposal after a timeout, cancellation, or dead channel.
    /// The slot is emptied so the next acquire re-provisions cleanly.
    pub fn terminate(&self, mut lease: ContextLease) {
        if let Some(mut cx) = lease.guard.take() {
            cx.state = ContextState::Disposed;
            let lifetime_ms = (chrono::Utc::now() - cx.created_at).num_milliseconds();
            tracing::info!(
                runtime = %cx.runtime_id,
                lifetime_ms,
                "terminated execution context"
            );
        }
    }

    /// Session teardown: disposes every pooled context.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        let disposals = slots.into_iter().map(|slot| async move {
            let mut guard = slot.lock_owned().await;
            if let Some(mut cx) = guard.take() {
                cx.state = ContextState::Disposed;
            }
        });
        futures::future::join_all(disposals).await;
        self.slots.clear();
    }

    /// Instrumentation hook: how many contexts have been provisioned since
    /// the pool was created. Lets callers observe reuse vs. re-provisioning.
    pub fn provisioned_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::MockBackendLauncher;
    use crate::registry::RuntimeRegistry;
    use tokio::sync::mpsc;

    fn idle_channel() -> BackendChannel {
        let (commands, _cmd_rx) = mpsc::channel(8);
        let (_evt_tx, events) = mpsc::channel(8);
        BackendChannel { commands, events }
    }

    fn descriptor(id: &str) -> RuntimeDescriptor {
        RuntimeRegistry::with_defaults()
            .resolve(id)
            .unwrap_or_else(|| panic!("{id} not in default registry"))
            .clone()
    }

    #[tokio::test]
    async fn sequential_acquires_reuse_one_context() {
        let mut launcher = MockBackendLauncher::new();
        launcher
            .expect_launch()
            .times(1)
            .returning(|_| Ok(idle_channel()));
        let pool = BackendPool::new(Arc::new(launcher));
        let python = descriptor("python");

        let lease = pool.acquire(&python).await.unwrap();
        assert_eq!(lease.state(), ContextState::Busy);
        pool.release(lease);

        let lease = pool.acquire(&python).await.unwrap();
        assert_eq!(lease.runtime_id(), Some("python"));
        pool.release(lease);

        assert_eq!(pool.provisioned_count(), 1);
    }

    #[tokio::test]
    async fn distinct_runtimes_get_distinct_contexts() {
        let mut launcher = MockBackendLauncher::new();
        launcher
            .expect_launch()
            .times(2)
            .returning(|_| Ok(idle_channel()));
        let pool = BackendPool::new(Arc::new(launcher));

        let a = pool.acquire(&descriptor("python")).await.unwrap();
        let b = pool.acquire(&descriptor("lua")).await.unwrap();
        assert_ne!(a.runtime_id(), b.runtime_id());
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.provisioned_count(), 2);
    }

    #[tokio::test]
    async fn terminate_forces_reprovision_on_next_acquire() {
        let mut launcher = MockBackendLauncher::new();
        launcher
            .expect_launch()
            .times(2)
            .returning(|_| Ok(idle_channel()));
        let pool = BackendPool::new(Arc::new(launcher));
        let lua = descriptor("lua");

        let lease = pool.acquire(&lua).await.unwrap();
        pool.terminate(lease);

        let lease = pool.acquire(&lua).await.unwrap();
        assert_eq!(lease.state(), ContextState::Busy);
        pool.release(lease);

        assert_eq!(pool.provisioned_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_same_runtime_acquires_serialize() {
        let mut launcher = MockBackendLauncher::new();
        launcher
            .expect_launch()
            .times(1)
            .returning(|_| Ok(idle_channel()));
        let pool = Arc::new(BackendPool::new(Arc::new(launcher)));
        let sql = descriptor("sql");

        let first = pool.acquire(&sql).await.unwrap();

        let pool_clone = pool.clone();
        let sql_clone = sql.clone();
        let waiter = tokio::spawn(async move {
            let lease = pool_clone.acquire(&sql_clone).await.unwrap();
            pool_clone.release(lease);
        });

        // The second acquire must queue behind the held lease.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(first);
        waiter.await.unwrap();
        assert_eq!(pool.provisioned_count(), 1);
    }

    #[tokio::test]
    async fn launch_failure_propagates_and_leaves_slot_empty() {
        let mut launcher = MockBackendLauncher::new();
        launcher.expect_launch().times(2).returning(|d| {
            Err(ProvisionError::Failed {
                runtime: d.id.clone(),
                msg: "asset download failed".to_string(),
            })
        });
        let pool = BackendPool::new(Arc::new(launcher));
        let go = descriptor("go");

        assert!(pool.acquire(&go).await.is_err());
        // Slot stayed empty, so the next acquire tries to provision again.
        assert!(pool.acquire(&go).await.is_err());
        assert_eq!(pool.provisioned_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_disposes_everything() {
        let mut launcher = MockBackendLauncher::new();
        launcher
            .expect_launch()
            .times(3)
            .returning(|_| Ok(idle_channel()));
        let pool = BackendPool::new(Arc::new(launcher));

        pool.release(pool.acquire(&descriptor("python")).await.unwrap());
        pool.release(pool.acquire(&descriptor("lua")).await.unwrap());
        pool.shutdown().await;

        // Re-acquiring after shutdown provisions fresh.
        pool.release(pool.acquire(&descriptor("python")).await.unwrap());
        assert_eq!(pool.provisioned_count(), 3);
    }
}
