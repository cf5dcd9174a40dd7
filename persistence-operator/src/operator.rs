//! Operator wiring: informer feeds the queue, workers drain it

use persistence_models::PersistenceAction;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::informer::{Informer, InformerConfig, ListWatch, ResourceEventHandler, Store};
use crate::jobs::{CronJobBuilder, CronJobSettings, CronJobStore};
use crate::reconciler::Reconciler;
use crate::workqueue::WorkQueue;

/// How often workers check whether the initial list has landed
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Number of concurrent sync workers
    pub workers: usize,
    pub informer: InformerConfig,
    pub cron_jobs: CronJobSettings,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            informer: InformerConfig::default(),
            cron_jobs: CronJobSettings::default(),
        }
    }
}

/// Turns every cache notification into a queued key
struct QueueHandler {
    queue: WorkQueue,
}

impl ResourceEventHandler for QueueHandler {
    fn on_add(&self, key: &str) {
        self.queue.add(key);
    }

    fn on_update(&self, key: &str) {
        self.queue.add(key);
    }

    fn on_delete(&self, key: &str) {
        self.queue.add(key);
    }
}

pub struct Operator<L> {
    informer: Informer<PersistenceAction, L>,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    workers: usize,
}

impl<L: ListWatch<PersistenceAction>> Operator<L> {
    pub fn new(source: L, cron_jobs: Arc<dyn CronJobStore>, config: OperatorConfig) -> Result<Self> {
        let queue = WorkQueue::new("persistence-actions");
        let handler = Arc::new(QueueHandler {
            queue: queue.clone(),
        });
        let informer = Informer::new(source, handler, config.informer);
        let builder = CronJobBuilder::new(config.cron_jobs)?;
        let reconciler = Arc::new(Reconciler::new(informer.store(), cron_jobs, builder));

        Ok(Self {
            informer,
            queue,
            reconciler,
            workers: config.workers.max(1),
        })
    }

    /// Read handle on the action cache, shared with the status API
    pub fn store(&self) -> Store<PersistenceAction> {
        self.informer.store()
    }

    /// Run until `cancel` fires
    ///
    /// Workers start only once the initial list is cached, so a sync never
    /// mistakes a not-yet-listed action for a deleted one.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            informer,
            queue,
            reconciler,
            workers,
        } = self;
        let store = informer.store();
        let informer = tokio::spawn(informer.run(cancel.clone()));

        if wait_for_cache_sync(&store, &cancel).await {
            tracing::info!("Cache synced, starting {} worker(s)", workers);
            let handles: Vec<_> = (0..workers)
                .map(|id| tokio::spawn(run_worker(id, queue.clone(), Arc::clone(&reconciler))))
                .collect();

            cancel.cancelled().await;
            tracing::info!("Shutting down workers");
            queue.shut_down();
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!("Worker task failed: {}", e);
                }
            }
        } else {
            queue.shut_down();
        }

        if let Err(e) = informer.await {
            tracing::error!("Informer task failed: {}", e);
        }
        tracing::info!("Operator stopped");
    }
}

/// `false` if cancelled before the cache synced
async fn wait_for_cache_sync(store: &Store<PersistenceAction>, cancel: &CancellationToken) -> bool {
    let mut ticker = tokio::time::interval(SYNC_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {
                if store.has_synced() {
                    return true;
                }
            }
        }
    }
}

async fn run_worker(id: usize, queue: WorkQueue, reconciler: Arc<Reconciler>) {
    tracing::debug!("Worker {} started", id);
    while process_next_work_item(&queue, &reconciler).await {}
    tracing::debug!("Worker {} stopped", id);
}

/// Take one key off the queue and sync it; `false` once the queue shut down
pub async fn process_next_work_item(queue: &WorkQueue, reconciler: &Reconciler) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    match reconciler.sync(&key).await {
        Ok(outcome) => {
            tracing::debug!("Synced {}: {:?}", key, outcome);
            queue.forget(&key);
        }
        Err(e) => {
            tracing::error!(
                "Error syncing PersistenceAction {} (attempt {}): {:?}",
                key,
                queue.num_requeues(&key) + 1,
                e
            );
            queue.add_rate_limited(&key);
        }
    }

    queue.done(&key);
    true
}
