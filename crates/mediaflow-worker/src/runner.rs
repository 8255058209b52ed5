//! Worker pool: leases items of one kind and runs them on its handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time;

use mediaflow_core::config::queue::QueueConfig;
use mediaflow_core::result::AppResult;
use mediaflow_core::types::OperationKind;

use crate::executor::HandlerRegistry;
use crate::item::{DeadLetter, LeasedItem};
use crate::queue::{NackOutcome, QueueRegistry};

/// Runs up to `concurrency` items of one kind at a time
#[derive(Debug)]
pub struct WorkerPool {
    /// Queue registry to lease from
    queue: Arc<QueueRegistry>,
    /// Handlers to dispatch to
    handlers: Arc<HandlerRegistry>,
    /// Kind served by this pool
    kind: OperationKind,
    /// Maximum simultaneous items
    concurrency: usize,
    /// Upper bound between lease attempts when no wakeup arrives
    poll_interval: Duration,
    /// How long shutdown waits for in-flight items
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Create a pool for `kind` using the kind's registered concurrency
    pub async fn new(
        queue: Arc<QueueRegistry>,
        handlers: Arc<HandlerRegistry>,
        kind: OperationKind,
        config: &QueueConfig,
    ) -> AppResult<Self> {
        let settings = queue.settings(&kind).await?;
        Ok(Self {
            queue,
            handlers,
            kind,
            concurrency: settings.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
        })
    }

    /// Spawn one pool per kind that has a registered handler
    pub async fn spawn_all(
        queue: Arc<QueueRegistry>,
        handlers: Arc<HandlerRegistry>,
        config: &QueueConfig,
        cancel: watch::Receiver<bool>,
    ) -> AppResult<Vec<JoinHandle<()>>> {
        let mut pools = Vec::new();
        for kind in handlers.registered_kinds() {
            let pool = Self::new(
                Arc::clone(&queue),
                Arc::clone(&handlers),
                kind,
                config,
            )
            .await?;
            pools.push(pool.spawn(cancel.clone()));
        }
        Ok(pools)
    }

    /// Run the pool on a background task
    pub fn spawn(self, cancel: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run until the cancel signal is received, then wait for in-flight items
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            kind = %self.kind,
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            if *cancel.borrow() {
                break;
            }
            self.poll_and_execute(&semaphore).await;

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!(kind = %self.kind, "Worker pool received shutdown signal");
                        break;
                    }
                }
                _ = self.queue.wait_for_work(&self.kind, self.poll_interval) => {}
            }
        }

        tracing::info!(kind = %self.kind, "Worker pool waiting for in-flight items");

        let max_permits = self.concurrency as u32;
        if time::timeout(self.shutdown_timeout, semaphore.acquire_many(max_permits))
            .await
            .is_err()
        {
            tracing::warn!(
                kind = %self.kind,
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Worker pool shut down with items still in flight"
            );
        }

        tracing::info!(kind = %self.kind, "Worker pool shut down");
    }

    /// Reap stalled leases, then lease and start as many items as slots allow
    async fn poll_and_execute(&self, semaphore: &Arc<Semaphore>) {
        match self.queue.reap_stalled(&self.kind).await {
            Ok(report) => {
                for dead in &report.dead_lettered {
                    self.handlers.dead_lettered(dead).await;
                }
            }
            Err(e) => tracing::error!(kind = %self.kind, error = %e, "Failed to reap stalled items"),
        }

        if semaphore.available_permits() == 0 {
            tracing::trace!(kind = %self.kind, "All worker slots occupied");
            return;
        }

        let leased = match self.queue.lease(&self.kind, self.concurrency).await {
            Ok(leased) => leased,
            Err(e) => {
                tracing::error!(kind = %self.kind, error = %e, "Failed to lease items");
                return;
            }
        };

        for item in leased {
            // The queue releases a slot on ack slightly before the finishing
            // task drops its permit.
            let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
                return;
            };
            let queue = Arc::clone(&self.queue);
            let handlers = Arc::clone(&self.handlers);
            tokio::spawn(async move {
                let _permit = permit;
                process(queue, handlers, item).await;
            });
        }
    }
}

/// Run one delivery while renewing its lease, then ack or nack it
async fn process(queue: Arc<QueueRegistry>, handlers: Arc<HandlerRegistry>, item: LeasedItem) {
    tracing::info!(
        kind = %item.kind,
        item_id = %item.id,
        attempt = item.attempt,
        max_attempts = item.max_attempts,
        "Processing item"
    );

    let renew_every = (queue.stall_timeout() / 3).max(Duration::from_millis(10));
    let mut ticker = time::interval(renew_every);
    ticker.tick().await;

    let execution = handlers.execute(&item);
    tokio::pin!(execution);

    let outcome = loop {
        tokio::select! {
            result = &mut execution => break result,
            _ = ticker.tick() => {
                if let Ok(false) = queue.touch(&item).await {
                    tracing::warn!(kind = %item.kind, item_id = %item.id, "Lease lost while processing");
                }
            }
        }
    };

    match outcome {
        Ok(result) => match queue.ack(&item, result).await {
            Ok(true) => tracing::info!(kind = %item.kind, item_id = %item.id, "Item completed"),
            Ok(false) => tracing::warn!(kind = %item.kind, item_id = %item.id, "Completed item had a stale lease"),
            Err(e) => tracing::error!(item_id = %item.id, error = %e, "Failed to acknowledge item"),
        },
        Err(err) => {
            let retryable = err.is_retryable();
            let message = err.to_string();
            tracing::warn!(
                kind = %item.kind,
                item_id = %item.id,
                retryable,
                error = %message,
                "Item failed"
            );
            let outcome = queue.nack(&item, &message, retryable).await;
            match outcome {
                Ok(NackOutcome::Stale) => tracing::warn!(item_id = %item.id, "Failed item had a stale lease"),
                Ok(NackOutcome::DeadLettered) => {
                    handlers
                        .dead_lettered(&DeadLetter::from_delivery(&item, message))
                        .await;
                }
                Ok(NackOutcome::Retrying { .. }) => {}
                Err(e) => tracing::error!(item_id = %item.id, error = %e, "Failed to record item failure"),
            }
        }
    }
}
