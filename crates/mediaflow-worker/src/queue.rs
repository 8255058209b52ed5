//! Queue abstraction: one priority queue per operation kind with leases,
//! retries, backoff and dead-lettering.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use mediaflow_core::config::queue::{QueueConfig, QueueKindConfig};
use mediaflow_core::error::{AppError, codes};
use mediaflow_core::result::AppResult;
use mediaflow_core::types::{OperationKind, QueueItemId};

use crate::backoff::BackoffPolicy;
use crate::item::{
    DeadLetter, EnqueueOptions, ItemDetail, ItemState, LeasedItem, Lease, QueueItem, QueueStats,
};

/// Settings for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSettings {
    /// Maximum simultaneously leased items.
    pub concurrency: usize,
    /// Default attempt budget.
    pub max_attempts: u32,
    /// Default backoff policy.
    pub backoff: BackoffPolicy,
}

impl From<&QueueKindConfig> for KindSettings {
    fn from(config: &QueueKindConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff: BackoffPolicy::from(config),
        }
    }
}

const STALL_REASON: &str = "lease expired";

/// Result of one [`QueueRegistry::reap_stalled`] pass.
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    /// Stalled items put back for another delivery.
    pub redelivered: usize,
    /// Stalled items that had no attempts left.
    pub dead_lettered: Vec<DeadLetter>,
}

impl ReapReport {
    /// Number of stalled leases released.
    pub fn total(&self) -> usize {
        self.redelivered + self.dead_lettered.len()
    }
}

/// What a failed delivery led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// The item will be redelivered after the delay.
    Retrying {
        /// Backoff applied.
        delay: Duration,
    },
    /// The item moved to the failed state.
    DeadLettered,
    /// The lease was no longer valid; nothing changed.
    Stale,
}

#[derive(Debug)]
struct KindState {
    settings: KindSettings,
    items: HashMap<QueueItemId, QueueItem>,
    waiting: BTreeMap<(Reverse<u8>, u64), QueueItemId>,
    delayed: HashSet<QueueItemId>,
    active: usize,
    paused: bool,
}

impl KindState {
    fn new(settings: KindSettings) -> Self {
        Self {
            settings,
            items: HashMap::new(),
            waiting: BTreeMap::new(),
            delayed: HashSet::new(),
            active: 0,
            paused: false,
        }
    }

    fn make_waiting(&mut self, id: QueueItemId) {
        if let Some(item) = self.items.get_mut(&id) {
            item.state = ItemState::Waiting;
            item.lease = None;
            self.waiting.insert((Reverse(item.priority), item.seq), id);
        }
    }

    fn make_delayed(&mut self, id: QueueItemId, until: DateTime<Utc>) {
        if let Some(item) = self.items.get_mut(&id) {
            item.state = ItemState::Delayed;
            item.lease = None;
            item.available_at = until;
            self.delayed.insert(id);
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<QueueItemId> = self
            .delayed
            .iter()
            .filter(|id| self.items.get(id).is_some_and(|item| item.available_at <= now))
            .copied()
            .collect();
        for id in due {
            self.delayed.remove(&id);
            self.make_waiting(id);
        }
    }

    /// Check that `leased` still owns its item.
    fn owns(&self, leased: &LeasedItem) -> bool {
        self.items.get(&leased.id).is_some_and(|item| {
            item.state == ItemState::Active && item.lease.map(|l| l.token) == Some(leased.token)
        })
    }

    /// Release an active item after a failed or stalled delivery.
    fn fail_delivery(
        &mut self,
        id: QueueItemId,
        error: String,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> NackOutcome {
        let Some(item) = self.items.get_mut(&id) else {
            return NackOutcome::Stale;
        };
        item.last_error = Some(error);
        item.lease = None;
        let can_retry = retryable && item.attempts_made < item.max_attempts;
        let delay = item.backoff.delay_for(item.attempts_made);
        self.active = self.active.saturating_sub(1);

        if !can_retry {
            item.state = ItemState::Failed;
            item.finished_at = Some(now);
            return NackOutcome::DeadLettered;
        }
        if delay.is_zero() {
            self.make_waiting(id);
        } else {
            let until = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
            self.make_delayed(id, until);
        }
        NackOutcome::Retrying { delay }
    }

    /// Put a failed item back to waiting with a fresh attempt budget.
    fn revive(&mut self, id: QueueItemId) -> bool {
        let Some(item) = self.items.get_mut(&id) else {
            return false;
        };
        if item.state != ItemState::Failed {
            return false;
        }
        item.attempts_made = 0;
        item.finished_at = None;
        self.make_waiting(id);
        true
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            paused: self.paused,
            ..QueueStats::default()
        };
        for item in self.items.values() {
            match item.state {
                ItemState::Waiting => stats.waiting += 1,
                ItemState::Delayed => stats.delayed += 1,
                ItemState::Active => stats.active += 1,
                ItemState::Completed => stats.completed += 1,
                ItemState::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

#[derive(Debug)]
struct KindQueue {
    state: Mutex<KindState>,
    work: Notify,
}

/// Process-wide registry holding one queue per operation kind.
///
/// Created once at startup and shared; [`close`](Self::close) stops new
/// work and [`drain`](Self::drain) waits for in-flight leases.
#[derive(Debug)]
pub struct QueueRegistry {
    kinds: DashMap<OperationKind, Arc<KindQueue>>,
    closed: AtomicBool,
    seq: AtomicU64,
    tokens: AtomicU64,
    stall_timeout: Duration,
    idle: Notify,
}

impl QueueRegistry {
    /// Create an empty registry. Leases not renewed within
    /// `stall_timeout` are considered stalled.
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            kinds: DashMap::new(),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
            stall_timeout,
            idle: Notify::new(),
        }
    }

    /// Create a registry with every configured and built-in kind.
    pub async fn from_config(config: &QueueConfig) -> Self {
        let registry = Self::new(Duration::from_secs(config.stall_timeout_seconds));
        for kind in config.registered_kinds() {
            let settings = KindSettings::from(&config.kind_settings(&kind));
            registry.register_kind(kind, settings).await;
        }
        registry
    }

    /// Register a kind, or replace the settings of an existing one.
    pub async fn register_kind(&self, kind: OperationKind, settings: KindSettings) {
        if let Some(queue) = self.kinds.get(&kind).map(|q| Arc::clone(q.value())) {
            queue.state.lock().await.settings = settings;
            return;
        }
        tracing::info!(
            kind = %kind,
            concurrency = settings.concurrency,
            max_attempts = settings.max_attempts,
            "Registered queue kind"
        );
        self.kinds.insert(
            kind,
            Arc::new(KindQueue {
                state: Mutex::new(KindState::new(settings)),
                work: Notify::new(),
            }),
        );
    }

    /// Registered kinds, sorted by name.
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<OperationKind> = self.kinds.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    /// Whether `kind` is registered.
    pub fn has_kind(&self, kind: &OperationKind) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Settings of a kind.
    pub async fn settings(&self, kind: &OperationKind) -> AppResult<KindSettings> {
        Ok(self.queue(kind)?.state.lock().await.settings)
    }

    /// Add an item. It is stored before this returns.
    pub async fn enqueue(
        &self,
        kind: &OperationKind,
        payload: Value,
        options: EnqueueOptions,
    ) -> AppResult<QueueItemId> {
        if self.is_closed() {
            return Err(AppError::service_unavailable("Queue registry is closed"));
        }
        let queue = self.queue(kind)?;
        let now = Utc::now();
        let id = QueueItemId::new();

        let mut state = queue.state.lock().await;
        let delay = options.delay.filter(|d| !d.is_zero());
        let item = QueueItem {
            id,
            payload,
            priority: options.priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            state: ItemState::Waiting,
            attempts_made: 0,
            max_attempts: options.max_attempts.unwrap_or(state.settings.max_attempts).max(1),
            backoff: options.backoff.unwrap_or(state.settings.backoff),
            enqueued_at: now,
            available_at: now,
            lease: None,
            last_error: None,
            result: None,
            finished_at: None,
        };
        state.items.insert(id, item);
        match delay {
            Some(delay) => {
                let until = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                state.make_delayed(id, until);
            }
            None => state.make_waiting(id),
        }
        drop(state);
        queue.work.notify_one();

        tracing::debug!(kind = %kind, item_id = %id, "Enqueued item");
        Ok(id)
    }

    /// Lease waiting items until `kind` has `limit` active items.
    ///
    /// Highest priority first, FIFO within a priority. Paused kinds and a
    /// closed registry lease nothing.
    pub async fn lease(&self, kind: &OperationKind, limit: usize) -> AppResult<Vec<LeasedItem>> {
        let queue = self.queue(kind)?;
        if self.is_closed() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let deadline = now + self.stall_delta();

        let mut state = queue.state.lock().await;
        if state.paused {
            return Ok(Vec::new());
        }
        state.promote_due(now);

        let mut leased = Vec::new();
        while state.active < limit {
            let Some((_, id)) = state.waiting.pop_first() else {
                break;
            };
            let token = self.tokens.fetch_add(1, Ordering::Relaxed);
            let Some(item) = state.items.get_mut(&id) else {
                continue;
            };
            item.state = ItemState::Active;
            item.attempts_made += 1;
            item.lease = Some(Lease { token, deadline });
            leased.push(LeasedItem {
                id,
                kind: kind.clone(),
                payload: item.payload.clone(),
                attempt: item.attempts_made,
                max_attempts: item.max_attempts,
                token,
            });
            state.active += 1;
        }
        Ok(leased)
    }

    /// Renew a lease. Returns `false` if the lease is no longer held.
    pub async fn touch(&self, leased: &LeasedItem) -> AppResult<bool> {
        let queue = self.queue(&leased.kind)?;
        let deadline = Utc::now() + self.stall_delta();
        let mut state = queue.state.lock().await;
        if !state.owns(leased) {
            return Ok(false);
        }
        if let Some(item) = state.items.get_mut(&leased.id) {
            item.lease = Some(Lease {
                token: leased.token,
                deadline,
            });
        }
        Ok(true)
    }

    /// Acknowledge a delivery. Returns `false` for a stale lease.
    pub async fn ack(&self, leased: &LeasedItem, result: Option<Value>) -> AppResult<bool> {
        let queue = self.queue(&leased.kind)?;
        let mut state = queue.state.lock().await;
        if !state.owns(leased) {
            tracing::debug!(kind = %leased.kind, item_id = %leased.id, "Ignoring ack for stale lease");
            return Ok(false);
        }
        if let Some(item) = state.items.get_mut(&leased.id) {
            item.state = ItemState::Completed;
            item.lease = None;
            item.result = result;
            item.finished_at = Some(Utc::now());
        }
        state.active = state.active.saturating_sub(1);
        drop(state);

        self.slot_freed(&queue);
        Ok(true)
    }

    /// Fail a delivery.
    ///
    /// Retryable failures are redelivered with backoff while attempts
    /// remain; everything else moves the item to the failed state.
    pub async fn nack(&self, leased: &LeasedItem, error: &str, retryable: bool) -> AppResult<NackOutcome> {
        let queue = self.queue(&leased.kind)?;
        let mut state = queue.state.lock().await;
        if !state.owns(leased) {
            tracing::debug!(kind = %leased.kind, item_id = %leased.id, "Ignoring nack for stale lease");
            return Ok(NackOutcome::Stale);
        }
        let outcome = state.fail_delivery(leased.id, error.to_string(), retryable, Utc::now());
        drop(state);

        match outcome {
            NackOutcome::Retrying { delay } => tracing::info!(
                kind = %leased.kind,
                item_id = %leased.id,
                attempt = leased.attempt,
                delay_ms = delay.as_millis() as u64,
                "Item will be retried"
            ),
            NackOutcome::DeadLettered => tracing::warn!(
                kind = %leased.kind,
                item_id = %leased.id,
                attempts = leased.attempt,
                error,
                "Item moved to failed state"
            ),
            NackOutcome::Stale => {}
        }
        self.slot_freed(&queue);
        Ok(outcome)
    }

    /// Redeliver (or dead-letter) leases whose deadline passed.
    pub async fn reap_stalled(&self, kind: &OperationKind) -> AppResult<ReapReport> {
        let queue = self.queue(kind)?;
        let now = Utc::now();
        let mut state = queue.state.lock().await;
        let stalled: Vec<QueueItemId> = state
            .items
            .values()
            .filter(|item| {
                item.state == ItemState::Active && item.lease.is_some_and(|l| l.deadline <= now)
            })
            .map(|item| item.id)
            .collect();

        let mut report = ReapReport::default();
        for id in stalled {
            let outcome = state.fail_delivery(id, STALL_REASON.to_string(), true, now);
            if outcome == NackOutcome::DeadLettered {
                tracing::warn!(kind = %kind, item_id = %id, "Stalled item moved to failed state");
                if let Some(item) = state.items.get(&id) {
                    report.dead_lettered.push(DeadLetter {
                        id,
                        kind: kind.clone(),
                        payload: item.payload.clone(),
                        error: STALL_REASON.to_string(),
                    });
                }
            } else {
                tracing::warn!(kind = %kind, item_id = %id, "Stalled item will be redelivered");
                report.redelivered += 1;
            }
        }
        drop(state);

        if report.total() > 0 {
            self.slot_freed(&queue);
        }
        Ok(report)
    }

    /// Remove a waiting or delayed item. Returns `false` if it is already
    /// leased or finished.
    pub async fn remove(&self, kind: &OperationKind, id: QueueItemId) -> AppResult<bool> {
        let queue = self.queue(kind)?;
        let mut state = queue.state.lock().await;
        let Some(item) = state.items.get(&id) else {
            return Err(Self::unknown_item(kind, id));
        };
        match item.state {
            ItemState::Waiting => {
                let key = (Reverse(item.priority), item.seq);
                state.waiting.remove(&key);
            }
            ItemState::Delayed => {
                state.delayed.remove(&id);
            }
            _ => return Ok(false),
        }
        state.items.remove(&id);
        tracing::debug!(kind = %kind, item_id = %id, "Removed item");
        Ok(true)
    }

    /// Counters for one kind.
    pub async fn stats(&self, kind: &OperationKind) -> AppResult<QueueStats> {
        Ok(self.queue(kind)?.state.lock().await.stats())
    }

    /// Counters for every kind.
    pub async fn all_stats(&self) -> BTreeMap<OperationKind, QueueStats> {
        let mut all = BTreeMap::new();
        for kind in self.kinds() {
            if let Ok(stats) = self.stats(&kind).await {
                all.insert(kind, stats);
            }
        }
        all
    }

    /// Stop leasing from `kind`. In-flight leases are unaffected.
    pub async fn pause(&self, kind: &OperationKind) -> AppResult<()> {
        self.queue(kind)?.state.lock().await.paused = true;
        tracing::info!(kind = %kind, "Queue paused");
        Ok(())
    }

    /// Resume leasing from `kind`.
    pub async fn resume(&self, kind: &OperationKind) -> AppResult<()> {
        let queue = self.queue(kind)?;
        queue.state.lock().await.paused = false;
        queue.work.notify_one();
        tracing::info!(kind = %kind, "Queue resumed");
        Ok(())
    }

    /// Purge items in a terminal `state` finished more than `older_than` ago.
    pub async fn clean(
        &self,
        kind: &OperationKind,
        state: ItemState,
        older_than: chrono::Duration,
    ) -> AppResult<usize> {
        if !state.is_terminal() {
            return Err(AppError::validation(format!(
                "Only completed or failed items can be cleaned, not {state:?}"
            )));
        }
        let queue = self.queue(kind)?;
        let cutoff = Utc::now() - older_than;
        let mut guard = queue.state.lock().await;
        let before = guard.items.len();
        guard.items.retain(|_, item| {
            !(item.state == state && item.finished_at.is_some_and(|at| at <= cutoff))
        });
        let removed = before - guard.items.len();
        if removed > 0 {
            tracing::info!(kind = %kind, ?state, removed, "Cleaned queue items");
        }
        Ok(removed)
    }

    /// Clean completed and failed items of every kind.
    pub async fn clean_all(&self, older_than: chrono::Duration) -> usize {
        let mut removed = 0;
        for kind in self.kinds() {
            for state in [ItemState::Completed, ItemState::Failed] {
                removed += self.clean(&kind, state, older_than).await.unwrap_or(0);
            }
        }
        removed
    }

    /// Move every failed item of `kind` back to waiting with a fresh budget.
    ///
    /// This only touches queue state. A job that already failed stays
    /// failed and its redelivery is dead-lettered again; reopen jobs through
    /// the job service's `retry_failed` instead.
    pub async fn retry_failed(&self, kind: &OperationKind) -> AppResult<usize> {
        let queue = self.queue(kind)?;
        let mut state = queue.state.lock().await;
        let failed: Vec<QueueItemId> = state
            .items
            .values()
            .filter(|item| item.state == ItemState::Failed)
            .map(|item| item.id)
            .collect();
        let revived = failed.into_iter().filter(|id| state.revive(*id)).count();
        drop(state);

        if revived > 0 {
            queue.work.notify_one();
            tracing::info!(kind = %kind, count = revived, "Retrying failed items");
        }
        Ok(revived)
    }

    /// Move one failed item back to waiting. Returns `false` if the item is
    /// not in the failed state.
    pub async fn retry_item(&self, kind: &OperationKind, id: QueueItemId) -> AppResult<bool> {
        let queue = self.queue(kind)?;
        let mut state = queue.state.lock().await;
        if !state.items.contains_key(&id) {
            return Err(Self::unknown_item(kind, id));
        }
        let revived = state.revive(id);
        drop(state);

        if revived {
            queue.work.notify_one();
            tracing::info!(kind = %kind, item_id = %id, "Retrying failed item");
        }
        Ok(revived)
    }

    /// Failed items of `kind`, oldest first.
    pub async fn failed_items(&self, kind: &OperationKind) -> AppResult<Vec<DeadLetter>> {
        let queue = self.queue(kind)?;
        let state = queue.state.lock().await;
        let mut failed: Vec<&QueueItem> = state
            .items
            .values()
            .filter(|item| item.state == ItemState::Failed)
            .collect();
        failed.sort_by_key(|item| item.seq);
        Ok(failed
            .into_iter()
            .map(|item| DeadLetter {
                id: item.id,
                kind: kind.clone(),
                payload: item.payload.clone(),
                error: item.last_error.clone().unwrap_or_default(),
            })
            .collect())
    }

    /// Administrative view of one item.
    pub async fn item_detail(&self, kind: &OperationKind, id: QueueItemId) -> AppResult<ItemDetail> {
        let queue = self.queue(kind)?;
        let state = queue.state.lock().await;
        state
            .items
            .get(&id)
            .map(|item| item.detail(kind))
            .ok_or_else(|| Self::unknown_item(kind, id))
    }

    /// Wait until `kind` may have new work or `max_wait` elapses.
    pub async fn wait_for_work(&self, kind: &OperationKind, max_wait: Duration) {
        let Ok(queue) = self.queue(kind) else {
            tokio::time::sleep(max_wait).await;
            return;
        };
        let _ = tokio::time::timeout(max_wait, queue.work.notified()).await;
    }

    /// Reject new items and stop leasing.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Queue registry closed");
        }
        for entry in self.kinds.iter() {
            entry.value().work.notify_waiters();
        }
    }

    /// How long a lease stays valid without renewal.
    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until no kind has active leases. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.total_active().await == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    async fn total_active(&self) -> usize {
        let queues: Vec<Arc<KindQueue>> = self.kinds.iter().map(|e| Arc::clone(e.value())).collect();
        let mut active = 0;
        for queue in queues {
            active += queue.state.lock().await.active;
        }
        active
    }

    fn slot_freed(&self, queue: &KindQueue) {
        queue.work.notify_one();
        self.idle.notify_waiters();
    }

    fn stall_delta(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stall_timeout.as_millis() as i64)
    }

    fn queue(&self, kind: &OperationKind) -> AppResult<Arc<KindQueue>> {
        self.kinds
            .get(kind)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| {
                AppError::not_found(format!("Queue kind '{kind}' is not registered"))
                    .with_code(codes::UNKNOWN_KIND)
            })
    }

    fn unknown_item(kind: &OperationKind, id: QueueItemId) -> AppError {
        AppError::not_found(format!("Item {id} not found in queue '{kind}'"))
            .with_code(codes::UNKNOWN_ITEM)
    }
}
