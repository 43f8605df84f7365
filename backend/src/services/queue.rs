//! Priority work queue with a single worker
//!
//! Items drain strictly by priority (higher first), ties in insertion order,
//! and exactly one item runs at a time. Producers can enqueue and inspect the
//! queue without waiting on the running item.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PRIORITY_LOW: i32 = 10;
pub const PRIORITY_NORMAL: i32 = 20;
pub const PRIORITY_HIGH: i32 = 30;
/// Above everything else
pub const PRIORITY_REMOVE: i32 = PRIORITY_HIGH + PRIORITY_HIGH;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("{0} is already queued or running")]
    Duplicate(String),

    #[error("queue '{0}' is shut down")]
    ShutDown(String),
}

/// Work that can ride on a [`PriorityQueue`]
pub trait QueueJob: Send + Sync + 'static {
    fn priority(&self) -> i32;

    /// Human readable name used in logs and snapshots
    fn name(&self) -> String;

    /// Whether `other` would do the same work as `self`
    fn is_equivalent(&self, _other: &Self) -> bool {
        false
    }

    /// Whether an equivalent running item blocks this one from being queued
    fn exclusive_while_running(&self) -> bool {
        true
    }
}

/// Item lifecycle; terminal states are never left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Queued,
    Running,
    Finished,
    Failed,
    /// Removed from the queue before it started
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Finished | ItemState::Failed | ItemState::Cancelled
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ItemTimes {
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

pub struct QueueItem<T> {
    pub id: Uuid,
    seq: u64,
    job: T,
    created_at: DateTime<Utc>,
    times: Mutex<ItemTimes>,
    state: watch::Sender<ItemState>,
}

impl<T: QueueJob> fmt::Debug for QueueItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.id)
            .field("name", &self.job.name())
            .field("priority", &self.job.priority())
            .field("state", &self.state())
            .finish()
    }
}

impl<T: QueueJob> QueueItem<T> {
    fn new(job: T, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            job,
            created_at: Utc::now(),
            times: Mutex::new(ItemTimes::default()),
            state: watch::Sender::new(ItemState::Queued),
        }
    }

    pub fn job(&self) -> &T {
        &self.job
    }

    pub fn priority(&self) -> i32 {
        self.job.priority()
    }

    pub fn name(&self) -> String {
        self.job.name()
    }

    pub fn state(&self) -> ItemState {
        *self.state.borrow()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.times.lock().started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.times.lock().stopped_at
    }

    /// Run time so far, or total run time once stopped
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let times = *self.times.lock();
        let started = times.started_at?;
        Some(times.stopped_at.unwrap_or_else(Utc::now) - started)
    }

    /// Wait until the item reaches a terminal state
    pub async fn wait_until_done(&self) -> ItemState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(ItemState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    fn mark_running(&self) {
        self.times.lock().started_at = Some(Utc::now());
        self.state.send_replace(ItemState::Running);
    }

    fn mark_stopped(&self, state: ItemState) {
        self.times.lock().stopped_at = Some(Utc::now());
        self.state.send_replace(state);
    }

    fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id,
            name: self.name(),
            priority: self.priority(),
            state: self.state(),
            created_at: self.created_at,
            started_at: self.started_at(),
        }
    }
}

/// Serializable view of one item
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Serializable view of a queue, queued items in execution order
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub paused: bool,
    pub current: Option<ItemSnapshot>,
    pub queued: Vec<ItemSnapshot>,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound on how long an idle worker sleeps before re-checking
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

struct QueueState<T> {
    queued: Vec<Arc<QueueItem<T>>>,
    current: Option<Arc<QueueItem<T>>>,
    next_seq: u64,
    paused: bool,
}

pub struct PriorityQueue<T> {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState<T>>,
    notify: Notify,
    cancel: CancellationToken,
}

impl<T: QueueJob> PriorityQueue<T> {
    pub fn new(name: &str, config: QueueConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: Mutex::new(QueueState {
                queued: Vec::new(),
                current: None,
                next_seq: 0,
                paused: false,
            }),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job.
    ///
    /// Rejected when an equivalent job is queued, or running and the new job
    /// is exclusive while running.
    pub fn add_item(&self, job: T) -> Result<Arc<QueueItem<T>>, QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::ShutDown(self.name.clone()));
        }

        let mut state = self.state.lock();
        let queued_dup = state.queued.iter().any(|i| i.job.is_equivalent(&job));
        let running_dup = job.exclusive_while_running()
            && state
                .current
                .as_ref()
                .is_some_and(|i| i.job.is_equivalent(&job));
        if queued_dup || running_dup {
            return Err(QueueError::Duplicate(job.name()));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let item = Arc::new(QueueItem::new(job, seq));
        state.queued.push(item.clone());
        drop(state);

        debug!(queue = %self.name, item = %item.name(), priority = item.priority(), "Item queued");
        self.notify.notify_one();
        Ok(item)
    }

    /// Pop the highest priority item and make it current.
    ///
    /// Returns `None` when the queue is empty, paused, or an item is already
    /// running.
    pub fn next_item(&self) -> Option<Arc<QueueItem<T>>> {
        let mut state = self.state.lock();
        if state.paused || state.current.is_some() {
            return None;
        }

        let index = state
            .queued
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.priority()
                    .cmp(&b.priority())
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|(index, _)| index)?;

        let item = state.queued.remove(index);
        item.mark_running();
        state.current = Some(item.clone());
        Some(item)
    }

    /// Clear `current` before publishing the outcome, so a waiter woken by
    /// the terminal state can resubmit the same job right away.
    fn finish_item(&self, item: &Arc<QueueItem<T>>, outcome: ItemState) {
        let mut state = self.state.lock();
        if state.current.as_ref().is_some_and(|c| c.id == item.id) {
            state.current = None;
        }
        item.mark_stopped(outcome);
    }

    pub fn is_in_queue<P>(&self, predicate: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.state.lock().queued.iter().any(|i| predicate(&i.job))
    }

    pub fn is_being_processed<P>(&self, predicate: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|i| predicate(&i.job))
    }

    /// Queued items in execution order
    pub fn queued_items(&self) -> Vec<Arc<QueueItem<T>>> {
        let mut items = self.state.lock().queued.clone();
        items.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.seq.cmp(&b.seq))
        });
        items
    }

    pub fn current_item(&self) -> Option<Arc<QueueItem<T>>> {
        self.state.lock().current.clone()
    }

    /// Drop queued (not running) items matching `predicate`
    pub fn remove_queued<P>(&self, predicate: P) -> Vec<Arc<QueueItem<T>>>
    where
        P: Fn(&T) -> bool,
    {
        let mut state = self.state.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = state
            .queued
            .drain(..)
            .partition(|item| predicate(&item.job));
        state.queued = kept;
        drop(state);

        for item in &removed {
            item.mark_stopped(ItemState::Cancelled);
            debug!(queue = %self.name, item = %item.name(), "Queued item removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out items; the running one is unaffected
    pub fn pause(&self) {
        self.state.lock().paused = true;
        info!(queue = %self.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
        info!(queue = %self.name, "Queue resumed");
        self.notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let (paused, current) = {
            let state = self.state.lock();
            (state.paused, state.current.as_ref().map(|i| i.snapshot()))
        };
        QueueSnapshot {
            name: self.name.clone(),
            paused,
            current,
            queued: self.queued_items().iter().map(|i| i.snapshot()).collect(),
        }
    }

    /// Stop the worker once the running item (if any) completes
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn the worker.
    ///
    /// Each item runs in its own task so an error or a panic marks only that
    /// item failed. The loop exits only after [`shutdown`](Self::shutdown).
    pub fn start<F, Fut>(self: &Arc<Self>, processor: F) -> JoinHandle<()>
    where
        F: Fn(Arc<QueueItem<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let queue = self.clone();

        tokio::spawn(async move {
            info!(queue = %queue.name, "Queue worker started");

            loop {
                if queue.cancel.is_cancelled() {
                    break;
                }

                let Some(item) = queue.next_item() else {
                    tokio::select! {
                        _ = queue.cancel.cancelled() => break,
                        _ = queue.notify.notified() => {}
                        _ = tokio::time::sleep(queue.config.poll_interval) => {}
                    }
                    continue;
                };

                info!(queue = %queue.name, item = %item.name(), "Starting queue item");
                let outcome = match tokio::spawn(processor(item.clone())).await {
                    Ok(Ok(())) => ItemState::Finished,
                    Ok(Err(e)) => {
                        error!(queue = %queue.name, item = %item.name(), error = ?e, "Queue item failed");
                        ItemState::Failed
                    }
                    Err(e) => {
                        error!(queue = %queue.name, item = %item.name(), error = %e, "Queue item panicked");
                        ItemState::Failed
                    }
                };
                queue.finish_item(&item, outcome);

                if let Some(elapsed) = item.elapsed() {
                    debug!(
                        queue = %queue.name,
                        item = %item.name(),
                        elapsed_ms = elapsed.num_milliseconds(),
                        state = ?outcome,
                        "Queue item done"
                    );
                }
            }

            let pending = queue.len();
            if pending > 0 {
                warn!(queue = %queue.name, pending, "Queue worker stopped with items pending");
            } else {
                info!(queue = %queue.name, "Queue worker stopped");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct TestJob {
        label: &'static str,
        priority: i32,
        fail: bool,
        panic: bool,
    }

    impl TestJob {
        fn new(label: &'static str, priority: i32) -> Self {
            Self {
                label,
                priority,
                fail: false,
                panic: false,
            }
        }
    }

    impl QueueJob for TestJob {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn name(&self) -> String {
            self.label.to_string()
        }

        fn is_equivalent(&self, other: &Self) -> bool {
            self.label == other.label
        }
    }

    fn recording_worker(
        queue: &Arc<PriorityQueue<TestJob>>,
    ) -> (JoinHandle<()>, Arc<Mutex<Vec<&'static str>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let handle = queue.start(move |item: Arc<QueueItem<TestJob>>| {
            let recorder = recorder.clone();
            async move {
                let job = item.job();
                recorder.lock().push(job.label);
                if job.panic {
                    panic!("boom");
                }
                if job.fail {
                    anyhow::bail!("failed on purpose");
                }
                Ok(())
            }
        });
        (handle, seen)
    }

    fn test_queue() -> Arc<PriorityQueue<TestJob>> {
        Arc::new(PriorityQueue::new(
            "test",
            QueueConfig {
                poll_interval: Duration::from_millis(10),
            },
        ))
    }

    #[test]
    fn test_next_item_priority_then_insertion_order() {
        let queue = test_queue();
        queue.add_item(TestJob::new("normal-1", PRIORITY_NORMAL)).unwrap();
        queue.add_item(TestJob::new("high", PRIORITY_HIGH)).unwrap();
        queue.add_item(TestJob::new("normal-2", PRIORITY_NORMAL)).unwrap();
        queue.add_item(TestJob::new("remove", PRIORITY_REMOVE)).unwrap();

        let mut order = Vec::new();
        while let Some(item) = queue.next_item() {
            order.push(item.name());
            queue.finish_item(&item, ItemState::Finished);
        }
        assert_eq!(order, vec!["remove", "high", "normal-1", "normal-2"]);
    }

    #[test]
    fn test_duplicate_rejected_while_queued_and_running() {
        let queue = test_queue();
        queue.add_item(TestJob::new("a", PRIORITY_NORMAL)).unwrap();
        assert_eq!(
            queue.add_item(TestJob::new("a", PRIORITY_NORMAL)).err(),
            Some(QueueError::Duplicate("a".to_string()))
        );

        let running = queue.next_item().unwrap();
        assert!(queue.add_item(TestJob::new("a", PRIORITY_NORMAL)).is_err());
        assert!(queue.is_being_processed(|j| j.label == "a"));

        queue.finish_item(&running, ItemState::Finished);
        assert!(queue.add_item(TestJob::new("a", PRIORITY_NORMAL)).is_ok());
    }

    #[test]
    fn test_remove_queued_marks_cancelled() {
        let queue = test_queue();
        let a = queue.add_item(TestJob::new("a", PRIORITY_NORMAL)).unwrap();
        queue.add_item(TestJob::new("b", PRIORITY_NORMAL)).unwrap();

        let removed = queue.remove_queued(|j| j.label == "a");
        assert_eq!(removed.len(), 1);
        assert_eq!(a.state(), ItemState::Cancelled);
        assert!(!queue.is_in_queue(|j| j.label == "a"));
        assert!(queue.is_in_queue(|j| j.label == "b"));
    }

    #[test]
    fn test_paused_queue_hands_out_nothing() {
        let queue = test_queue();
        queue.add_item(TestJob::new("a", PRIORITY_NORMAL)).unwrap();
        queue.pause();
        assert!(queue.next_item().is_none());
        queue.resume();
        assert!(queue.next_item().is_some());
    }

    #[tokio::test]
    async fn test_worker_survives_failures_and_panics() {
        let queue = test_queue();
        let failing = queue
            .add_item(TestJob {
                fail: true,
                ..TestJob::new("fails", PRIORITY_HIGH)
            })
            .unwrap();
        let panicking = queue
            .add_item(TestJob {
                panic: true,
                ..TestJob::new("panics", PRIORITY_NORMAL)
            })
            .unwrap();
        let healthy = queue.add_item(TestJob::new("ok", PRIORITY_LOW)).unwrap();

        let (handle, seen) = recording_worker(&queue);

        assert_eq!(healthy.wait_until_done().await, ItemState::Finished);
        assert_eq!(failing.state(), ItemState::Failed);
        assert_eq!(panicking.state(), ItemState::Failed);
        assert_eq!(*seen.lock(), vec!["fails", "panics", "ok"]);
        assert!(healthy.elapsed().is_some());

        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_picks_up_items_added_later() {
        let queue = test_queue();
        let (handle, seen) = recording_worker(&queue);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let item = queue.add_item(TestJob::new("late", PRIORITY_NORMAL)).unwrap();
        assert_eq!(item.wait_until_done().await, ItemState::Finished);
        assert_eq!(*seen.lock(), vec!["late"]);

        queue.shutdown();
        handle.await.unwrap();
        assert!(queue.is_shut_down());
        assert!(matches!(
            queue.add_item(TestJob::new("after", PRIORITY_NORMAL)),
            Err(QueueError::ShutDown(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resubmit_right_after_finish_accepted() {
        let queue = test_queue();
        let (handle, _seen) = recording_worker(&queue);

        for _ in 0..100 {
            let item = queue.add_item(TestJob::new("again", PRIORITY_NORMAL)).unwrap();
            assert_eq!(item.wait_until_done().await, ItemState::Finished);
            assert!(queue.current_item().is_none());
            assert!(!queue.is_being_processed(|job| job.label == "again"));
        }

        queue.shutdown();
        handle.await.unwrap();
    }

    #[test]
    fn test_snapshot_lists_execution_order() {
        let queue = test_queue();
        queue.add_item(TestJob::new("low", PRIORITY_LOW)).unwrap();
        queue.add_item(TestJob::new("high", PRIORITY_HIGH)).unwrap();

        let snapshot = queue.snapshot();
        let names: Vec<_> = snapshot.queued.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
        assert!(snapshot.current.is_none());
    }
}
