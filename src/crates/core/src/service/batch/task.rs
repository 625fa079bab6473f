//! Batch task lifecycle and pub/sub
//!
//! An in-process registry of batch jobs that publish incremental progress
//! to many SSE subscribers. One producer (the worker pool) mutates
//! counters; subscribers only see events delivered through their channel.
//! Terminal events are recorded on the task and replayed to late
//! subscribers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default retention after the terminal event.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Done,
    Error,
    Cancelled,
}

/// Point-in-time view of a task, carried by the `init` event.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub total: u64,
    pub processed: u64,
    pub ok: u64,
    pub fail: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Events published to subscribers, each encoded as one SSE `data:` line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskEvent {
    Init {
        #[serde(flatten)]
        snapshot: TaskSnapshot,
    },
    Progress {
        processed: u64,
        total: u64,
        ok: u64,
        fail: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        item: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Done {
        result: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Error {
        error: String,
    },
    Cancelled {
        processed: u64,
        ok: u64,
        fail: u64,
    },
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Done { .. } | TaskEvent::Error { .. } | TaskEvent::Cancelled { .. }
        )
    }
}

/// One processed item, recorded by the worker pool.
#[derive(Debug, Clone, Default)]
pub struct RecordOutcome {
    pub ok: bool,
    pub item: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn succeeded(item: impl Into<String>) -> Self {
        Self {
            ok: true,
            item: Some(item.into()),
            ..Self::default()
        }
    }

    pub fn failed(item: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            item: Some(item.into()),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A live subscription: drain `receiver`, then hand `id` back to
/// [`BatchTask::unsubscribe`].
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<TaskEvent>,
}

/// Either the terminal event (late subscriber) or a live subscription.
pub enum Attach {
    Final(TaskEvent),
    Live(Subscription),
}

struct TaskState {
    total: u64,
    processed: u64,
    ok: u64,
    fail: u64,
    status: TaskStatus,
    warning: Option<String>,
    final_event: Option<TaskEvent>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<TaskEvent>>,
    next_subscriber: u64,
}

/// One batch job. Counters hold `processed == ok + fail` at every
/// observable moment; `status` only ever leaves `running` once, and the
/// terminal event set alongside it is immutable.
pub struct BatchTask {
    id: String,
    created_at: DateTime<Utc>,
    cancelled: AtomicBool,
    state: Mutex<TaskState>,
}

impl BatchTask {
    pub fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(TaskState {
                total,
                processed: 0,
                ok: 0,
                fail: 0,
                status: TaskStatus::Running,
                warning: None,
                final_event: None,
                subscribers: HashMap::new(),
                next_subscriber: 0,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Request cooperative cancellation. Workers check this between
    /// items; the terminal transition happens in `finish_cancelled` once
    /// the pool drains.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock_state();
        snapshot_of(&self.id, &state)
    }

    pub fn final_event(&self) -> Option<TaskEvent> {
        self.lock_state().final_event.clone()
    }

    /// Record one processed item and publish a `progress` event.
    pub fn record(&self, outcome: RecordOutcome) {
        let mut state = self.lock_state();
        if state.status != TaskStatus::Running {
            warn!("record on terminated task {}", self.id);
            return;
        }
        state.processed += 1;
        if outcome.ok {
            state.ok += 1;
        } else {
            state.fail += 1;
        }
        let event = TaskEvent::Progress {
            processed: state.processed,
            total: state.total,
            ok: state.ok,
            fail: state.fail,
            item: outcome.item,
            detail: outcome.detail,
            error: outcome.error,
        };
        publish(&mut state, event);
    }

    /// Terminal transition: success.
    pub fn finish(&self, result: serde_json::Value, warning: Option<String>) {
        self.terminate(TaskStatus::Done, |state| {
            state.warning = warning.clone();
            TaskEvent::Done {
                result: result.clone(),
                warning: warning.clone(),
            }
        });
    }

    /// Terminal transition: failure.
    pub fn fail_task(&self, error: impl Into<String>) {
        let error = error.into();
        self.terminate(TaskStatus::Error, |_| TaskEvent::Error {
            error: error.clone(),
        });
    }

    /// Terminal transition after a cancelled pool drains.
    pub fn finish_cancelled(&self) {
        self.terminate(TaskStatus::Cancelled, |state| TaskEvent::Cancelled {
            processed: state.processed,
            ok: state.ok,
            fail: state.fail,
        });
    }

    /// Subscribe; events arrive in publish order on the returned channel.
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.lock_state();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(id, tx);
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock_state().subscribers.remove(&id);
    }

    /// Snapshot plus either the final event or a live subscription,
    /// resolved under one lock so a terminal event published in between
    /// cannot be missed.
    pub fn attach(&self) -> (TaskSnapshot, Attach) {
        let mut state = self.lock_state();
        let snapshot = snapshot_of(&self.id, &state);
        if let Some(event) = state.final_event.clone() {
            return (snapshot, Attach::Final(event));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(id, tx);
        (snapshot, Attach::Live(Subscription { id, receiver: rx }))
    }

    fn terminate(
        &self,
        status: TaskStatus,
        build_event: impl FnOnce(&mut TaskState) -> TaskEvent,
    ) {
        let mut state = self.lock_state();
        if state.final_event.is_some() {
            warn!("duplicate terminal transition on task {}", self.id);
            return;
        }
        state.status = status;
        let event = build_event(&mut state);
        state.final_event = Some(event.clone());
        publish(&mut state, event);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn snapshot_of(id: &str, state: &TaskState) -> TaskSnapshot {
    TaskSnapshot {
        id: id.to_string(),
        status: state.status,
        total: state.total,
        processed: state.processed,
        ok: state.ok,
        fail: state.fail,
        warning: state.warning.clone(),
    }
}

/// Deliver to every subscriber; a closed channel is the subscriber's
/// problem, not the producer's.
fn publish(state: &mut TaskState, event: TaskEvent) {
    state
        .subscribers
        .retain(|_, tx| tx.send(event.clone()).is_ok());
}

/// Process-wide task registry, owned by server startup state.
#[derive(Clone)]
pub struct BatchTaskRegistry {
    tasks: Arc<DashMap<String, Arc<BatchTask>>>,
}

impl BatchTaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Allocate a task and insert it into the registry.
    pub fn create(&self, total: u64) -> Arc<BatchTask> {
        let task = BatchTask::new(total);
        self.tasks.insert(task.id().to_string(), task.clone());
        task
    }

    pub fn get(&self, id: &str) -> Option<Arc<BatchTask>> {
        self.tasks.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// One-shot delayed delete; the sole release path for tasks.
    pub fn expire(&self, id: &str, delay: Duration) {
        let tasks = self.tasks.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tasks.remove(&id);
        });
    }
}

impl Default for BatchTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
