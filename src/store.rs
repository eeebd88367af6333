//! Transient, bounded registry of recent job executions.
//!
//! [`ResultStore`] keeps at most `capacity` records, evicting the oldest on
//! overflow. Every mutation is fanned out to the subscribers registered with
//! its [`Broadcaster`] while the store lock is held, so observers see
//! notifications in mutation order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::execution::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreEventType {
    Insert,
    Update,
    Delete,
}

/// Notification pushed to observers on every store mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEvent {
    pub event_type: StoreEventType,
    pub job_id: String,
    pub context: ExecutionContext,
    pub data: Value,
    /// Milliseconds since the Unix epoch.
    pub sent_at: i64,
}

impl StoreEvent {
    fn new(event_type: StoreEventType, context: &ExecutionContext, data: Value) -> Self {
        Self {
            event_type,
            job_id: context.job_id().to_string(),
            context: context.clone(),
            data,
            sent_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Receiving half handed to an observer.
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::UnboundedReceiver<Arc<StoreEvent>>,
}

/// Explicit set of observers with failure-isolated fan-out.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Arc<StoreEvent>>>>,
}

impl Broadcaster {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<Arc<StoreEvent>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().insert(id, sender);
        tracing::debug!(subscriber = %id, "Subscriber registered");
        Subscription { id, receiver }
    }

    pub fn unregister(&self, id: &Uuid) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, "Subscriber unregistered");
        }
        removed
    }

    /// Delivers `event` to every subscriber. A subscriber whose receiver is
    /// gone is dropped without affecting the others.
    pub fn send(&self, event: StoreEvent) {
        let event = Arc::new(event);
        self.lock().retain(|id, sender| match sender.send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(subscriber = %id, "Dropping closed subscriber");
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// A stored snapshot of one job's execution context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub context: ExecutionContext,
    /// Insertion order, increasing.
    pub sequence: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    order: VecDeque<String>,
    next_sequence: u64,
}

pub struct ResultStore {
    capacity: usize,
    inner: Mutex<Inner>,
    broadcaster: Broadcaster,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
            broadcaster: Broadcaster::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a new job. Returns `false` without touching anything when the
    /// id is already present.
    pub fn insert(&self, job_id: &str, context: ExecutionContext) -> bool {
        let mut inner = self.lock();
        if inner.records.contains_key(job_id) {
            tracing::debug!(job_id, "Job already present in store, skipping insert");
            return false;
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let data = json!({ "phase": context.phase, "sequence": sequence });
        self.broadcaster
            .send(StoreEvent::new(StoreEventType::Insert, &context, data));
        inner.records.insert(
            job_id.to_string(),
            JobRecord {
                job_id: job_id.to_string(),
                context,
                sequence,
            },
        );
        inner.order.push_back(job_id.to_string());

        while inner.order.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.records.remove(&oldest) {
                tracing::debug!(job_id = %oldest, "Evicting oldest job record");
                self.broadcaster.send(StoreEvent::new(
                    StoreEventType::Delete,
                    &evicted.context,
                    json!({}),
                ));
            }
        }
        true
    }

    /// Replaces the context of a tracked job. Returns `false` when the id is
    /// unknown.
    pub fn update(&self, job_id: &str, context: ExecutionContext) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(job_id) else {
            tracing::debug!(job_id, "Job not present in store, skipping update");
            return false;
        };
        let data = json!({ "phase": context.phase, "sequence": record.sequence });
        self.broadcaster
            .send(StoreEvent::new(StoreEventType::Update, &context, data));
        record.context = context;
        true
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.lock().records.get(job_id).cloned()
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.register()
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.broadcaster.unregister(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.len()
    }
}
