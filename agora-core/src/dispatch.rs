//! Typed publish/subscribe bus with a bounded worker pool.
//!
//! Publication enqueues one job per subscriber. Jobs are sharded by subscriber
//! over `workers` bounded queues, so every subscriber is served by exactly one
//! worker and sees values in publication order. A full queue blocks the
//! publisher; a full subscriber channel drops the value for that subscriber
//! only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;

use crate::sync::{lock, read, write};
use agora_types::{AgoraError, DeliveryId, TopicId};

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

const SUBSYSTEM: &str = "dispatch";

struct Slot<T> {
    id: DeliveryId,
    topic: TopicId,
    shard: usize,
    tx: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> Slot<T> {
    /// Drop the sender; after this no worker can write to the pipe.
    fn close(&self) {
        lock(&self.tx).take();
    }
}

struct Job<T> {
    slot: Arc<Slot<T>>,
    value: T,
}

struct Shared<T> {
    state: AtomicU8,
    topics: RwLock<HashMap<TopicId, Vec<Arc<Slot<T>>>>>,
    queues: RwLock<Vec<mpsc::Sender<Job<T>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_shard: AtomicUsize,
    pipe_capacity: usize,
    dropped: AtomicU64,
}

impl<T> Shared<T> {
    fn unroute(&self, slot: &Slot<T>) {
        let mut topics = write(&self.topics);
        if let Some(subs) = topics.get_mut(&slot.topic) {
            subs.retain(|s| s.id != slot.id);
        }
    }
}

/// Typed broadcast bus. Cloning yields another handle to the same bus.
pub struct Dispatcher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .field("topics", &self.topic_count())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<T> Dispatcher<T> {
    /// Create a stopped dispatcher whose pipes buffer `pipe_capacity` values.
    #[must_use]
    pub fn new(pipe_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(STOPPED),
                topics: RwLock::new(HashMap::new()),
                queues: RwLock::new(Vec::new()),
                workers: Mutex::new(Vec::new()),
                next_shard: AtomicUsize::new(0),
                pipe_capacity: pipe_capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// True while workers are accepting jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == RUNNING
    }

    /// Register a new topic. Allowed in any state.
    pub fn register_topic(&self) -> TopicId {
        let id = TopicId::new();
        write(&self.shared.topics).insert(id, Vec::new());
        id
    }

    /// Remove a topic and close its pipes.
    pub fn unregister_topic(&self, topic: TopicId) -> bool {
        let removed = write(&self.shared.topics).remove(&topic);
        match removed {
            Some(subs) => {
                for slot in subs {
                    slot.close();
                }
                true
            }
            None => false,
        }
    }

    /// Release `pipe`. Same as [`Pipe::release`].
    pub fn release(&self, pipe: &mut Pipe<T>) {
        pipe.release();
    }

    /// Number of registered topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        read(&self.shared.topics).len()
    }

    /// Number of live pipes on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: TopicId) -> usize {
        read(&self.shared.topics).get(&topic).map_or(0, Vec::len)
    }

    /// Values dropped because a subscriber channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// Spawn `workers` delivery tasks sharing `job_queue_limit` queue slots.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self, workers: usize, job_queue_limit: usize) -> Result<(), AgoraError> {
        if workers == 0 {
            return Err(AgoraError::ConfigInvalid(
                "dispatcher needs at least one worker".into(),
            ));
        }
        self.shared
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AgoraError::already_started(SUBSYSTEM))?;

        let per_worker = (job_queue_limit / workers).max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel::<Job<T>>(per_worker);
            queues.push(tx);
            handles.push(tokio::spawn(worker_loop(rx, Arc::downgrade(&self.shared))));
        }
        *write(&self.shared.queues) = queues;
        *lock(&self.shared.workers) = handles;
        self.shared.state.store(RUNNING, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!(workers, per_worker, "dispatcher started");
        Ok(())
    }

    /// Close every live pipe, stop the workers and wait for them.
    ///
    /// Registered topics survive and can be subscribed to after a restart.
    pub async fn stop(&self) -> Result<(), AgoraError> {
        self.shared
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AgoraError::not_started(SUBSYSTEM))?;

        {
            let mut topics = write(&self.shared.topics);
            for subs in topics.values_mut() {
                for slot in subs.drain(..) {
                    slot.close();
                }
            }
        }
        write(&self.shared.queues).clear();
        let handles = std::mem::take(&mut *lock(&self.shared.workers));
        for h in handles {
            let _ = h.await;
        }
        self.shared.state.store(STOPPED, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!("dispatcher stopped");
        Ok(())
    }

    /// Subscribe to `topic`.
    ///
    /// Fails with `DispatcherNotRunning` while stopped and `NotFound` for an
    /// unknown topic.
    pub fn subscribe(&self, topic: TopicId) -> Result<Pipe<T>, AgoraError> {
        let mut topics = write(&self.shared.topics);
        if !self.is_running() {
            return Err(AgoraError::DispatcherNotRunning);
        }
        let subs = topics
            .get_mut(&topic)
            .ok_or_else(|| AgoraError::not_found(format!("topic {topic}")))?;

        let (tx, rx) = mpsc::channel(self.shared.pipe_capacity);
        let slot = Arc::new(Slot {
            id: DeliveryId::new(),
            topic,
            shard: self.shared.next_shard.fetch_add(1, Ordering::Relaxed),
            tx: Mutex::new(Some(tx)),
        });
        subs.push(Arc::clone(&slot));
        drop(topics);

        Ok(Pipe {
            rx,
            slot,
            shared: Arc::downgrade(&self.shared),
            released: false,
        })
    }

    /// Enqueue `value` for every current subscriber of `topic`.
    ///
    /// Waits while a worker queue is full. Publishing to an unknown topic or a
    /// topic without subscribers is a no-op.
    pub async fn publish(&self, topic: TopicId, value: T) -> Result<(), AgoraError> {
        if !self.is_running() {
            return Err(AgoraError::DispatcherNotRunning);
        }
        let subs: Vec<Arc<Slot<T>>> = match read(&self.shared.topics).get(&topic) {
            Some(subs) if !subs.is_empty() => subs.clone(),
            _ => return Ok(()),
        };
        for slot in subs {
            let queue = {
                let queues = read(&self.shared.queues);
                if queues.is_empty() {
                    return Err(AgoraError::DispatcherNotRunning);
                }
                queues[slot.shard % queues.len()].clone()
            };
            let job = Job {
                slot,
                value: value.clone(),
            };
            if queue.send(job).await.is_err() {
                return Err(AgoraError::CapacityExhausted(
                    "dispatch queue closed".into(),
                ));
            }
        }
        Ok(())
    }
}

async fn worker_loop<T>(mut rx: mpsc::Receiver<Job<T>>, shared: Weak<Shared<T>>) {
    while let Some(Job { slot, value }) = rx.recv().await {
        let guard = lock(&slot.tx);
        let Some(tx) = guard.as_ref() else {
            continue;
        };
        match tx.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if let Some(shared) = shared.upgrade() {
                    shared.dropped.fetch_add(1, Ordering::Relaxed);
                }
                #[cfg(feature = "tracing")]
                tracing::trace!(delivery = %slot.id, topic = %slot.topic, "subscriber full, value dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Receiving end of a subscription.
///
/// Dropping a pipe releases it.
pub struct Pipe<T> {
    rx: mpsc::Receiver<T>,
    slot: Arc<Slot<T>>,
    shared: Weak<Shared<T>>,
    released: bool,
}

impl<T> std::fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.slot.id)
            .field("topic", &self.slot.topic)
            .field("released", &self.released)
            .finish()
    }
}

impl<T> Pipe<T> {
    /// Delivery id of this pipe.
    #[must_use]
    pub fn id(&self) -> DeliveryId {
        self.slot.id
    }

    /// Topic this pipe is subscribed to.
    #[must_use]
    pub fn topic(&self) -> TopicId {
        self.slot.topic
    }

    /// Wait for the next value; `None` once the pipe is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a buffered value without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// True once the pipe was released.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Unsubscribe and discard buffered values. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(shared) = self.shared.upgrade() {
            shared.unroute(&self.slot);
        }
        self.slot.close();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl<T> Drop for Pipe<T> {
    fn drop(&mut self) {
        self.release();
    }
}
