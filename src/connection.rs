use crate::error::{PipelineError, Result};
use crate::strategy::ConsumptionStrategy;
use crate::task::{Acknowledgment, Task, TaskId};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Observable state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No task waiting
    Empty,
    /// Some, but not all, slots are occupied
    Pending,
    /// Every slot is occupied; producers block
    Full,
    /// Shutdown in progress; every call fails with `Shutdown`
    Draining,
}

/// Counters kept by a connection over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub produced: u64,
    pub consumed: u64,
    pub acknowledged: u64,
    pub failed: u64,
    /// Tasks discarded by `LatestOnly` consumers or by `drain`
    pub discarded: u64,
    /// Number of `produce` calls that had to wait for a free slot
    pub producer_waits: u64,
}

struct Slots<T> {
    queue: VecDeque<Task<T>>,
    next_id: u64,
    draining: bool,
    producer_bound: bool,
    consumer_bound: bool,
    producer_gone: bool,
    consumer_gone: bool,
    outstanding: BTreeSet<TaskId>,
    last_ack: Option<Acknowledgment>,
    stats: ConnectionStats,
}

/// A typed, bounded rendezvous between one producing and one consuming stage.
///
/// All mutation of the slot queue happens under the connection's own lock;
/// `produce` and `consume` are the only calls that block.
pub struct Connection<T> {
    name: String,
    capacity: usize,
    slots: Mutex<Slots<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T: Send> Connection<T> {
    /// Create a connection with `capacity` slots (clamped to at least 1)
    pub fn new(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        let name = name.into();
        if capacity == 0 {
            warn!(connection = %name, "capacity 0 requested, using synchronous handoff");
        }
        Arc::new(Self {
            name,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots {
                queue: VecDeque::with_capacity(capacity.max(1)),
                next_id: 1,
                draining: false,
                producer_bound: false,
                consumer_bound: false,
                producer_gone: false,
                consumer_gone: false,
                outstanding: BTreeSet::new(),
                last_ack: None,
                stats: ConnectionStats::default(),
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    /// Single-slot connection, the fully synchronous handoff
    pub fn synchronous(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim the producing end. Each connection accepts exactly one producer.
    pub fn bind_producer(self: &Arc<Self>) -> Result<OutStageConnection<T>> {
        let mut slots = self.slots.lock();
        if slots.draining || slots.consumer_gone {
            return Err(PipelineError::ConnectionClosed);
        }
        if slots.producer_bound {
            return Err(PipelineError::AlreadyBound { role: "producer" });
        }
        slots.producer_bound = true;
        Ok(OutStageConnection {
            connection: Arc::clone(self),
            disconnect_on_drop: true,
        })
    }

    /// Claim the consuming end. Each connection accepts exactly one consumer.
    pub fn bind_consumer(self: &Arc<Self>) -> Result<InStageConnection<T>> {
        let mut slots = self.slots.lock();
        if slots.draining || slots.producer_gone {
            return Err(PipelineError::ConnectionClosed);
        }
        if slots.consumer_bound {
            return Err(PipelineError::AlreadyBound { role: "consumer" });
        }
        slots.consumer_bound = true;
        Ok(InStageConnection {
            connection: Arc::clone(self),
            disconnect_on_drop: true,
        })
    }

    /// Hand a payload to the connection, blocking while every slot is full.
    ///
    /// Fails with `Shutdown` if the connection is draining or its consumer is gone;
    /// the payload is never silently dropped.
    pub fn produce(&self, payload: T) -> Result<TaskId> {
        let mut slots = self.slots.lock();
        let mut waited = false;
        loop {
            if slots.draining || slots.consumer_gone {
                return Err(PipelineError::Shutdown);
            }
            if slots.queue.len() < self.capacity {
                break;
            }
            if !waited {
                slots.stats.producer_waits += 1;
                waited = true;
            }
            self.not_full.wait(&mut slots);
        }

        let id = TaskId::new(slots.next_id);
        slots.next_id += 1;
        slots.queue.push_back(Task::new(id, payload));
        slots.stats.produced += 1;
        drop(slots);

        debug!(connection = %self.name, task_id = %id, "task produced");
        self.not_empty.notify_one();
        Ok(id)
    }

    /// Blocking consume, equivalent to `ConsumptionStrategy::BlockingWait`
    pub fn consume(&self) -> Result<Task<T>> {
        loop {
            if let Some(task) = self.consume_with(&ConsumptionStrategy::BlockingWait)? {
                return Ok(task);
            }
        }
    }

    /// Take the next task according to `strategy`.
    ///
    /// Returns `Ok(None)` only when a `BoundedPoll` timeout elapses with no data.
    pub fn consume_with(&self, strategy: &ConsumptionStrategy) -> Result<Option<Task<T>>> {
        let deadline = match strategy {
            ConsumptionStrategy::BoundedPoll(timeout) => Some(Instant::now() + *timeout),
            _ => None,
        };

        let mut slots = self.slots.lock();
        loop {
            if slots.draining {
                return Err(PipelineError::Shutdown);
            }
            if !slots.queue.is_empty() {
                break;
            }
            if slots.producer_gone {
                return Err(PipelineError::Shutdown);
            }
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut slots, deadline).timed_out()
                        && slots.queue.is_empty()
                        && !slots.draining
                        && !slots.producer_gone
                    {
                        return Ok(None);
                    }
                }
                None => self.not_empty.wait(&mut slots),
            }
        }

        if strategy.is_lossy() && slots.queue.len() > 1 {
            let stale = slots.queue.len() - 1;
            slots.queue.drain(..stale);
            slots.stats.discarded += stale as u64;
            debug!(connection = %self.name, discarded = stale, "stale tasks discarded");
        }

        let task = match slots.queue.pop_front() {
            Some(task) => task,
            None => return Err(PipelineError::Shutdown),
        };
        slots.outstanding.insert(task.id());
        slots.stats.consumed += 1;
        drop(slots);

        debug!(connection = %self.name, task_id = %task.id(), "task consumed");
        self.not_full.notify_all();
        Ok(Some(task))
    }

    /// Report the outcome for a consumed task and retire its identifier.
    ///
    /// A failed acknowledgment is recorded, never retried by the connection.
    pub fn acknowledge(&self, task_id: TaskId, success: bool) -> Result<()> {
        let mut slots = self.slots.lock();
        if !slots.outstanding.remove(&task_id) {
            return Err(PipelineError::UnknownTask(task_id));
        }
        slots.stats.acknowledged += 1;
        if !success {
            slots.stats.failed += 1;
        }
        slots.last_ack = Some(Acknowledgment { task_id, success });
        drop(slots);

        if success {
            debug!(connection = %self.name, task_id = %task_id, "task acknowledged");
        } else {
            warn!(connection = %self.name, task_id = %task_id, "task failed");
        }
        Ok(())
    }

    /// Begin shutdown: wake every blocked caller with `Shutdown` and reject
    /// further `produce`/`consume` calls. Idempotent.
    pub fn drain(&self) {
        let mut slots = self.slots.lock();
        if slots.draining {
            return;
        }
        slots.draining = true;
        let pending = slots.queue.len();
        slots.queue.clear();
        slots.stats.discarded += pending as u64;
        drop(slots);

        if pending > 0 {
            warn!(connection = %self.name, pending, "connection drained with pending tasks");
        } else {
            debug!(connection = %self.name, "connection drained");
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_draining(&self) -> bool {
        self.slots.lock().draining
    }

    pub fn state(&self) -> ConnectionState {
        let slots = self.slots.lock();
        if slots.draining {
            ConnectionState::Draining
        } else if slots.queue.is_empty() {
            ConnectionState::Empty
        } else if slots.queue.len() >= self.capacity {
            ConnectionState::Full
        } else {
            ConnectionState::Pending
        }
    }

    /// Number of tasks waiting to be consumed
    pub fn len(&self) -> usize {
        self.slots.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks handed to the consumer and not yet acknowledged
    pub fn outstanding(&self) -> usize {
        self.slots.lock().outstanding.len()
    }

    pub fn last_acknowledgment(&self) -> Option<Acknowledgment> {
        self.slots.lock().last_ack
    }

    pub fn stats(&self) -> ConnectionStats {
        self.slots.lock().stats
    }

    fn release_producer(&self) {
        self.slots.lock().producer_gone = true;
        debug!(connection = %self.name, "producer disconnected");
        self.not_empty.notify_all();
    }

    fn unbind_producer(&self) {
        self.slots.lock().producer_bound = false;
    }

    fn unbind_consumer(&self) {
        self.slots.lock().consumer_bound = false;
    }

    fn release_consumer(&self) {
        self.slots.lock().consumer_gone = true;
        debug!(connection = %self.name, "consumer disconnected");
        self.not_full.notify_all();
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Type-erased view used by the pipeline to shut connections down
pub trait Drainable: Send + Sync {
    fn name(&self) -> &str;
    fn drain(&self);
    fn is_draining(&self) -> bool;
    fn state(&self) -> ConnectionState;
}

impl<T: Send> Drainable for Connection<T> {
    fn name(&self) -> &str {
        Connection::name(self)
    }

    fn drain(&self) {
        Connection::drain(self)
    }

    fn is_draining(&self) -> bool {
        Connection::is_draining(self)
    }

    fn state(&self) -> ConnectionState {
        Connection::state(self)
    }
}

/// Producing end of a connection, owned by exactly one stage.
///
/// Dropping it lets the consumer finish the queued tasks and then observe `Shutdown`.
pub struct OutStageConnection<T: Send> {
    connection: Arc<Connection<T>>,
    disconnect_on_drop: bool,
}

impl<T: Send> OutStageConnection<T> {
    pub fn produce(&self, payload: T) -> Result<TaskId> {
        self.connection.produce(payload)
    }

    /// Give the end back without signalling end of stream, for rolling back a
    /// stage construction that failed after binding
    pub(crate) fn unbind(mut self) {
        self.disconnect_on_drop = false;
    }

    pub fn connection(&self) -> &Arc<Connection<T>> {
        &self.connection
    }
}

impl<T: Send> Drop for OutStageConnection<T> {
    fn drop(&mut self) {
        if self.disconnect_on_drop {
            self.connection.release_producer();
        } else {
            self.connection.unbind_producer();
        }
    }
}

/// Consuming end of a connection, owned by exactly one stage.
///
/// Dropping it makes further `produce` calls fail with `Shutdown`.
pub struct InStageConnection<T: Send> {
    connection: Arc<Connection<T>>,
    disconnect_on_drop: bool,
}

impl<T: Send> InStageConnection<T> {
    /// Give the end back without closing the connection, for rolling back a
    /// stage construction that failed after binding
    pub(crate) fn unbind(mut self) {
        self.disconnect_on_drop = false;
    }

    pub fn consume(&self) -> Result<Task<T>> {
        self.connection.consume()
    }

    pub fn consume_with(&self, strategy: &ConsumptionStrategy) -> Result<Option<Task<T>>> {
        self.connection.consume_with(strategy)
    }

    pub fn acknowledge(&self, task_id: TaskId, success: bool) -> Result<()> {
        self.connection.acknowledge(task_id, success)
    }

    pub fn connection(&self) -> &Arc<Connection<T>> {
        &self.connection
    }
}

impl<T: Send> Drop for InStageConnection<T> {
    fn drop(&mut self) {
        if self.disconnect_on_drop {
            self.connection.release_consumer();
        } else {
            self.connection.unbind_consumer();
        }
    }
}
