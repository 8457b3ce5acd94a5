use std::fmt;

/// Identifier assigned by a connection at production time.
///
/// Identifiers are strictly increasing and gap-free per connection, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of work in transit between two stages.
///
/// The task is moved, never shared: the producer hands it to the connection,
/// the connection hands it to exactly one consumer.
#[derive(Debug)]
pub struct Task<T> {
    id: TaskId,
    payload: T,
}

impl<T> Task<T> {
    pub(crate) fn new(id: TaskId, payload: T) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Take ownership of the payload, keeping the id for acknowledgment
    pub fn into_parts(self) -> (TaskId, T) {
        (self.id, self.payload)
    }
}

/// Outcome a consumer reported for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    pub task_id: TaskId,
    pub success: bool,
}
