use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Which connections a stage type requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Only an outbound connection
    Producer,
    /// Only an inbound connection
    Consumer,
    /// Both an inbound and an outbound connection
    ProducerConsumer,
}

impl Capability {
    pub const fn needs_input(self) -> bool {
        matches!(self, Capability::Consumer | Capability::ProducerConsumer)
    }

    pub const fn needs_output(self) -> bool {
        matches!(self, Capability::Producer | Capability::ProducerConsumer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Producer => "producer",
            Capability::Consumer => "consumer",
            Capability::ProducerConsumer => "producer-consumer",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of consuming one inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ack {
    /// Processed; acknowledge success
    Ok,
    /// Transient failure; the retry policy may invoke `consume` again
    Retry,
    /// Permanent failure; acknowledge it without retrying
    Fail,
}

impl Ack {
    pub fn is_ok(self) -> bool {
        self == Ack::Ok
    }
}

impl From<bool> for Ack {
    fn from(success: bool) -> Self {
        if success {
            Ack::Ok
        } else {
            Ack::Fail
        }
    }
}

/// Result of transforming one inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Hand the value downstream; the input is acknowledged once the handoff succeeds
    Emit(T),
    /// Accept the input without producing output
    Skip,
    /// Acknowledge the input as failed
    Fail,
}

/// A unit of pipeline computation.
///
/// The declared [`Capability`] selects which of `produce`, `consume` or
/// `transform` the execution loop calls; the others keep their defaults.
/// Pure producers use `()` as `In`, pure consumers use `()` as `Out`.
pub trait Stage: Send + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    const CAPABILITY: Capability;

    /// Human-readable name used in diagnostics
    fn name(&self) -> &str;

    /// Called on the stage thread before the loop starts
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on the stage thread after the loop exits, also after failures
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Generate the next payload; `None` ends the stream
    fn produce(&mut self) -> Option<Self::Out> {
        None
    }

    /// Handle one payload. Only [`Ack::Retry`] is subject to the retry policy.
    fn consume(&mut self, _input: &Self::In) -> Ack {
        Ack::Fail
    }

    fn transform(&mut self, _input: Self::In) -> Outcome<Self::Out> {
        Outcome::Fail
    }
}

/// Lifecycle of a stage thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Constructed and wired, not started
    Idle,
    Running,
    /// Loop exited cleanly
    Stopped,
    /// Loop or lifecycle hook returned an error
    Failed,
}

impl StageStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StageStatus::Idle,
            1 => StageStatus::Running,
            2 => StageStatus::Stopped,
            _ => StageStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Stopped | StageStatus::Failed)
    }
}

/// Shared, lock-free status slot readable from any thread
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(StageStatus::Idle as u8)))
    }

    pub fn get(&self) -> StageStatus {
        StageStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: StageStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_requirements() {
        assert!(Capability::Producer.needs_output());
        assert!(!Capability::Producer.needs_input());
        assert!(Capability::Consumer.needs_input());
        assert!(!Capability::Consumer.needs_output());
        assert!(Capability::ProducerConsumer.needs_input());
        assert!(Capability::ProducerConsumer.needs_output());
    }

    #[test]
    fn test_ack_from_bool() {
        assert_eq!(Ack::from(true), Ack::Ok);
        assert_eq!(Ack::from(false), Ack::Fail);
        assert!(!Ack::Retry.is_ok());
    }

    #[test]
    fn test_status_cell_roundtrip() {
        let cell = StatusCell::new();
        let observer = cell.clone();
        assert_eq!(observer.get(), StageStatus::Idle);
        cell.set(StageStatus::Running);
        assert_eq!(observer.get(), StageStatus::Running);
        cell.set(StageStatus::Failed);
        assert!(observer.get().is_terminal());
    }
}
