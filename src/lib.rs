//! A typed, thread-per-stage pipeline with acknowledged handoff.
//!
//! Stages are wired together by bounded [`Connection`]s. A producer blocks
//! while every slot of its outbound connection is occupied, and each task a
//! consumer takes must be acknowledged with a success flag, so the producer
//! side always knows the fate of what it handed over.
//!
//! # Features
//!
//! - Capability-checked wiring: a stage declares whether it produces, consumes
//!   or both, and [`StageFactory`] refuses mismatched connections before any
//!   thread starts
//! - Per-stage consumption strategies ([`ConsumptionStrategy`]) and local
//!   retry policies ([`RetryPolicy`])
//! - Cooperative shutdown: draining a connection wakes every blocked caller
//! - Parameterized stages configured from flat key/value sets
//! - A transactional database sink over an abstract store, with an
//!   in-memory backend for tests
//! - Per-stage metrics and lifecycle events
//!
//! # Example
//!
//! ```no_run
//! use stage_pipeline::{CollectSink, Pipeline, SequenceSource};
//!
//! let mut pipeline = Pipeline::new();
//! let numbers = pipeline.connection_with_capacity("numbers", 4);
//! pipeline.add_producer(SequenceSource::new("source", 1..=10), &numbers)?;
//! pipeline.add_consumer(CollectSink::<i32>::new("sink"), &numbers)?;
//!
//! let running = pipeline.start()?;
//! running.wait()?;
//! # Ok::<(), stage_pipeline::PipelineError>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod parameterized;
pub mod pipeline;
mod runner;
pub mod stage;
pub mod stages;
pub mod store;
pub mod strategy;
pub mod task;

// Re-exports for convenience
pub use config::{PipelineConfig, StageParameters};
pub use connection::{
    Connection, ConnectionState, ConnectionStats, Drainable, InStageConnection,
    OutStageConnection,
};
pub use error::{ConfigurationError, PipelineError, Result};
pub use factory::{BoundStage, Launch, StageFactory, StageHandle, Wiring};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use parameterized::{
    ParameterSet, ParameterSpec, ParameterState, Parameterized, StateCell, StateWatcher,
};
pub use pipeline::{Pipeline, PipelineEvent, RunningPipeline};
pub use stage::{Ack, Capability, Outcome, Stage, StageStatus, StatusCell};
pub use stages::{
    CollectSink, DbSettings, DbWriteStage, Encode, FilterStage, Int32RandomGenerator, MapStage,
    SequenceSource,
};
pub use strategy::{ConsumptionStrategy, RetryPolicy};
pub use task::{Acknowledgment, Task, TaskId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
