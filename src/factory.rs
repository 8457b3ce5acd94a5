//! Construction-time gate between stage types and connections.
//!
//! [`StageFactory::create`] compares a stage's declared [`Capability`] with
//! the connections it is given and binds them only when they match, before
//! any thread exists. The typed helpers (`producer`, `consumer`,
//! `producer_consumer`) additionally reject a mismatched stage type at
//! compile time.

use crate::config::PipelineConfig;
use crate::connection::{Connection, InStageConnection, OutStageConnection};
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::pipeline::PipelineEvent;
use crate::runner::{self, RunContext};
use crate::stage::{Capability, Stage, StageStatus, StatusCell};
use crate::strategy::{ConsumptionStrategy, RetryPolicy};
use crossbeam::channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Connections offered to a stage at construction
pub struct Wiring<In: Send, Out: Send> {
    input: Option<Arc<Connection<In>>>,
    output: Option<Arc<Connection<Out>>>,
}

impl<In: Send, Out: Send> Wiring<In, Out> {
    pub fn new(input: Option<Arc<Connection<In>>>, output: Option<Arc<Connection<Out>>>) -> Self {
        Self { input, output }
    }

    pub fn producer(output: Arc<Connection<Out>>) -> Self {
        Self::new(None, Some(output))
    }

    pub fn consumer(input: Arc<Connection<In>>) -> Self {
        Self::new(Some(input), None)
    }

    pub fn producer_consumer(input: Arc<Connection<In>>, output: Arc<Connection<Out>>) -> Self {
        Self::new(Some(input), Some(output))
    }

    fn describe(&self) -> &'static str {
        match (self.input.is_some(), self.output.is_some()) {
            (true, true) => "inbound and outbound connections",
            (true, false) => "only an inbound connection",
            (false, true) => "only an outbound connection",
            (false, false) => "no connections",
        }
    }
}

fn check_capability(capability: Capability, has_input: bool, has_output: bool) -> bool {
    capability.needs_input() == has_input && capability.needs_output() == has_output
}

/// Builds stages after checking their wiring.
///
/// Holds the per-stage execution settings; each stage captures them once at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct StageFactory {
    strategy: ConsumptionStrategy,
    retry: RetryPolicy,
    events: Option<Sender<PipelineEvent>>,
}

impl StageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory using the retry policy from `config`
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new().with_retry(config.retry)
    }

    pub fn with_strategy(mut self, strategy: ConsumptionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lifecycle notifications for stages built by this factory
    pub fn with_events(mut self, events: Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Verify the wiring against `S::CAPABILITY`, then bind the connection ends
    pub fn create<S: Stage>(&self, stage: S, wiring: Wiring<S::In, S::Out>) -> Result<BoundStage<S>> {
        let name = stage.name().to_string();
        if !check_capability(S::CAPABILITY, wiring.input.is_some(), wiring.output.is_some()) {
            error!(stage = %name, capability = %S::CAPABILITY, "wiring rejected");
            return Err(PipelineError::Wiring {
                reason: format!(
                    "a {} stage cannot be built with {}",
                    S::CAPABILITY,
                    wiring.describe()
                ),
                stage: name,
            });
        }

        let input = wiring
            .input
            .as_ref()
            .map(|conn| conn.bind_consumer())
            .transpose()?;
        let output = match wiring.output.as_ref().map(|conn| conn.bind_producer()).transpose() {
            Ok(output) => output,
            Err(e) => {
                if let Some(input) = input {
                    input.unbind();
                }
                return Err(e);
            }
        };

        Ok(BoundStage {
            name,
            stage,
            input,
            output,
            strategy: self.strategy,
            retry: self.retry,
            events: self.events.clone(),
            metrics: StageMetrics::new(),
            status: StatusCell::new(),
        })
    }

    pub fn producer<S: Stage>(&self, stage: S, output: &Arc<Connection<S::Out>>) -> Result<BoundStage<S>> {
        const { assert!(matches!(S::CAPABILITY, Capability::Producer), "stage is not a producer") };
        self.create(stage, Wiring::producer(Arc::clone(output)))
    }

    pub fn consumer<S: Stage>(&self, stage: S, input: &Arc<Connection<S::In>>) -> Result<BoundStage<S>> {
        const { assert!(matches!(S::CAPABILITY, Capability::Consumer), "stage is not a consumer") };
        self.create(stage, Wiring::consumer(Arc::clone(input)))
    }

    pub fn producer_consumer<S: Stage>(
        &self,
        stage: S,
        input: &Arc<Connection<S::In>>,
        output: &Arc<Connection<S::Out>>,
    ) -> Result<BoundStage<S>> {
        const {
            assert!(
                matches!(S::CAPABILITY, Capability::ProducerConsumer),
                "stage is not a producer-consumer"
            )
        };
        self.create(
            stage,
            Wiring::producer_consumer(Arc::clone(input), Arc::clone(output)),
        )
    }
}

/// A stage with its connections bound, ready to start.
///
/// The stage can still be configured through [`BoundStage::stage_mut`].
pub struct BoundStage<S: Stage> {
    name: String,
    stage: S,
    input: Option<InStageConnection<S::In>>,
    output: Option<OutStageConnection<S::Out>>,
    strategy: ConsumptionStrategy,
    retry: RetryPolicy,
    events: Option<Sender<PipelineEvent>>,
    metrics: StageMetrics,
    status: StatusCell,
}

impl<S: Stage> BoundStage<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        S::CAPABILITY
    }

    pub fn strategy(&self) -> ConsumptionStrategy {
        self.strategy
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut S {
        &mut self.stage
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    pub(crate) fn set_events(&mut self, events: Sender<PipelineEvent>) {
        self.events = Some(events);
    }

    /// Spawn the stage thread. A stage runs at most once.
    pub fn start(self) -> Result<StageHandle> {
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = StageHandle {
            name: self.name.clone(),
            capability: S::CAPABILITY,
            status: self.status.clone(),
            metrics: self.metrics.clone(),
            cancel: Arc::clone(&cancel),
            thread: None,
        };

        let ctx = RunContext {
            name: self.name,
            stage: self.stage,
            input: self.input,
            output: self.output,
            strategy: self.strategy,
            retry: self.retry,
            events: self.events,
            metrics: self.metrics,
            status: self.status,
            cancel,
        };

        info!(stage = %handle.name, capability = %handle.capability, "starting stage");
        let thread = thread::Builder::new()
            .name(handle.name.clone())
            .spawn(move || runner::run(ctx))
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;

        Ok(StageHandle {
            thread: Some(thread),
            ..handle
        })
    }
}

/// Type-erased bound stage, as stored by a pipeline before start
pub trait Launch: Send {
    fn name(&self) -> &str;
    fn capability(&self) -> Capability;
    fn attach_events(&mut self, events: Sender<PipelineEvent>);
    fn launch(self: Box<Self>) -> Result<StageHandle>;
}

impl<S: Stage> Launch for BoundStage<S> {
    fn name(&self) -> &str {
        BoundStage::name(self)
    }

    fn capability(&self) -> Capability {
        S::CAPABILITY
    }

    fn attach_events(&mut self, events: Sender<PipelineEvent>) {
        self.set_events(events);
    }

    fn launch(self: Box<Self>) -> Result<StageHandle> {
        (*self).start()
    }
}

/// Control and status handle for a running stage
pub struct StageHandle {
    name: String,
    capability: Capability,
    status: StatusCell,
    metrics: StageMetrics,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl StageHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn status(&self) -> StageStatus {
        self.status.get()
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Ask the loop to exit at its next suspension point.
    ///
    /// `BlockingWait` consumers only notice after the next task or a drain.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the stage thread and return its result
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| PipelineError::ThreadError(format!("stage '{}' panicked", self.name)))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{CollectSink, SequenceSource};

    #[test]
    fn test_capability_check_table() {
        assert!(check_capability(Capability::Producer, false, true));
        assert!(!check_capability(Capability::Producer, true, true));
        assert!(check_capability(Capability::Consumer, true, false));
        assert!(!check_capability(Capability::Consumer, false, true));
        assert!(check_capability(Capability::ProducerConsumer, true, true));
        assert!(!check_capability(Capability::ProducerConsumer, true, false));
    }

    #[test]
    fn test_consumer_with_out_connection_rejected() {
        let conn = Connection::<()>::new("wrong", 1);
        let sink = CollectSink::<i32>::new("sink");
        let result = StageFactory::new().create(sink, Wiring::new(None, Some(Arc::clone(&conn))));
        match result {
            Err(PipelineError::Wiring { stage, reason }) => {
                assert_eq!(stage, "sink");
                assert!(reason.contains("only an outbound connection"));
            }
            _ => panic!("expected wiring error"),
        }
        // Nothing was bound
        assert!(conn.bind_producer().is_ok());
    }

    #[test]
    fn test_bound_stage_reports_settings() {
        let conn = Connection::new("c", 1);
        let bound = StageFactory::new()
            .with_strategy(ConsumptionStrategy::LatestOnly)
            .consumer(CollectSink::<u8>::new("sink"), &conn)
            .unwrap();
        assert_eq!(bound.name(), "sink");
        assert_eq!(bound.capability(), Capability::Consumer);
        assert_eq!(bound.strategy(), ConsumptionStrategy::LatestOnly);
    }

    #[test]
    fn test_second_producer_rejected() {
        let conn = Connection::new("c", 1);
        let factory = StageFactory::new();
        let _first = factory
            .producer(SequenceSource::new("a", vec![1u8]), &conn)
            .unwrap();
        assert!(matches!(
            factory.producer(SequenceSource::new("b", vec![2u8]), &conn),
            Err(PipelineError::AlreadyBound { .. })
        ));
    }

    #[test]
    fn test_failed_output_binding_releases_input() {
        let input = Connection::<u8>::new("in", 1);
        let output = Connection::<u8>::new("out", 1);
        output.drain();
        let stage = crate::stages::MapStage::new("map", |v: u8| v);
        let factory = StageFactory::new();
        assert!(factory.producer_consumer(stage, &input, &output).is_err());
        // Input end was handed back, not closed
        assert!(!input.is_draining());
        let sink = factory.consumer(CollectSink::<u8>::new("sink"), &input).unwrap();
        assert!(matches!(
            input.bind_consumer(),
            Err(PipelineError::AlreadyBound { role: "consumer" })
        ));
        drop(sink);
    }

    #[test]
    fn test_bound_stage_keeps_its_ends() {
        let conn = Connection::<u32>::new("owned", 1);
        let factory = StageFactory::new();
        let source = factory
            .producer(SequenceSource::new("src", vec![1]), &conn)
            .unwrap();
        let sink = factory.consumer(CollectSink::new("sink"), &conn).unwrap();

        assert!(conn.bind_producer().is_err());
        assert!(conn.bind_consumer().is_err());
        assert!(factory.consumer(CollectSink::new("second"), &conn).is_err());

        source.start().unwrap().join().unwrap();
        sink.start().unwrap().join().unwrap();
        assert!(conn.bind_producer().is_err());
        assert!(conn.bind_consumer().is_err());
    }

    #[test]
    fn test_stage_runs_once_and_joins() {
        let conn = Connection::new("c", 4);
        let factory = StageFactory::new();
        let source = factory
            .producer(SequenceSource::new("src", vec![1, 2, 3]), &conn)
            .unwrap();
        let sink = CollectSink::new("sink");
        let seen = sink.collected();
        let sink = factory.consumer(sink, &conn).unwrap();

        let source = source.start().unwrap();
        let sink = sink.start().unwrap();
        source.join().unwrap();
        sink.join().unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }
}
