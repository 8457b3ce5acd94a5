use crate::config::PipelineConfig;
use crate::connection::{Connection, ConnectionState, Drainable};
use crate::error::{PipelineError, Result};
use crate::factory::{BoundStage, Launch, StageFactory, StageHandle};
use crate::metrics::MetricsSnapshot;
use crate::stage::{Stage, StageStatus};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Lifecycle notification published by every stage thread
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: String },
    StageStopped { stage: String, metrics: MetricsSnapshot },
    StageFailed { stage: String, error: String },
}

impl PipelineEvent {
    pub fn stage(&self) -> &str {
        match self {
            PipelineEvent::StageStarted { stage }
            | PipelineEvent::StageStopped { stage, .. }
            | PipelineEvent::StageFailed { stage, .. } => stage,
        }
    }
}

/// A set of connections and bound stages that start and stop together.
///
/// Connections created through the pipeline are drained on shutdown, so every
/// blocked stage observes `Shutdown` and exits its loop.
pub struct Pipeline {
    config: PipelineConfig,
    connections: Vec<Arc<dyn Drainable>>,
    stages: Vec<Box<dyn Launch>>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
}

impl Pipeline {
    /// Create a pipeline with the default configuration
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config: PipelineConfig::default(),
            connections: Vec::new(),
            stages: Vec::new(),
            events_tx,
            events_rx,
        }
    }

    /// Create a pipeline from a validated configuration
    pub fn with_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// New connection using the configured default capacity
    pub fn connection<T: Send + 'static>(&mut self, name: impl Into<String>) -> Arc<Connection<T>> {
        let capacity = self.config.default_capacity;
        self.connection_with_capacity(name, capacity)
    }

    pub fn connection_with_capacity<T: Send + 'static>(
        &mut self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Arc<Connection<T>> {
        let connection = Connection::new(name, capacity);
        self.connections.push(Arc::clone(&connection) as Arc<dyn Drainable>);
        connection
    }

    /// Track a connection built outside the pipeline so shutdown drains it too
    pub fn register_connection<T: Send + 'static>(&mut self, connection: &Arc<Connection<T>>) {
        self.connections.push(Arc::clone(connection) as Arc<dyn Drainable>);
    }

    /// Factory carrying this pipeline's retry policy and event channel
    pub fn factory(&self) -> StageFactory {
        StageFactory::from_config(&self.config).with_events(self.events_tx.clone())
    }

    /// Queue a bound stage to be started with the pipeline
    pub fn add_stage<S: Stage>(&mut self, stage: BoundStage<S>) -> &mut Self {
        self.add(Box::new(stage))
    }

    pub fn add(&mut self, mut stage: Box<dyn Launch>) -> &mut Self {
        stage.attach_events(self.events_tx.clone());
        self.stages.push(stage);
        self
    }

    /// Bind and queue a producer in one step
    pub fn add_producer<S: Stage>(&mut self, stage: S, output: &Arc<Connection<S::Out>>) -> Result<()> {
        let bound = self.factory().producer(stage, output)?;
        self.add_stage(bound);
        Ok(())
    }

    /// Bind and queue a consumer in one step
    pub fn add_consumer<S: Stage>(&mut self, stage: S, input: &Arc<Connection<S::In>>) -> Result<()> {
        let bound = self.factory().consumer(stage, input)?;
        self.add_stage(bound);
        Ok(())
    }

    /// Bind and queue a producer-consumer in one step
    pub fn add_producer_consumer<S: Stage>(
        &mut self,
        stage: S,
        input: &Arc<Connection<S::In>>,
        output: &Arc<Connection<S::Out>>,
    ) -> Result<()> {
        let bound = self.factory().producer_consumer(stage, input, output)?;
        self.add_stage(bound);
        Ok(())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Receiver for stage lifecycle events
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    /// Spawn one thread per stage.
    ///
    /// If a thread cannot be spawned, the stages already running are shut
    /// down before the error is returned.
    pub fn start(self) -> Result<RunningPipeline> {
        if self.stages.is_empty() {
            return Err(PipelineError::NoStages);
        }

        info!(
            stages = self.stages.len(),
            connections = self.connections.len(),
            "starting pipeline"
        );
        let mut running = RunningPipeline {
            handles: Vec::with_capacity(self.stages.len()),
            connections: self.connections,
            events: self.events_rx,
            started_at: Instant::now(),
        };
        for stage in self.stages {
            match stage.launch() {
                Ok(handle) => running.handles.push(handle),
                Err(e) => {
                    warn!(error = %e, "stage failed to launch, stopping pipeline");
                    return Err(running.abort(e));
                }
            }
        }
        Ok(running)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// A started pipeline that can be monitored and stopped
pub struct RunningPipeline {
    handles: Vec<StageHandle>,
    connections: Vec<Arc<dyn Drainable>>,
    events: Receiver<PipelineEvent>,
    started_at: Instant,
}

impl RunningPipeline {
    pub fn stage(&self, name: &str) -> Option<&StageHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    pub fn stages(&self) -> &[StageHandle] {
        &self.handles
    }

    pub fn statuses(&self) -> Vec<(String, StageStatus)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.status()))
            .collect()
    }

    pub fn connection_states(&self) -> Vec<(String, ConnectionState)> {
        self.connections
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }

    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events.clone()
    }

    /// True once every stage thread has exited
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(StageHandle::is_finished)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get a summary of all stage metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for handle in &self.handles {
            summary.push_str(&format!(
                "  {} [{:?}]: {}\n",
                handle.name(),
                handle.status(),
                handle.metrics().snapshot().format()
            ));
        }
        summary
    }

    /// Wait for every stage to finish on its own and return the first failure
    pub fn wait(mut self) -> Result<()> {
        self.join_all()
    }

    /// Wait up to `timeout`, then shut down whatever is still running.
    ///
    /// Returns `Ok(true)` if the stages finished on their own.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let finished = self.is_finished();
        if !finished {
            self.stop();
        }
        self.join_all().map(|_| finished)
    }

    /// Drain every connection, cancel every stage and join the threads
    pub fn shutdown(mut self) -> Result<()> {
        self.stop();
        self.join_all()
    }

    /// Shut down after a failed start and hand back the error that caused it
    fn abort(self, cause: PipelineError) -> PipelineError {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "stages already running ended with an error during abort");
        }
        cause
    }

    fn stop(&self) {
        info!("shutting down pipeline");
        for connection in &self.connections {
            connection.drain();
        }
        for handle in &self.handles {
            handle.cancel();
        }
    }

    fn join_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for handle in std::mem::take(&mut self.handles) {
            let name = handle.name().to_string();
            if let Err(e) = handle.join() {
                warn!(stage = %name, error = %e, "stage ended with an error");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Capability;
    use crate::stages::{CollectSink, MapStage, SequenceSource};

    struct FailingStart;

    impl Stage for FailingStart {
        type In = ();
        type Out = u32;

        const CAPABILITY: Capability = Capability::Producer;

        fn name(&self) -> &str {
            "failing_start"
        }

        fn on_start(&mut self) -> Result<()> {
            Err(PipelineError::StageError("no device".into()))
        }
    }

    #[test]
    fn test_no_stages_error() {
        let result = Pipeline::new().start();
        assert!(matches!(result, Err(PipelineError::NoStages)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            default_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(Pipeline::with_config(config).is_err());
    }

    #[test]
    fn test_connection_uses_default_capacity() {
        let config = PipelineConfig {
            default_capacity: 3,
            ..PipelineConfig::default()
        };
        let mut pipeline = Pipeline::with_config(config).unwrap();
        let conn = pipeline.connection::<u8>("c");
        assert_eq!(conn.capacity(), 3);
    }

    #[test]
    fn test_pipeline_runs_to_completion() {
        let mut pipeline = Pipeline::new();
        let raw = pipeline.connection_with_capacity("raw", 2);
        let doubled = pipeline.connection_with_capacity("doubled", 2);
        let sink = CollectSink::new("sink");
        let seen = sink.collected();

        pipeline
            .add_producer(SequenceSource::new("numbers", 1..=5), &raw)
            .unwrap();
        pipeline
            .add_producer_consumer(MapStage::new("double", |v: i32| v * 2), &raw, &doubled)
            .unwrap();
        pipeline.add_consumer(sink, &doubled).unwrap();
        assert_eq!(pipeline.stage_names(), vec!["numbers", "double", "sink"]);

        let events = pipeline.events();
        let running = pipeline.start().unwrap();
        running.wait().unwrap();

        assert_eq!(*seen.lock(), vec![2, 4, 6, 8, 10]);
        let stopped = events
            .try_iter()
            .filter(|e| matches!(e, PipelineEvent::StageStopped { .. }))
            .count();
        assert_eq!(stopped, 3);
    }

    #[test]
    fn test_shutdown_unblocks_idle_consumer() {
        let mut pipeline = Pipeline::new();
        let conn = pipeline.connection::<u32>("idle");
        // Keep the producing end alive so the consumer blocks
        let _producer = conn.bind_producer().unwrap();
        pipeline.add_consumer(CollectSink::new("sink"), &conn).unwrap();

        let running = pipeline.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!running.is_finished());
        let states = running.connection_states();
        assert_eq!(states, vec![("idle".to_string(), ConnectionState::Empty)]);
        running.shutdown().unwrap();
        assert!(conn.is_draining());
    }

    #[test]
    fn test_abort_returns_launch_error_over_stage_errors() {
        let mut pipeline = Pipeline::new();
        let broken = pipeline.connection::<u32>("broken");
        let idle = pipeline.connection::<u32>("idle");
        let _producer = idle.bind_producer().unwrap();
        pipeline.add_producer(FailingStart, &broken).unwrap();
        pipeline.add_consumer(CollectSink::new("sink"), &idle).unwrap();

        let running = pipeline.start().unwrap();
        while running.stage("failing_start").map_or(false, |h| !h.is_finished()) {
            std::thread::sleep(Duration::from_millis(1));
        }

        let err = running.abort(PipelineError::StageError("spawn failed".into()));
        assert!(matches!(err, PipelineError::StageError(ref msg) if msg == "spawn failed"));
        assert!(idle.is_draining());
    }
}
