use crate::connection::{InStageConnection, OutStageConnection};
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::pipeline::PipelineEvent;
use crate::stage::{Capability, Outcome, Stage, StageStatus, StatusCell};
use crate::strategy::{ConsumptionStrategy, RetryPolicy};
use crossbeam::channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Everything a stage thread owns
pub(crate) struct RunContext<S: Stage> {
    pub(crate) name: String,
    pub(crate) stage: S,
    pub(crate) input: Option<InStageConnection<S::In>>,
    pub(crate) output: Option<OutStageConnection<S::Out>>,
    pub(crate) strategy: ConsumptionStrategy,
    pub(crate) retry: RetryPolicy,
    pub(crate) events: Option<Sender<PipelineEvent>>,
    pub(crate) metrics: StageMetrics,
    pub(crate) status: StatusCell,
    pub(crate) cancel: Arc<AtomicBool>,
}

impl<S: Stage> RunContext<S> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn notify(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // Observers may have gone away; the stage keeps running regardless
            let _ = events.send(event);
        }
    }
}

/// Drive a stage until its stream ends, its connections drain or it is cancelled.
///
/// Connection ends are dropped before returning, which tells the neighbours
/// this stage is gone.
pub(crate) fn run<S: Stage>(mut ctx: RunContext<S>) -> Result<()> {
    ctx.status.set(StageStatus::Running);
    ctx.notify(PipelineEvent::StageStarted {
        stage: ctx.name.clone(),
    });

    let result = ctx.stage.on_start().and_then(|_| match S::CAPABILITY {
        Capability::Producer => produce_loop(&mut ctx),
        Capability::Consumer => consume_loop(&mut ctx),
        Capability::ProducerConsumer => transform_loop(&mut ctx),
    });
    let shutdown = ctx.stage.on_shutdown();
    let result = result.and(shutdown);

    ctx.input.take();
    ctx.output.take();

    match &result {
        Ok(()) => {
            ctx.status.set(StageStatus::Stopped);
            info!(stage = %ctx.name, "stage stopped");
            ctx.notify(PipelineEvent::StageStopped {
                stage: ctx.name.clone(),
                metrics: ctx.metrics.snapshot(),
            });
        }
        Err(e) => {
            ctx.status.set(StageStatus::Failed);
            error!(stage = %ctx.name, error = %e, "stage failed");
            ctx.notify(PipelineEvent::StageFailed {
                stage: ctx.name.clone(),
                error: e.to_string(),
            });
        }
    }
    result
}

fn missing(ctx_name: &str, end: &str) -> PipelineError {
    PipelineError::StageError(format!("stage '{}' has no {} connection", ctx_name, end))
}

fn produce_loop<S: Stage>(ctx: &mut RunContext<S>) -> Result<()> {
    let output = ctx.output.as_ref().ok_or_else(|| missing(&ctx.name, "outbound"))?;
    while !ctx.cancel.load(Ordering::Acquire) {
        let Some(payload) = ctx.stage.produce() else {
            debug!(stage = %ctx.name, "stream exhausted");
            break;
        };
        match output.produce(payload) {
            Ok(_) => ctx.metrics.record_produced(),
            Err(e) if e.is_shutdown() => {
                debug!(stage = %ctx.name, "outbound connection closed");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn consume_loop<S: Stage>(ctx: &mut RunContext<S>) -> Result<()> {
    loop {
        if ctx.cancelled() {
            break;
        }
        let input = ctx.input.as_ref().ok_or_else(|| missing(&ctx.name, "inbound"))?;
        let task = match input.consume_with(&ctx.strategy) {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) if e.is_shutdown() => break,
            Err(e) => return Err(e),
        };

        let started = Instant::now();
        let (task_id, payload) = task.into_parts();
        let stage = &mut ctx.stage;
        let metrics = &ctx.metrics;
        let success = ctx.retry.run(|attempt| {
            if attempt > 1 {
                metrics.record_retry();
            }
            stage.consume(&payload)
        });
        metrics.record_latency(started.elapsed());

        input.acknowledge(task_id, success)?;
        metrics.record_acknowledged(success);
    }
    debug!(stage = %ctx.name, "inbound stream ended");
    Ok(())
}

fn transform_loop<S: Stage>(ctx: &mut RunContext<S>) -> Result<()> {
    loop {
        if ctx.cancelled() {
            break;
        }
        let input = ctx.input.as_ref().ok_or_else(|| missing(&ctx.name, "inbound"))?;
        let output = ctx.output.as_ref().ok_or_else(|| missing(&ctx.name, "outbound"))?;
        let task = match input.consume_with(&ctx.strategy) {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) if e.is_shutdown() => break,
            Err(e) => return Err(e),
        };

        let started = Instant::now();
        let (task_id, payload) = task.into_parts();
        let outcome = ctx.stage.transform(payload);
        ctx.metrics.record_latency(started.elapsed());

        // The input is acknowledged only after the downstream handoff
        let success = match outcome {
            Outcome::Emit(value) => match output.produce(value) {
                Ok(_) => {
                    ctx.metrics.record_produced();
                    true
                }
                Err(e) if e.is_shutdown() => {
                    input.acknowledge(task_id, false)?;
                    ctx.metrics.record_acknowledged(false);
                    debug!(stage = %ctx.name, "outbound connection closed");
                    break;
                }
                Err(e) => return Err(e),
            },
            Outcome::Skip => {
                ctx.metrics.record_skipped();
                true
            }
            Outcome::Fail => false,
        };

        input.acknowledge(task_id, success)?;
        ctx.metrics.record_acknowledged(success);
    }
    Ok(())
}
