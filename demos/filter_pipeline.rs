//! Number processing pipeline demonstrating filtering and transformations
//!
//! Pipeline:
//! 1. Generate: Produces numbers 1-100
//! 2. Filter: Keep only even numbers
//! 3. Transform: Multiply by 10
//! 4. Aggregate: Sum all numbers
//!
//! Usage: cargo run --example filter_pipeline --release

use stage_pipeline::{
    Ack, Capability, FilterStage, MapStage, Pipeline, PipelineConfig, Result as PipelineResult,
    SequenceSource, Stage,
};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Aggregator stage that sums all numbers
struct SumAggregator {
    sum: u64,
    count: u64,
}

impl SumAggregator {
    fn new() -> Self {
        Self { sum: 0, count: 0 }
    }
}

impl Stage for SumAggregator {
    type In = u32;
    type Out = ();

    const CAPABILITY: Capability = Capability::Consumer;

    fn name(&self) -> &str {
        "sum_aggregator"
    }

    fn consume(&mut self, input: &u32) -> Ack {
        self.sum += u64::from(*input);
        self.count += 1;
        if self.count % 5 == 0 {
            println!("Running sum: {} (count: {})", self.sum, self.count);
        }
        Ack::Ok
    }

    fn on_shutdown(&mut self) -> PipelineResult<()> {
        println!("\n=== Final Results ===");
        println!("Total numbers processed: {}", self.count);
        println!("Sum of all numbers: {}", self.sum);
        if self.count > 0 {
            println!("Average: {:.2}", self.sum as f64 / self.count as f64);
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Generating numbers 1-100, filtering evens, multiplying by 10, and summing");
    println!();

    let start = Instant::now();

    let config = PipelineConfig {
        default_capacity: 50,
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::with_config(config)?;
    let generated = pipeline.connection("generated");
    let evens = pipeline.connection("evens");
    let scaled = pipeline.connection("scaled");

    pipeline.add_producer(SequenceSource::new("generator", 1..=100u32), &generated)?;
    pipeline.add_producer_consumer(
        FilterStage::new("even_filter", |n: &u32| n % 2 == 0),
        &generated,
        &evens,
    )?;
    pipeline.add_producer_consumer(
        MapStage::new("multiply_by_10", |n: u32| n * 10),
        &evens,
        &scaled,
    )?;
    pipeline.add_consumer(SumAggregator::new(), &scaled)?;

    let running = pipeline.start()?;
    // Stages end on their own once the generator is exhausted
    while !running.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let summary = running.metrics_summary();
    running.wait()?;

    let elapsed = start.elapsed();
    println!("\n{}", summary);
    println!("Pipeline execution time: {:.3}s", elapsed.as_secs_f64());

    Ok(())
}
