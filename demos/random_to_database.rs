//! Random integers written to a database, one transaction per value.
//!
//! Pipeline:
//! 1. Int32RandomGenerator: emits 20 seeded random values
//! 2. i32ToDatabase: appends each value to a remote file referenced by a fresh entity
//!
//! The database is the in-memory backend; its counters are printed at the end.
//!
//! Usage: RUST_LOG=stage_pipeline=debug cargo run --example random_to_database

use stage_pipeline::store::MemoryDatabase;
use stage_pipeline::{
    ConsumptionStrategy, DbWriteStage, Int32RandomGenerator, Parameterized, Pipeline,
    PipelineConfig, PipelineEvent,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
default_capacity = 1
poll_interval_ms = 20

[retry]
max_attempts = 2
backoff_ms = 5

[stages.i32ToDatabase]
login = "postgres"
password = "postgres"
ip = "127.0.0.1"
port = "5432"
db = "pipeline"
entityName = "random_numbers"
attributeName = "values"
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::from_toml_str(CONFIG)?;
    let database = MemoryDatabase::new();

    let mut pipeline = Pipeline::with_config(config)?;
    let numbers = pipeline.connection("numbers");
    let factory = pipeline
        .factory()
        .with_strategy(ConsumptionStrategy::BoundedPoll(pipeline.config().poll_interval()));

    let generator = Int32RandomGenerator::seeded(7)
        .with_range(-1000..=1000)
        .with_limit(20);
    let generator = factory.producer(generator, &numbers)?;

    let mut sink = factory.consumer(DbWriteStage::<i32>::new(Arc::new(database.clone())), &numbers)?;
    let sink_name = sink.name().to_string();
    if let Some(params) = pipeline.config().stage_parameters(&sink_name) {
        sink.stage_mut().set_parameters(params)?;
    }
    for (key, value) in sink.stage().parameter_values() {
        let shown = if key == "password" { "***" } else { value.as_str() };
        println!("  {:<14} = {:<16} {}", key, shown, sink.stage().describe_parameter(&key).unwrap_or(""));
    }
    sink.stage_mut().apply_parameters()?;
    let file_id = sink.stage().remote_file_id();

    pipeline.add_stage(generator);
    pipeline.add_stage(sink);
    let events = pipeline.events();

    let running = pipeline.start()?;
    running.wait()?;

    for event in events.try_iter() {
        if let PipelineEvent::StageStopped { stage, metrics } = event {
            println!("{}: {}", stage, metrics.format());
        }
    }

    let stats = database.stats();
    println!("\n=== Database ===");
    println!("Transactions committed: {}", stats.commits);
    println!("Transactions rolled back: {}", stats.rollbacks);
    println!("Bytes written: {}", stats.bytes_written);
    if let Some(contents) = file_id.and_then(|id| database.file_contents(id)) {
        let values: Vec<i32> = contents
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        println!("Stored values: {:?}", values);
    }

    Ok(())
}
