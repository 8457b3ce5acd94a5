//! Ready-made stages.

pub mod database;
pub mod encode;
pub mod generator;
pub mod sequence;
pub mod transform;

pub use database::{DbSettings, DbWriteStage, DB_PARAMETERS};
pub use encode::Encode;
pub use generator::Int32RandomGenerator;
pub use sequence::{CollectSink, SequenceSource};
pub use transform::{FilterStage, MapStage};
