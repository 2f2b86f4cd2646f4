//! Application Services
//!
//! Services that orchestrate domain rules and coordinate between ports.
//!
//! - `pipeline`: ordered validate/enrich stages, routing and delivery
//! - `gateway`: ingress normalization and the sample generator
//! - `scheduler`: leader-gated singleton execution
//! - `dispatcher`: consumer-group worker pools

/// Stage composition and the shared processing pipeline.
pub mod pipeline;

/// Ingress gateway and sample generator.
pub mod gateway;

/// Leader-election-gated singleton scheduler.
pub mod scheduler;

/// Consumer group dispatch.
pub mod dispatcher;

pub use dispatcher::{
    ConsumerGroupDispatcher, DispatcherConfig, DispatcherStats, DrainReport, StreamStatsSnapshot,
};
pub use gateway::{GENERATOR_NAME, IngestionGateway, SampleGenerator};
pub use pipeline::{Pipeline, PipelineBuildError, PipelineBuilder, PipelineError, Stage, decode_event};
pub use scheduler::SingletonScheduler;
