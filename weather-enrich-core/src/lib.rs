//! Core library for the `weather-enrich` CLI.
//!
//! This crate defines:
//! - Abstraction over historical weather providers, plus caching and retry layers
//! - Point-in-time matching of observations to telemetry records
//! - Projection of provider fields onto namespaced output columns
//! - The per-record enrichment pipeline and CSV batch I/O
//! - Configuration & credentials handling
//!
//! It is used by `weather-enrich-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod error;
pub mod mapper;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CacheConfig, CacheTtl, Config, PipelineConfig, ProviderConfig};
pub use error::{InputError, ProviderError, TableError};
pub use mapper::{FieldMapper, FieldSpec};
pub use matcher::{MatchPolicy, MatchResult};
pub use model::{
    EnrichStatus, EnrichedRecord, FieldValue, Observation, QueryWindow, Record, RecordInput,
    WindowStrategy,
};
pub use pipeline::{EnrichmentPipeline, ProviderBinding, StatusCounts};
pub use provider::{ProviderClient, ProviderId};
pub use table::{ColumnNames, InputTable, OutputLayout};
