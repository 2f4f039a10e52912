//! Parse access-log lines into typed records, collapse dynamic URL paths
//! into templates and rank `(method, template)` pairs by hit count.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod output;
pub mod parser;
pub mod patterns;
pub mod pipeline;
pub mod source;
pub mod stop;
pub mod templater;

pub use aggregator::{
    AggregationKey, FrequencyAggregator, FrequencyTable, RankedEntry, aggregate,
};
pub use config::{Field, LogRecord};
pub use error::{ConfigError, RecordError, TimestampError};
pub use parser::{LineParser, ParseStats};
pub use patterns::{PatternRegistry, StructuralPattern};
pub use pipeline::Analysis;
pub use stop::StopSignal;
pub use templater::{PathTemplater, SubstitutionPattern};
