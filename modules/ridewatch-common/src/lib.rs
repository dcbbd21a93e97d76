pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::{Config, GeocodingProvider};
pub use error::RideWatchError;
pub use metrics::MetricsSink;
pub use types::{
    content_hash, haversine_mi, synthetic_ride_id, ControlJudge, Distance, Event, RawEvent,
    RunCounts, RunError, RunOutcome, RunReport, AERC_SOURCE,
};
