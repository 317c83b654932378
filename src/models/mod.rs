//! Data model shared by the orchestrator, the backends and the transformations
//!
//! - [`query`]: panel requests as received from the dashboard, and their
//!   resolved, endpoint-bound form
//! - [`metrics`]: per-target results flowing back from the backends

pub mod metrics;
pub mod query;

pub use metrics::{Metric, MetricInstance, Sample, SampleValue, Semantics, TargetResult};
pub use query::{Query, QueryTarget, ResolvedTarget, ScopedVars, TargetFormat, TimeRange};
