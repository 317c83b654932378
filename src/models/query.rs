use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

/// Template variables scoped to a single panel (e.g. repeated panels)
pub type ScopedVars = HashMap<String, String>;

/// Response format requested by a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    #[default]
    TimeSeries,
    Table,
    Heatmap,
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetFormat::TimeSeries => "time_series",
            TargetFormat::Table => "table",
            TargetFormat::Heatmap => "heatmap",
        };
        write!(f, "{name}")
    }
}

/// One row of a panel's request, as configured in the query editor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTarget {
    pub ref_id: String,

    /// Metric expression, may contain template variables
    pub expr: Option<String>,

    #[serde(default)]
    pub format: TargetFormat,

    pub legend_format: Option<String>,

    pub min_pcp_version: Option<String>,

    /// Overrides the data source url
    pub url: Option<String>,

    /// Overrides the data source container
    pub container: Option<String>,

    #[serde(default)]
    pub hide: bool,

    /// Set by the editor while the user is still typing the expression
    #[serde(default)]
    pub is_typing: bool,
}

impl QueryTarget {
    pub fn new(ref_id: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            expr: Some(expr.into()),
            ..Default::default()
        }
    }
}

/// Time window requested by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// The window ending now and spanning `span`
    pub fn last(span: Duration) -> Self {
        let to = Utc::now();
        Self { from: to - span, to }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.from && timestamp <= self.to
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::last(Duration::minutes(5))
    }
}

/// A full panel request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub targets: Vec<QueryTarget>,

    #[serde(default)]
    pub scoped_vars: ScopedVars,

    #[serde(default)]
    pub dashboard_id: u64,

    #[serde(default)]
    pub panel_id: u64,

    #[serde(default)]
    pub range: TimeRange,
}

/// A target after variable substitution, bound to its endpoint
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub ref_id: String,
    pub expr: String,
    pub format: TargetFormat,
    pub legend_format: Option<String>,
    pub min_pcp_version: Option<String>,

    /// `dashboard/panel/refId`, stable across query evaluations
    pub uid: String,

    pub url: String,
    pub container: Option<String>,
    pub endpoint: Arc<Endpoint>,
}

impl ResolvedTarget {
    pub fn uid(dashboard_id: u64, panel_id: u64, ref_id: &str) -> String {
        format!("{dashboard_id}/{panel_id}/{ref_id}")
    }

    /// Whether two evaluations of the same target describe the same request
    pub fn same_definition(&self, other: &ResolvedTarget) -> bool {
        self.ref_id == other.ref_id
            && self.expr == other.expr
            && self.format == other.format
            && self.legend_format == other.legend_format
            && self.min_pcp_version == other.min_pcp_version
            && self.url == other.url
            && self.container == other.container
            && self.endpoint.id() == other.endpoint.id()
    }
}
