use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::query::ResolvedTarget;

/// A single sampled value; most metrics are numeric, some are strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Number(value) => Some(*value),
            SampleValue::Text(_) => None,
        }
    }
}

impl std::fmt::Display for SampleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleValue::Number(value) => write!(f, "{value}"),
            SampleValue::Text(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: SampleValue,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: SampleValue) -> Self {
        Self { timestamp, value }
    }
}

/// PMAPI value semantics of a metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Semantics {
    Counter,
    #[default]
    Instant,
    Discrete,
    #[serde(other)]
    Unknown,
}

/// One instance of a metric (a CPU, a disk, ...) with its value series
///
/// Singular metrics have exactly one instance with `id == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInstance {
    pub id: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub values: Vec<Sample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub instances: Vec<MetricInstance>,
}

/// Outcome of fetching a single target
#[derive(Debug, Clone)]
pub struct TargetResult {
    pub target: ResolvedTarget,
    pub metrics: Vec<Metric>,
}
