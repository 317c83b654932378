//! Local history cache of one endpoint
//!
//! Samples are appended by the poll service and aged out by [`Datastore::cleanup`].
//! Readers never see a partially cleaned series: each operation holds the lock
//! for its whole duration. Missing history is a valid, empty result.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::trace;

use crate::models::{Metric, MetricInstance, Sample, TimeRange};
use crate::pmapi::FetchResponse;

#[derive(Debug, Default)]
struct InstanceSeries {
    name: String,
    samples: VecDeque<Sample>,
}

#[derive(Debug, Default)]
struct MetricHistory {
    /// Keyed by instance id, `None` for singular metrics
    instances: BTreeMap<Option<u32>, InstanceSeries>,
}

pub struct Datastore {
    retention: Duration,
    metrics: RwLock<HashMap<String, MetricHistory>>,
}

impl Datastore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append a fetch result; `instance_names` maps metric -> instance id -> name
    pub async fn ingest(
        &self,
        response: &FetchResponse,
        instance_names: &HashMap<String, HashMap<u32, String>>,
    ) {
        let mut metrics = self.metrics.write().await;

        for fetched in &response.values {
            let history = metrics.entry(fetched.name.clone()).or_default();
            let names = instance_names.get(&fetched.name);

            for instance in &fetched.instances {
                let series = history.instances.entry(instance.instance).or_default();
                series.name = match instance.instance {
                    Some(id) => names
                        .and_then(|names| names.get(&id))
                        .cloned()
                        .unwrap_or_else(|| id.to_string()),
                    None => String::new(),
                };

                // the same fetch may be ingested twice by overlapping polls
                if series
                    .samples
                    .back()
                    .is_some_and(|last| last.timestamp >= response.timestamp)
                {
                    continue;
                }
                series
                    .samples
                    .push_back(Sample::new(response.timestamp, instance.value.clone()));
            }
        }
    }

    pub async fn has_metric(&self, name: &str) -> bool {
        self.metrics.read().await.contains_key(name)
    }

    /// All samples of `name` inside `range`, one entry per known instance
    pub async fn query_metric(&self, name: &str, range: &TimeRange) -> Option<Metric> {
        let metrics = self.metrics.read().await;
        let history = metrics.get(name)?;

        let instances = history
            .instances
            .iter()
            .map(|(id, series)| MetricInstance {
                id: *id,
                name: series.name.clone(),
                labels: BTreeMap::new(),
                values: series
                    .samples
                    .iter()
                    .filter(|sample| range.contains(sample.timestamp))
                    .cloned()
                    .collect(),
            })
            .collect();

        Some(Metric {
            name: name.to_string(),
            instances,
        })
    }

    /// Age out samples older than the retention horizon
    pub async fn cleanup(&self) {
        self.cleanup_before(Utc::now() - self.retention).await;
    }

    pub async fn cleanup_before(&self, horizon: DateTime<Utc>) -> usize {
        let mut metrics = self.metrics.write().await;
        let mut removed = 0;

        for history in metrics.values_mut() {
            for series in history.instances.values_mut() {
                while series
                    .samples
                    .front()
                    .is_some_and(|sample| sample.timestamp < horizon)
                {
                    series.samples.pop_front();
                    removed += 1;
                }
            }
            history
                .instances
                .retain(|_, series| !series.samples.is_empty());
        }
        metrics.retain(|_, history| !history.instances.is_empty());

        if removed > 0 {
            trace!("aged out {removed} samples");
        }
        removed
    }
}
