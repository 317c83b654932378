//! Client for the PMAPI REST interface of a remote pmproxy
//!
//! Every [`Endpoint`](crate::endpoint::Endpoint) owns one [`PmapiClient`]. The
//! client creates its remote context lazily and caches metric metadata and
//! instance names, which rarely change.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, trace, warn};

use crate::error::{DatasourceError, DatasourceResult};
use crate::models::{SampleValue, Semantics};
use crate::transport::Requester;

/// Seconds after which pmproxy drops an idle context
const CONTEXT_POLL_TIMEOUT_SECS: u64 = 30;

/// Connection parameters of one remote endpoint
#[derive(Clone)]
pub struct Context {
    pub requester: Arc<Requester>,
    pub url: String,
    pub container: Option<String>,
}

impl Context {
    pub fn new(
        requester: Arc<Requester>,
        url: impl Into<String>,
        container: Option<String>,
    ) -> Self {
        Self {
            requester,
            url: url.into().trim_end_matches('/').to_string(),
            container,
        }
    }
}

/// Static description of a metric
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricMetadata {
    pub name: String,
    #[serde(default)]
    pub sem: Semantics,
    #[serde(default)]
    pub units: String,
    pub indom: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchedInstance {
    pub instance: Option<u32>,
    pub value: SampleValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchedMetric {
    pub name: String,
    pub instances: Vec<FetchedInstance>,
}

/// Result of a single `/pmapi/fetch`
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<FetchedMetric>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Seconds(f64),
    Split { s: i64, us: i64 },
}

impl RawTimestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Seconds(secs) => {
                let millis = (secs * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis).single()
            }
            RawTimestamp::Split { s, us } => {
                let nanos = u32::try_from(*us)
                    .ok()
                    .filter(|us| *us < 1_000_000)
                    .and_then(|us| us.checked_mul(1000))?;
                Utc.timestamp_opt(*s, nanos).single()
            }
        }
    }
}

#[derive(Deserialize)]
struct RawFetchResponse {
    timestamp: RawTimestamp,
    #[serde(default)]
    values: Vec<FetchedMetric>,
}

#[derive(Deserialize)]
struct ContextResponse {
    context: u64,
}

#[derive(Deserialize)]
struct MetricResponse {
    #[serde(default)]
    metrics: Vec<MetricMetadata>,
}

#[derive(Deserialize)]
struct IndomInstance {
    instance: u32,
    name: String,
}

#[derive(Deserialize)]
struct IndomResponse {
    #[serde(default)]
    instances: Vec<IndomInstance>,
}

pub struct PmapiClient {
    context: Context,

    /// Remote context id, created on first use
    context_id: Mutex<Option<u64>>,

    metadata: RwLock<HashMap<String, MetricMetadata>>,

    /// metric name -> instance id -> instance name
    instance_names: RwLock<HashMap<String, HashMap<u32, String>>>,
}

impl PmapiClient {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            context_id: Mutex::new(None),
            metadata: RwLock::new(HashMap::new()),
            instance_names: RwLock::new(HashMap::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.context.url
    }

    pub fn container(&self) -> Option<&str> {
        self.context.container.as_deref()
    }

    async fn context_id(&self) -> DatasourceResult<u64> {
        let mut slot = self.context_id.lock().await;
        if let Some(id) = *slot {
            return Ok(id);
        }

        let response = self
            .context
            .requester
            .request(
                &format!("{}/pmapi/context", self.context.url),
                vec![
                    ("hostspec".to_string(), "localhost".to_string()),
                    (
                        "polltimeout".to_string(),
                        CONTEXT_POLL_TIMEOUT_SECS.to_string(),
                    ),
                ],
            )
            .await?;
        let id = serde_json::from_value::<ContextResponse>(response)?.context;

        if let Some(container) = &self.context.container {
            self.context
                .requester
                .request(
                    &format!("{}/pmapi/store", self.context.url),
                    vec![
                        ("context".to_string(), id.to_string()),
                        ("name".to_string(), "pmcd.client.container".to_string()),
                        ("value".to_string(), container.clone()),
                    ],
                )
                .await?;
        }

        debug!("created context {id} on {}", self.context.url);
        *slot = Some(id);
        Ok(id)
    }

    async fn context_request(
        &self,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> DatasourceResult<serde_json::Value> {
        let id = self.context_id().await?;
        params.push(("context".to_string(), id.to_string()));

        let result = self
            .context
            .requester
            .request(&format!("{}{}", self.context.url, path), params)
            .await;

        if let Err(DatasourceError::Network(err)) = &result {
            if err.status() == Some(403) {
                warn!("context {id} on {} expired", self.context.url);
                let mut slot = self.context_id.lock().await;
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        result
    }

    #[instrument(skip(self), fields(url = %self.context.url))]
    pub async fn get_metric_values(&self, names: &[String]) -> DatasourceResult<FetchResponse> {
        let response = self
            .context_request("/pmapi/fetch", vec![("names".to_string(), names.join(","))])
            .await?;
        let raw: RawFetchResponse = serde_json::from_value(response)?;
        let timestamp = raw
            .timestamp
            .to_utc()
            .ok_or_else(|| DatasourceError::Protocol("fetch timestamp out of range".to_string()))?;

        trace!("fetched {} metrics", raw.values.len());
        Ok(FetchResponse {
            timestamp,
            values: raw.values,
        })
    }

    pub async fn get_metric_metadata(&self, name: &str) -> DatasourceResult<MetricMetadata> {
        if let Some(metadata) = self.metadata.read().await.get(name) {
            return Ok(metadata.clone());
        }

        let response = self
            .context_request("/pmapi/metric", vec![("names".to_string(), name.to_string())])
            .await?;
        let metadata = serde_json::from_value::<MetricResponse>(response)?
            .metrics
            .into_iter()
            .find(|metric| metric.name == name)
            .ok_or_else(|| DatasourceError::Protocol(format!("unknown metric {name}")))?;

        self.metadata
            .write()
            .await
            .insert(name.to_string(), metadata.clone());
        Ok(metadata)
    }

    /// Instance names of a metric; `refresh` bypasses the cache
    pub async fn get_instance_names(
        &self,
        name: &str,
        refresh: bool,
    ) -> DatasourceResult<HashMap<u32, String>> {
        if !refresh {
            if let Some(names) = self.instance_names.read().await.get(name) {
                return Ok(names.clone());
            }
        }

        let response = self
            .context_request("/pmapi/indom", vec![("name".to_string(), name.to_string())])
            .await?;
        let names: HashMap<u32, String> = serde_json::from_value::<IndomResponse>(response)?
            .instances
            .into_iter()
            .map(|instance| (instance.instance, instance.name))
            .collect();

        self.instance_names
            .write()
            .await
            .insert(name.to_string(), names.clone());
        Ok(names)
    }
}
