//! Query orchestration
//!
//! [`Datasource`] is the entry point used by the dashboard host. It resolves
//! panel targets to pooled endpoints, fans the per-target work out to the
//! configured [`Backend`], and assembles the results into panel frames.
//! Independently, a background poller keeps the endpoints' history warm and
//! evicts targets nobody asked for recently.
//!
//! ## Architecture Overview
//!
//! ```text
//!   query(Query)
//!       │ drain background errors ──► fail with all of them
//!       │ resolve targets (url/container, uid, endpoint)
//!       │ refresh liveness
//!       ▼
//!   group by endpoint ──► [handle_target, ...] per group, all concurrently
//!       │                           (first failure fails the whole query)
//!       ▼
//!   value transformations ──► panel transformations ──► PanelData
//!
//!   poller tick ──► per endpoint: liveness cleanup, history cleanup, poll
//!                   failures ──► BackgroundErrors
//! ```
//!
//! ## Shared State
//!
//! The endpoint pool, the background error set and the liveness tracker are
//! process-wide and live in [`DatasourceState`], which is injected at
//! construction. Each of them carries its own lock.

pub mod poller;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::config::{DatasourceSettings, Intervals};
use crate::endpoint::{Endpoint, EndpointPool};
use crate::error::{DatasourceError, DatasourceResult};
use crate::models::{Query, ResolvedTarget, ScopedVars, TargetResult};
use crate::observer::{DashboardObserver, TargetListener};
use crate::pmapi::{Context, PmapiClient};
use crate::template::TemplateSrv;
use crate::transform::{
    PanelData, PanelTransformations, ValueTransformation, default_legend_formatter,
};
use crate::transport::{Requester, Transport};
use crate::util::is_blank;

pub use poller::{BackgroundErrors, PollerHandle};

/// Metric fetched by the connection check
const PROBE_METRIC: &str = "pmcd.hostname";

const CONFIGURE_URL_HINT: &str =
    "To use this data source, please configure the URL in the query editor.";

/// Backend-specific behavior plugged into the orchestrator
///
/// The liveness callbacks come from [`TargetListener`].
#[async_trait]
pub trait Backend: TargetListener {
    /// Fetch the data of a single resolved target
    async fn handle_target(
        &self,
        query: &Query,
        target: &ResolvedTarget,
    ) -> DatasourceResult<TargetResult>;

    /// Called once for every newly created endpoint
    fn configure_endpoint(&self, _endpoint: &Endpoint) {}
}

/// Process-wide mutable state of a data source
#[derive(Clone)]
pub struct DatasourceState {
    pub pool: Arc<EndpointPool>,
    pub background_errors: Arc<BackgroundErrors>,
    pub observer: Arc<DashboardObserver>,
}

impl DatasourceState {
    pub fn new(intervals: &Intervals) -> Self {
        Self {
            pool: Arc::new(EndpointPool::new()),
            background_errors: Arc::new(BackgroundErrors::new()),
            observer: Arc::new(DashboardObserver::new(intervals.inactivity_timeout)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Outcome of the connection check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceStatus {
    pub status: Status,
    pub message: String,
}

/// One option of a query-type dashboard variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFindValue {
    pub text: String,
    pub value: String,
}

struct DatasourceCore {
    settings: DatasourceSettings,
    intervals: Intervals,
    requester: Arc<Requester>,
    templates: Arc<dyn TemplateSrv>,
    backend: Arc<dyn Backend>,
    state: DatasourceState,
    transformations: PanelTransformations,
}

pub struct Datasource {
    core: Arc<DatasourceCore>,
    poller: Option<PollerHandle>,
}

impl Datasource {
    /// Create a data source with fresh state.
    ///
    /// Must be called inside a tokio runtime when background polling is
    /// enabled, as the poller is spawned right away.
    pub fn new(
        settings: DatasourceSettings,
        transport: Arc<dyn Transport>,
        templates: Arc<dyn TemplateSrv>,
        backend: Arc<dyn Backend>,
    ) -> DatasourceResult<Self> {
        let intervals = settings.intervals()?;
        let state = DatasourceState::new(&intervals);
        Self::with_state(settings, transport, templates, backend, state)
    }

    pub fn with_state(
        settings: DatasourceSettings,
        transport: Arc<dyn Transport>,
        templates: Arc<dyn TemplateSrv>,
        backend: Arc<dyn Backend>,
        state: DatasourceState,
    ) -> DatasourceResult<Self> {
        let intervals = settings.intervals()?;
        let requester = Arc::new(Requester::new(transport, &settings));

        let core = Arc::new(DatasourceCore {
            transformations: PanelTransformations::new(templates.clone()),
            settings,
            intervals,
            requester,
            templates,
            backend,
            state,
        });

        let poller = if intervals.poll_interval.is_zero() {
            debug!("background polling disabled");
            None
        } else {
            let core = core.clone();
            Some(PollerHandle::spawn(intervals.poll_interval, move || {
                let core = core.clone();
                async move { core.poll_all().await }
            }))
        };

        Ok(Self { core, poller })
    }

    pub fn name(&self) -> &str {
        &self.core.settings.name
    }

    pub fn intervals(&self) -> &Intervals {
        &self.core.intervals
    }

    pub fn state(&self) -> &DatasourceState {
        &self.core.state
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|poller| !poller.is_finished())
    }

    /// Panel query entry point
    pub async fn query(&self, query: &Query) -> DatasourceResult<PanelData> {
        self.core.query(query).await
    }

    /// Connection check entry point
    pub async fn test_datasource(&self) -> DatasourceStatus {
        self.core.test_datasource().await
    }

    /// Template variable entry point
    pub async fn metric_find_query(&self, query: &str) -> DatasourceResult<Vec<MetricFindValue>> {
        self.core.metric_find_query(query).await
    }

    /// Run one background poll tick; `false` if any endpoint failed
    pub async fn poll_all(&self) -> bool {
        self.core.poll_all().await
    }

    pub async fn get_or_create_endpoint(
        &self,
        url: &str,
        container: Option<&str>,
    ) -> Arc<Endpoint> {
        self.core.get_or_create_endpoint(url, container).await
    }

    /// Stop background polling
    pub async fn shutdown(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
    }
}

impl Drop for Datasource {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

impl DatasourceCore {
    #[instrument(skip(self))]
    async fn poll_all(&self) -> bool {
        let endpoints = self.state.pool.list().await;
        trace!("polling {} endpoints", endpoints.len());

        let results = join_all(endpoints.iter().map(|endpoint| self.poll_endpoint(endpoint))).await;

        let mut ok = true;
        for (endpoint, result) in endpoints.iter().zip(results) {
            if let Err(e) = result {
                warn!("background poll of {} failed: {e}", endpoint.url());
                self.state.background_errors.add(e.to_string()).await;
                ok = false;
            }
        }
        ok
    }

    async fn poll_endpoint(&self, endpoint: &Endpoint) -> DatasourceResult<()> {
        self.state.observer.cleanup(self.backend.as_ref()).await;
        endpoint.datastore.cleanup().await;
        endpoint.poll_srv.poll().await
    }

    async fn get_or_create_endpoint(&self, url: &str, container: Option<&str>) -> Arc<Endpoint> {
        self.state
            .pool
            .get_or_create(
                url,
                container,
                &self.requester,
                self.intervals.local_history_age,
                |endpoint| self.backend.configure_endpoint(endpoint),
            )
            .await
    }

    async fn test_datasource(&self) -> DatasourceStatus {
        let Some(url) = self.settings.url() else {
            return DatasourceStatus {
                status: Status::Error,
                message: format!("Empty URL. {CONFIGURE_URL_HINT}"),
            };
        };

        let client = PmapiClient::new(Context::new(
            self.requester.clone(),
            url,
            self.settings.container().map(str::to_string),
        ));

        match client.get_metric_values(&[PROBE_METRIC.to_string()]).await {
            Ok(_) => DatasourceStatus {
                status: Status::Success,
                message: "Data source is working".to_string(),
            },
            Err(e) => DatasourceStatus {
                status: Status::Error,
                message: format!("{e}. {CONFIGURE_URL_HINT}"),
            },
        }
    }

    async fn metric_find_query(&self, query: &str) -> DatasourceResult<Vec<MetricFindValue>> {
        let Some(url) = self.settings.url() else {
            return Err(DatasourceError::Config(
                "Please specify a connection URL in the datasource settings.".to_string(),
            ));
        };

        let expr = self.templates.replace(query, &ScopedVars::new());
        let endpoint = self
            .get_or_create_endpoint(url, self.settings.container())
            .await;
        let response = endpoint.client.get_metric_values(&[expr.clone()]).await?;

        let metric = response
            .values
            .into_iter()
            .next()
            .ok_or_else(|| DatasourceError::Protocol(format!("no values for {expr}")))?;

        Ok(metric
            .instances
            .into_iter()
            .map(|instance| {
                let value = instance.value.to_string();
                MetricFindValue {
                    text: value.clone(),
                    value,
                }
            })
            .collect())
    }

    /// Effective `(url, container)` of a target; target-level values win
    fn connection_params(
        &self,
        url: Option<&str>,
        container: Option<&str>,
        scoped_vars: &ScopedVars,
    ) -> DatasourceResult<(String, Option<String>)> {
        let url = match (url, self.settings.url()) {
            (Some(url), _) if !is_blank(Some(url)) => self.templates.replace(url, scoped_vars),
            (_, Some(default)) => default.to_string(),
            _ => {
                return Err(DatasourceError::Config(
                    "Please specify a connection URL in the datasource settings or in the query editor."
                        .to_string(),
                ));
            }
        };

        let container = match (container, self.settings.container()) {
            (Some(container), _) if !is_blank(Some(container)) => {
                Some(self.templates.replace(container, scoped_vars))
            }
            (_, default) => default.map(str::to_string),
        };

        Ok((url, container))
    }

    async fn build_query_targets(&self, query: &Query) -> DatasourceResult<Vec<ResolvedTarget>> {
        let mut targets = Vec::new();

        for target in &query.targets {
            let Some(expr) = target.expr.as_deref() else {
                continue;
            };
            if target.hide || target.is_typing || is_blank(Some(expr)) {
                continue;
            }

            let (url, container) = self.connection_params(
                target.url.as_deref(),
                target.container.as_deref(),
                &query.scoped_vars,
            )?;
            let endpoint = self
                .get_or_create_endpoint(&url, container.as_deref())
                .await;

            targets.push(ResolvedTarget {
                ref_id: target.ref_id.clone(),
                expr: self.templates.replace(expr.trim(), &query.scoped_vars),
                format: target.format,
                legend_format: target.legend_format.clone(),
                min_pcp_version: target.min_pcp_version.clone(),
                uid: ResolvedTarget::uid(query.dashboard_id, query.panel_id, &target.ref_id),
                url,
                container,
                endpoint,
            });
        }

        Ok(targets)
    }

    async fn query_targets_by_endpoint(
        &self,
        query: &Query,
        targets: &[ResolvedTarget],
    ) -> DatasourceResult<Vec<TargetResult>> {
        try_join_all(
            targets
                .iter()
                .map(|target| self.backend.handle_target(query, target)),
        )
        .await
    }

    async fn apply_transformations(&self, result: &mut TargetResult) -> DatasourceResult<()> {
        let client = result.target.endpoint.client.clone();
        let format = result.target.format;

        for metric in &mut result.metrics {
            let metadata = client.get_metric_metadata(&metric.name).await?;
            for instance in &mut metric.instances {
                let values = std::mem::take(&mut instance.values);
                instance.values = ValueTransformation::apply_transformations(
                    format,
                    metadata.sem,
                    &metadata.units,
                    values,
                );
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(dashboard = query.dashboard_id, panel = query.panel_id))]
    async fn query(&self, query: &Query) -> DatasourceResult<PanelData> {
        let errors = self.state.background_errors.drain().await;
        if !errors.is_empty() {
            debug!("delivering {} background errors", errors.len());
            return Err(DatasourceError::Background(errors));
        }

        let targets = self.build_query_targets(query).await?;
        let Some(first) = targets.first() else {
            return Ok(PanelData::default());
        };
        if targets.iter().any(|target| target.format != first.format) {
            return Err(DatasourceError::FormatMismatch);
        }

        self.state
            .observer
            .refresh(&targets, self.backend.as_ref())
            .await;

        let groups = group_by_endpoint(targets);
        trace!("querying {} endpoint groups", groups.len());

        let mut results: Vec<TargetResult> = try_join_all(
            groups
                .iter()
                .map(|group| self.query_targets_by_endpoint(query, group)),
        )
        .await?
        .into_iter()
        .flatten()
        .collect();

        for result in &mut results {
            self.apply_transformations(result).await?;
        }

        Ok(PanelData {
            data: self
                .transformations
                .transform(query, &results, default_legend_formatter),
        })
    }
}

/// Group targets by endpoint identity, keeping the per-endpoint target order
fn group_by_endpoint(targets: Vec<ResolvedTarget>) -> Vec<Vec<ResolvedTarget>> {
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut groups: Vec<Vec<ResolvedTarget>> = Vec::new();

    for target in targets {
        let id = target.endpoint.id();
        match index.get(&id) {
            Some(&position) => groups[position].push(target),
            None => {
                index.insert(id, groups.len());
                groups.push(vec![target]);
            }
        }
    }
    groups
}
