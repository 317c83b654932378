//! Live metrics backend
//!
//! Serves panels from the endpoint's local history, which the background
//! poller keeps filled for every registered target. A target seen for the
//! first time is fetched on demand so the panel is not empty until the next
//! poll tick.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::datasource::Backend;
use crate::error::{DatasourceError, DatasourceResult};
use crate::models::{Query, ResolvedTarget, TargetResult};
use crate::observer::TargetListener;

#[derive(Debug, Default)]
pub struct VectorBackend;

impl VectorBackend {
    pub fn new() -> Self {
        Self
    }

    fn metric_names(target: &ResolvedTarget) -> Vec<String> {
        vec![target.expr.clone()]
    }
}

#[async_trait]
impl TargetListener for VectorBackend {
    async fn on_target_update(&self, previous: &ResolvedTarget, current: &ResolvedTarget) {
        if previous.expr == current.expr && previous.endpoint.id() == current.endpoint.id() {
            return;
        }

        debug!("moving poll registration of {}", current.uid);
        previous.endpoint.poll_srv.unregister(&previous.uid).await;
        current
            .endpoint
            .poll_srv
            .register(&current.uid, Self::metric_names(current))
            .await;
    }

    async fn on_target_inactive(&self, target: &ResolvedTarget) {
        target.endpoint.poll_srv.unregister(&target.uid).await;
    }
}

#[async_trait]
impl Backend for VectorBackend {
    #[instrument(skip_all, fields(ref_id = %target.ref_id, expr = %target.expr))]
    async fn handle_target(
        &self,
        query: &Query,
        target: &ResolvedTarget,
    ) -> DatasourceResult<TargetResult> {
        let endpoint = &target.endpoint;
        let names = Self::metric_names(target);

        if !endpoint.poll_srv.is_registered(&target.uid).await {
            endpoint.poll_srv.register(&target.uid, names.clone()).await;
        }

        let mut missing = Vec::new();
        for name in &names {
            if !endpoint.datastore.has_metric(name).await {
                missing.push(name.clone());
            }
        }
        if !missing.is_empty() {
            endpoint.poll_srv.poll_metrics(&missing).await?;
        }

        let mut metrics = Vec::with_capacity(names.len());
        for name in &names {
            let metric = endpoint
                .datastore
                .query_metric(name, &query.range)
                .await
                .ok_or_else(|| DatasourceError::Target {
                    ref_id: target.ref_id.clone(),
                    message: format!("no values for metric {name}"),
                })?;
            metrics.push(metric);
        }

        Ok(TargetResult {
            target: target.clone(),
            metrics,
        })
    }
}
