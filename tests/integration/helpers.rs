//! Helper functions for integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pcp_datasource::{
    Backend, Datasource, DatasourceError, DatasourceResult,
    config::DatasourceSettings,
    endpoint::Endpoint,
    models::{Query, ResolvedTarget, TargetResult},
    observer::TargetListener,
    template::TemplateVariables,
    transport::HttpTransport,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn create_settings(url: Option<&str>, poll_interval: &str) -> DatasourceSettings {
    serde_json::from_value(serde_json::json!({
        "name": "pcp",
        "url": url,
        "jsonData": { "pollInterval": poll_interval }
    }))
    .unwrap()
}

pub fn create_datasource(settings: DatasourceSettings, backend: Arc<dyn Backend>) -> Datasource {
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    Datasource::new(
        settings,
        Arc::new(transport),
        Arc::new(TemplateVariables::new().with("host", "127.0.0.1")),
        backend,
    )
    .unwrap()
}

pub async fn mount_context(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/pmapi/context"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "context": 1 })),
        )
        .mount(server)
        .await;
}

pub async fn mount_fetch(server: &MockServer, metric: &str, instances: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/pmapi/fetch"))
        .and(query_param("names", metric))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            "values": [{ "name": metric, "instances": instances }]
        })))
        .mount(server)
        .await;
}

pub async fn mount_metadata(server: &MockServer, metric: &str, sem: &str, units: &str) {
    Mock::given(method("GET"))
        .and(path("/pmapi/metric"))
        .and(query_param("names", metric))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "metrics": [{ "name": metric, "sem": sem, "units": units, "indom": null }]
        })))
        .mount(server)
        .await;
}

/// Answers every request with the same server error
pub async fn mount_failure(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string(body))
        .mount(server)
        .await;
}

pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}

/// Backend without network access that records every call
#[derive(Default)]
pub struct RecordingBackend {
    pub fail_ref_id: Option<String>,
    pub handled: Mutex<Vec<String>>,
    pub configured: AtomicUsize,
    pub updated: Mutex<Vec<(ResolvedTarget, ResolvedTarget)>>,
    pub inactive: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn failing_on(ref_id: &str) -> Self {
        Self {
            fail_ref_id: Some(ref_id.to_string()),
            ..Default::default()
        }
    }

    pub fn configured(&self) -> usize {
        self.configured.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<(ResolvedTarget, ResolvedTarget)> {
        self.updated.lock().unwrap().clone()
    }

    pub fn inactive(&self) -> Vec<String> {
        self.inactive.lock().unwrap().clone()
    }
}

#[async_trait]
impl TargetListener for RecordingBackend {
    async fn on_target_update(&self, previous: &ResolvedTarget, current: &ResolvedTarget) {
        self.updated
            .lock()
            .unwrap()
            .push((previous.clone(), current.clone()));
    }

    async fn on_target_inactive(&self, target: &ResolvedTarget) {
        self.inactive.lock().unwrap().push(target.uid.clone());
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn handle_target(
        &self,
        _query: &Query,
        target: &ResolvedTarget,
    ) -> DatasourceResult<TargetResult> {
        self.handled.lock().unwrap().push(target.ref_id.clone());

        if self.fail_ref_id.as_deref() == Some(target.ref_id.as_str()) {
            return Err(DatasourceError::Target {
                ref_id: target.ref_id.clone(),
                message: "backend failure".to_string(),
            });
        }

        Ok(TargetResult {
            target: target.clone(),
            metrics: vec![],
        })
    }

    fn configure_endpoint(&self, _endpoint: &Endpoint) {
        self.configured.fetch_add(1, Ordering::SeqCst);
    }
}
