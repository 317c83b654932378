//! Background poller, error delivery and target liveness

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pcp_datasource::{
    DatasourceError,
    backends::VectorBackend,
    models::{Query, QueryTarget, TimeRange},
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_identical_background_errors_are_delivered_once() {
    let server = MockServer::start().await;
    mount_failure(&server, "pmproxy unavailable").await;

    let datasource = create_datasource(
        create_settings(Some(&server.uri()), "0s"),
        Arc::new(VectorBackend::new()),
    );
    let endpoint = datasource.get_or_create_endpoint(&server.uri(), None).await;
    endpoint
        .poll_srv
        .register("1/1/A", vec!["kernel.all.load".to_string()])
        .await;

    assert!(!datasource.poll_all().await);
    assert!(!datasource.poll_all().await);
    assert_eq!(datasource.state().background_errors.len().await, 1);

    let result = datasource.query(&Query::default()).await;
    assert_matches!(result, Err(DatasourceError::Background(messages)) => {
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("pmproxy unavailable"));
    });

    assert!(datasource.state().background_errors.is_empty().await);
    datasource.query(&Query::default()).await.unwrap();
}

#[tokio::test]
async fn test_failing_endpoint_does_not_block_the_others() {
    let broken = MockServer::start().await;
    mount_failure(&broken, "broken").await;

    let healthy = MockServer::start().await;
    mount_context(&healthy).await;
    mount_fetch(
        &healthy,
        "kernel.all.load",
        serde_json::json!([{ "instance": null, "value": 1.0 }]),
    )
    .await;

    let datasource = create_datasource(
        create_settings(Some(&healthy.uri()), "0s"),
        Arc::new(VectorBackend::new()),
    );
    for url in [broken.uri(), healthy.uri()] {
        datasource
            .get_or_create_endpoint(&url, None)
            .await
            .poll_srv
            .register("1/1/A", vec!["kernel.all.load".to_string()])
            .await;
    }

    assert!(!datasource.poll_all().await);

    let healthy_endpoint = datasource.state().pool.find(&healthy.uri(), None).await.unwrap();
    assert!(healthy_endpoint.datastore.has_metric("kernel.all.load").await);
    assert_eq!(datasource.state().background_errors.len().await, 1);
}

#[tokio::test]
async fn test_poller_fills_history_in_the_background() {
    let server = MockServer::start().await;
    mount_context(&server).await;
    mount_fetch(
        &server,
        "kernel.all.load",
        serde_json::json!([{ "instance": null, "value": 1.0 }]),
    )
    .await;

    let mut datasource = create_datasource(
        create_settings(Some(&server.uri()), "100ms"),
        Arc::new(VectorBackend::new()),
    );
    assert!(datasource.is_polling());

    let endpoint = datasource.get_or_create_endpoint(&server.uri(), None).await;
    endpoint
        .poll_srv
        .register("1/1/A", vec!["kernel.all.load".to_string()])
        .await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    datasource.shutdown().await;

    assert!(!datasource.is_polling());
    assert!(endpoint.datastore.has_metric("kernel.all.load").await);
}

#[tokio::test(start_paused = true)]
async fn test_idle_targets_are_evicted_by_the_poll_tick() {
    let backend = Arc::new(RecordingBackend::default());
    let mut settings = create_settings(Some("http://default:44322"), "0s");
    settings.json_data.inactivity_timeout = Some("10s".to_string());
    let datasource = create_datasource(settings, backend.clone());

    let query = Query {
        targets: vec![QueryTarget::new("A", "kernel.all.load")],
        dashboard_id: 3,
        panel_id: 7,
        range: TimeRange::last(chrono::Duration::minutes(5)),
        ..Default::default()
    };
    datasource.query(&query).await.unwrap();
    assert!(datasource.state().observer.is_tracked("3/7/A").await);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(datasource.poll_all().await);
    assert!(backend.inactive().is_empty());

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(datasource.poll_all().await);
    assert_eq!(backend.inactive(), vec!["3/7/A".to_string()]);
    assert!(!datasource.state().observer.is_tracked("3/7/A").await);
}

#[tokio::test]
async fn test_malformed_fetch_keeps_poller_running() {
    let server = MockServer::start().await;
    mount_context(&server).await;
    Mock::given(method("GET"))
        .and(path("/pmapi/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "timestamp": { "s": 1_700_000_000, "us": 5_000_000 },
            "values": [{ "name": "kernel.all.load", "instances": [] }]
        })))
        .mount(&server)
        .await;

    let mut datasource = create_datasource(
        create_settings(Some(&server.uri()), "100ms"),
        Arc::new(VectorBackend::new()),
    );
    datasource
        .get_or_create_endpoint(&server.uri(), None)
        .await
        .poll_srv
        .register("1/1/A", vec!["kernel.all.load".to_string()])
        .await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(datasource.is_polling());
    let result = datasource.query(&Query::default()).await;
    assert_matches!(result, Err(DatasourceError::Background(messages)) => {
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("timestamp"));
    });

    datasource.shutdown().await;
}
