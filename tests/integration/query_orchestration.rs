//! Panel queries through the orchestrator

use std::sync::Arc;

use assert_matches::assert_matches;
use pcp_datasource::{
    DatasourceError,
    backends::VectorBackend,
    models::{Query, QueryTarget, TargetFormat, TimeRange},
    transform::PanelFrame,
};
use pretty_assertions::assert_eq;
use wiremock::MockServer;

use crate::helpers::*;

fn query(targets: Vec<QueryTarget>) -> Query {
    Query {
        targets,
        dashboard_id: 1,
        panel_id: 1,
        range: TimeRange::last(chrono::Duration::minutes(5)),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_no_active_targets_returns_empty_data_without_requests() {
    let server = MockServer::start().await;
    let backend = Arc::new(RecordingBackend::default());
    let datasource = create_datasource(create_settings(Some(&server.uri()), "0s"), backend.clone());

    let mut hidden = QueryTarget::new("A", "kernel.all.load");
    hidden.hide = true;
    let blank = QueryTarget::new("B", "  ");

    let data = datasource.query(&query(vec![hidden, blank])).await.unwrap();

    assert!(data.data.is_empty());
    assert!(backend.handled().is_empty());
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn test_mixed_formats_fail_before_any_request() {
    let server = MockServer::start().await;
    let backend = Arc::new(RecordingBackend::default());
    let datasource = create_datasource(create_settings(Some(&server.uri()), "0s"), backend.clone());

    let series = QueryTarget::new("A", "kernel.all.load");
    let mut table = QueryTarget::new("B", "mem.util.free");
    table.format = TargetFormat::Table;

    let result = datasource.query(&query(vec![series, table])).await;

    assert_matches!(result, Err(DatasourceError::FormatMismatch));
    assert!(backend.handled().is_empty());
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn test_single_target_end_to_end() {
    let server = MockServer::start().await;
    mount_context(&server).await;
    mount_fetch(
        &server,
        "kernel.all.load",
        serde_json::json!([{ "instance": null, "value": 0.42 }]),
    )
    .await;
    mount_metadata(&server, "kernel.all.load", "instant", "none").await;

    let datasource = create_datasource(
        create_settings(Some(&server.uri()), "0s"),
        Arc::new(VectorBackend::new()),
    );
    assert!(!datasource.is_polling());

    let data = datasource
        .query(&query(vec![QueryTarget::new("A", "kernel.all.load")]))
        .await
        .unwrap();

    assert_eq!(data.data.len(), 1);
    assert_matches!(&data.data[0], PanelFrame::TimeSeries(series) => {
        assert_eq!(series.target, "kernel.all.load");
        assert_eq!(series.ref_id, "A");
        assert_eq!(series.datapoints.len(), 1);
    });
    assert_eq!(datasource.state().pool.len().await, 1);
}

#[tokio::test]
async fn test_one_failing_target_fails_the_whole_query() {
    let server = MockServer::start().await;
    let backend = Arc::new(RecordingBackend::failing_on("B"));
    let datasource = create_datasource(create_settings(Some(&server.uri()), "0s"), backend.clone());

    let result = datasource
        .query(&query(vec![
            QueryTarget::new("A", "kernel.all.load"),
            QueryTarget::new("B", "mem.util.free"),
            QueryTarget::new("C", "disk.all.read"),
        ]))
        .await;

    assert_matches!(result, Err(DatasourceError::Target { ref_id, .. }) if ref_id == "B");
}

#[tokio::test]
async fn test_target_url_and_container_select_their_own_endpoint() {
    let backend = Arc::new(RecordingBackend::default());
    let datasource = create_datasource(
        create_settings(Some("http://default:44322"), "0s"),
        backend.clone(),
    );

    let default = QueryTarget::new("A", "kernel.all.load");
    let mut other_host = QueryTarget::new("B", "kernel.all.load");
    other_host.url = Some("http://$host:44322".to_string());
    let mut container = QueryTarget::new("C", "kernel.all.load");
    container.container = Some("web".to_string());

    datasource
        .query(&query(vec![default, other_host, container]))
        .await
        .unwrap();

    let pool = &datasource.state().pool;
    assert_eq!(pool.len().await, 3);
    assert!(pool.find("http://default:44322", None).await.is_some());
    assert!(pool.find("http://127.0.0.1:44322", None).await.is_some());
    assert!(pool.find("http://default:44322", Some("web")).await.is_some());

    let mut handled = backend.handled();
    handled.sort();
    assert_eq!(handled, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_endpoint_is_configured_once_across_queries() {
    let backend = Arc::new(RecordingBackend::default());
    let datasource = create_datasource(
        create_settings(Some("http://default:44322"), "0s"),
        backend.clone(),
    );

    let targets = vec![
        QueryTarget::new("A", "kernel.all.load"),
        QueryTarget::new("B", "mem.util.free"),
    ];
    datasource.query(&query(targets.clone())).await.unwrap();
    datasource.query(&query(targets)).await.unwrap();

    assert_eq!(backend.configured(), 1);
    assert_eq!(datasource.state().pool.len().await, 1);
}

#[tokio::test]
async fn test_target_without_any_url_is_config_error() {
    let backend = Arc::new(RecordingBackend::default());
    let datasource = create_datasource(create_settings(None, "0s"), backend.clone());

    let result = datasource
        .query(&query(vec![QueryTarget::new("A", "kernel.all.load")]))
        .await;

    assert_matches!(result, Err(DatasourceError::Config(message)) => {
        assert!(message.contains("query editor"));
    });
    assert!(backend.handled().is_empty());
    assert!(datasource.state().pool.is_empty().await);
}

#[tokio::test]
async fn test_changed_target_definition_fires_update() {
    let backend = Arc::new(RecordingBackend::default());
    let datasource = create_datasource(
        create_settings(Some("http://default:44322"), "0s"),
        backend.clone(),
    );

    datasource
        .query(&query(vec![QueryTarget::new("A", "kernel.all.load")]))
        .await
        .unwrap();
    // identical definition, no update
    datasource
        .query(&query(vec![QueryTarget::new("A", "kernel.all.load")]))
        .await
        .unwrap();
    assert!(backend.updated().is_empty());

    let mut moved = QueryTarget::new("A", "mem.util.free");
    moved.url = Some("http://other:44322".to_string());
    datasource.query(&query(vec![moved])).await.unwrap();

    let updated = backend.updated();
    assert_eq!(updated.len(), 1);
    let (previous, current) = &updated[0];
    assert_eq!(previous.uid, "1/1/A");
    assert_eq!(current.uid, "1/1/A");
    assert_eq!(previous.expr, "kernel.all.load");
    assert_eq!(current.expr, "mem.util.free");
    assert_eq!(previous.url, "http://default:44322");
    assert_eq!(current.url, "http://other:44322");
    assert_ne!(previous.endpoint.id(), current.endpoint.id());
}

#[tokio::test]
async fn test_url_change_moves_poll_registration() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for server in [&first, &second] {
        mount_context(server).await;
        mount_fetch(
            server,
            "kernel.all.load",
            serde_json::json!([{ "instance": null, "value": 0.5 }]),
        )
        .await;
        mount_metadata(server, "kernel.all.load", "instant", "none").await;
    }

    let datasource = create_datasource(
        create_settings(Some(&first.uri()), "0s"),
        Arc::new(VectorBackend::new()),
    );

    datasource
        .query(&query(vec![QueryTarget::new("A", "kernel.all.load")]))
        .await
        .unwrap();
    let old_endpoint = datasource.state().pool.find(&first.uri(), None).await.unwrap();
    assert_eq!(
        old_endpoint.poll_srv.registered_metrics().await,
        vec!["kernel.all.load".to_string()]
    );

    let mut moved = QueryTarget::new("A", "kernel.all.load");
    moved.url = Some(second.uri());
    datasource.query(&query(vec![moved])).await.unwrap();

    let new_endpoint = datasource.state().pool.find(&second.uri(), None).await.unwrap();
    assert!(old_endpoint.poll_srv.registered_metrics().await.is_empty());
    assert!(new_endpoint.poll_srv.is_registered("1/1/A").await);
    assert_eq!(
        new_endpoint.poll_srv.registered_metrics().await,
        vec!["kernel.all.load".to_string()]
    );
}
