use std::sync::Arc;
use std::time::Duration;

use crate::config::DatasourceSettings;
use crate::endpoint::Endpoint;
use crate::models::{ResolvedTarget, TargetFormat};
use crate::transport::{HttpTransport, Requester};

pub(crate) fn requester(url: &str) -> Arc<Requester> {
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
    Arc::new(Requester::new(transport, &DatasourceSettings::with_url(url)))
}

pub(crate) fn endpoint(id: u64, url: &str) -> Arc<Endpoint> {
    Arc::new(Endpoint::create(
        id,
        requester(url),
        url,
        None,
        Duration::from_secs(600),
    ))
}

pub(crate) fn resolved_target(ref_id: &str, expr: &str) -> ResolvedTarget {
    ResolvedTarget {
        ref_id: ref_id.to_string(),
        expr: expr.to_string(),
        format: TargetFormat::TimeSeries,
        legend_format: None,
        min_pcp_version: None,
        uid: ResolvedTarget::uid(1, 1, ref_id),
        url: "http://a:44322".to_string(),
        container: None,
        endpoint: endpoint(0, "http://a:44322"),
    }
}
