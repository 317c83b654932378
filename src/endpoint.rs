//! Endpoints and the endpoint pool
//!
//! An [`Endpoint`] bundles everything needed to talk to one remote
//! `(url, container)` pair: the bound request function, the PMAPI client, the
//! local history cache and the poll service. The [`EndpointPool`] creates
//! endpoints lazily and guarantees at most one per key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::datastore::Datastore;
use crate::pmapi::{Context, PmapiClient};
use crate::poll::PollSrv;
use crate::transport::Requester;

/// Pool key: connection url and optional container
pub type EndpointKey = (String, Option<String>);

pub struct Endpoint {
    id: u64,
    url: String,
    container: Option<String>,
    pub client: Arc<PmapiClient>,
    pub datastore: Arc<Datastore>,
    pub poll_srv: PollSrv,
}

impl Endpoint {
    pub fn create(
        id: u64,
        requester: Arc<Requester>,
        url: &str,
        container: Option<&str>,
        history_retention: Duration,
    ) -> Self {
        let container = container.map(str::to_string);
        let client = Arc::new(PmapiClient::new(Context::new(
            requester,
            url,
            container.clone(),
        )));
        let datastore = Arc::new(Datastore::new(history_retention));
        let poll_srv = PollSrv::new(client.clone(), datastore.clone());

        Self {
            id,
            url: url.to_string(),
            container,
            client,
            datastore,
            poll_srv,
        }
    }

    /// Stable identity, used to group targets per endpoint
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("container", &self.container)
            .finish()
    }
}

#[derive(Default)]
pub struct EndpointPool {
    endpoints: Mutex<HashMap<EndpointKey, Arc<Endpoint>>>,
    next_id: AtomicU64,
}

impl EndpointPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &str, container: Option<&str>) -> EndpointKey {
        (url.to_string(), container.map(str::to_string))
    }

    pub async fn find(&self, url: &str, container: Option<&str>) -> Option<Arc<Endpoint>> {
        self.endpoints
            .lock()
            .await
            .get(&Self::key(url, container))
            .cloned()
    }

    /// Return the pooled endpoint for `(url, container)`, creating and
    /// configuring it on first use.
    ///
    /// The pool lock is held while `configure` runs, so concurrent callers
    /// never construct or configure the same key twice.
    pub async fn get_or_create<F>(
        &self,
        url: &str,
        container: Option<&str>,
        requester: &Arc<Requester>,
        history_retention: Duration,
        configure: F,
    ) -> Arc<Endpoint>
    where
        F: FnOnce(&Endpoint),
    {
        let mut endpoints = self.endpoints.lock().await;
        if let Some(endpoint) = endpoints.get(&Self::key(url, container)) {
            return endpoint.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let endpoint = Endpoint::create(id, requester.clone(), url, container, history_retention);
        configure(&endpoint);

        debug!("created endpoint {id} for {url} (container: {container:?})");
        let endpoint = Arc::new(endpoint);
        endpoints.insert(Self::key(url, container), endpoint.clone());
        endpoint
    }

    /// All pooled endpoints, in no particular order
    pub async fn list(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.endpoints.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.endpoints.lock().await.clear();
    }
}
