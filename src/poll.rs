//! Poll service of one endpoint
//!
//! Backends register the metrics each live target needs; every background tick
//! fetches the union of all registered metrics and appends the result to the
//! endpoint's [`Datastore`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use crate::datastore::Datastore;
use crate::error::DatasourceResult;
use crate::pmapi::PmapiClient;

pub struct PollSrv {
    client: Arc<PmapiClient>,
    datastore: Arc<Datastore>,

    /// target uid -> metric names
    registrations: Mutex<HashMap<String, Vec<String>>>,
}

impl PollSrv {
    pub fn new(client: Arc<PmapiClient>, datastore: Arc<Datastore>) -> Self {
        Self {
            client,
            datastore,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the metrics polled on behalf of a target
    pub async fn register(&self, uid: &str, names: Vec<String>) {
        debug!("registering {uid}: {names:?}");
        self.registrations.lock().await.insert(uid.to_string(), names);
    }

    /// Stop polling on behalf of a target; returns whether it was registered
    pub async fn unregister(&self, uid: &str) -> bool {
        let removed = self.registrations.lock().await.remove(uid).is_some();
        if removed {
            debug!("unregistered {uid}");
        }
        removed
    }

    pub async fn is_registered(&self, uid: &str) -> bool {
        self.registrations.lock().await.contains_key(uid)
    }

    /// Deduplicated, sorted union of all registered metric names
    pub async fn registered_metrics(&self) -> Vec<String> {
        let registrations = self.registrations.lock().await;
        registrations
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Fetch every registered metric once
    #[instrument(skip(self), fields(url = %self.client.url()))]
    pub async fn poll(&self) -> DatasourceResult<()> {
        let names = self.registered_metrics().await;
        if names.is_empty() {
            trace!("nothing registered, skipping poll");
            return Ok(());
        }
        self.poll_metrics(&names).await
    }

    /// Fetch the given metrics once and store the result
    pub async fn poll_metrics(&self, names: &[String]) -> DatasourceResult<()> {
        let response = self.client.get_metric_values(names).await?;

        let mut instance_names = HashMap::new();
        for metric in &response.values {
            let ids: Vec<u32> = metric.instances.iter().filter_map(|i| i.instance).collect();
            if ids.is_empty() {
                continue;
            }

            let mut names = self.client.get_instance_names(&metric.name, false).await?;
            if ids.iter().any(|id| !names.contains_key(id)) {
                names = self.client.get_instance_names(&metric.name, true).await?;
            }
            instance_names.insert(metric.name.clone(), names);
        }

        self.datastore.ingest(&response, &instance_names).await;
        trace!("stored {} metrics", response.values.len());
        Ok(())
    }
}
