//! Request transport
//!
//! [`Transport`] performs the actual network call. [`Requester`] is the request
//! function bound to one data source: it attaches the configured headers and
//! credentials flag and wraps every transport failure into
//! [`DatasourceError::Network`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::DatasourceSettings;
use crate::error::{DatasourceError, DatasourceResult, NetworkError, TransportError};

/// A single GET request against a remote endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub with_credentials: bool,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and decode the JSON response body
    async fn send(&self, request: Request) -> Result<Value, TransportError>;
}

/// `reqwest`-based transport
pub struct HttpTransport {
    /// Plain client
    client: reqwest::Client,

    /// Client with a cookie store, used for `with_credentials` requests
    credentialed: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let build = |cookies: bool| {
            reqwest::Client::builder()
                .timeout(timeout)
                .cookie_store(cookies)
                .build()
                .map_err(|e| TransportError::new(format!("failed to build HTTP client: {e}")))
        };

        Ok(Self {
            client: build(false)?,
            credentialed: build(true)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let client = if request.with_credentials {
            &self.credentialed
        } else {
            &self.client
        };

        trace!("GET {} {:?}", request.url, request.params);

        let mut builder = client.get(&request.url).query(&request.params);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(format!("request to {} failed: {e}", request.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::with_status(status.as_u16(), body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::with_status(status.as_u16(), format!("invalid body: {e}")))
    }
}

/// The request function bound to one data source
pub struct Requester {
    transport: Arc<dyn Transport>,
    headers: Vec<(String, String)>,
    with_credentials: bool,
}

impl Requester {
    pub fn new(transport: Arc<dyn Transport>, settings: &DatasourceSettings) -> Self {
        Self {
            transport,
            headers: settings.headers(),
            with_credentials: settings.with_credentials,
        }
    }

    pub async fn request(
        &self,
        url: &str,
        params: Vec<(String, String)>,
    ) -> DatasourceResult<Value> {
        let request = Request {
            url: url.to_string(),
            params,
            headers: self.headers.clone(),
            with_credentials: self.with_credentials,
        };

        self.transport.send(request).await.map_err(|cause| {
            debug!("request to {url} failed: {cause}");
            DatasourceError::Network(NetworkError { cause })
        })
    }
}
