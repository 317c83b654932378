use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::DatasourceResult;
use crate::util::{is_blank, parse_interval};

/// Data source instance settings, as handed over by the dashboard host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSettings {
    #[serde(default)]
    pub name: String,

    /// Default connection url for targets without their own url
    pub url: Option<String>,

    /// Pre-encoded `Authorization` header value
    pub basic_auth: Option<String>,

    #[serde(default)]
    pub with_credentials: bool,

    #[serde(default)]
    pub json_data: JsonData,
}

/// Backend-specific part of the instance settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonData {
    /// Background poll interval, `"0s"` disables polling (default: 1s)
    pub poll_interval: Option<String>,

    /// Keep polling a target for this long after it was last requested (default: 50s)
    #[serde(alias = "inactivityTimeoutMs")]
    pub inactivity_timeout: Option<String>,

    /// Age-out horizon of the local history cache (default: 10m)
    pub local_history_age: Option<String>,

    /// Default container for targets without their own container
    pub container: Option<String>,
}

/// Parsed timing options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub poll_interval: Duration,
    pub inactivity_timeout: Duration,
    pub local_history_age: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(50),
            local_history_age: Duration::from_secs(10 * 60),
        }
    }
}

impl DatasourceSettings {
    /// Settings for a single connection url, everything else defaulted
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// The configured url, unless it is blank
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !is_blank(Some(url)))
    }

    /// The configured container, unless it is blank
    pub fn container(&self) -> Option<&str> {
        self.json_data
            .container
            .as_deref()
            .filter(|container| !is_blank(Some(container)))
    }

    pub fn intervals(&self) -> DatasourceResult<Intervals> {
        let defaults = Intervals::default();
        let parse = |value: &Option<String>, default: Duration| match value {
            Some(value) if !value.trim().is_empty() => parse_interval(value),
            _ => Ok(default),
        };

        Ok(Intervals {
            poll_interval: parse(&self.json_data.poll_interval, defaults.poll_interval)?,
            inactivity_timeout: parse(
                &self.json_data.inactivity_timeout,
                defaults.inactivity_timeout,
            )?,
            local_history_age: parse(
                &self.json_data.local_history_age,
                defaults.local_history_age,
            )?,
        })
    }

    /// Headers sent with every request
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(auth) = self.basic_auth.as_ref().filter(|auth| !auth.is_empty()) {
            headers.push(("Authorization".to_string(), auth.clone()));
        }
        headers
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<DatasourceSettings> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
