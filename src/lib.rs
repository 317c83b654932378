pub mod backends;
pub mod config;
pub mod datasource;
pub mod datastore;
pub mod endpoint;
pub mod error;
pub mod models;
pub mod observer;
pub mod pmapi;
pub mod poll;
pub mod template;
pub mod transform;
pub mod transport;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use datasource::{
    Backend, Datasource, DatasourceState, DatasourceStatus, MetricFindValue, Status,
};
pub use error::{DatasourceError, DatasourceResult, NetworkError, TransportError};
