//! Concrete [`Backend`](crate::datasource::Backend) implementations
//!
//! - **Vector**: live metrics served from locally polled history

pub mod vector;

pub use vector::VectorBackend;
