//! HTTP Resource API client for planekit
//!
//! Implements the [`planekit_core::ResourceClient`] contract against a REST
//! control plane: resource URLs under a subscription, bearer-token
//! authentication, and long-running operations surfaced as `202 Accepted`
//! with a status-polling URL.

mod client;
mod error;

pub use client::{ControlPlaneConfig, HttpResourceClient};
pub use error::ConfigError;
