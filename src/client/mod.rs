//! Seam to the provider API client library.
//!
//! The collector never talks HTTP itself. Every section holds an
//! [`ApiClient`] for one service in one region and issues named operations
//! against it; the [`Session`] hands those clients out and answers the
//! initial access check.

#[cfg(test)]
pub mod mock;
pub mod recorded;
pub mod regions;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use recorded::RecordedSession;

/// Errors surfaced by an [`ApiClient`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{operation}: no such resource or operation")]
    NotFound { operation: String },

    #[error("{operation}: {message}")]
    Client { operation: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// The provider services a client can be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceClient {
    CostExplorer,
    Ec2,
    Elb,
    Elbv2,
    S3,
    Rds,
    Cloudwatch,
}

impl ServiceClient {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::CostExplorer => "ce",
            Self::Ec2 => "ec2",
            Self::Elb => "elb",
            Self::Elbv2 => "elbv2",
            Self::S3 => "s3",
            Self::Rds => "rds",
            Self::Cloudwatch => "cloudwatch",
        }
    }
}

/// Synchronous request/response access to one service of one region.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue `operation` with the given parameters and return the decoded response.
    async fn call(&self, operation: &str, params: Value) -> std::result::Result<Value, ApiError>;
}

/// Factory for per-region service clients.
#[async_trait]
pub trait Session: Send + Sync {
    /// # Errors
    ///
    /// Returns `Error::Region` if no client can be built for this region.
    fn client(&self, service: ServiceClient, region: &str) -> Result<Arc<dyn ApiClient>>;

    /// Verify that the provider can be reached and return the account id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Access` when the credentials cannot be used at all.
    async fn account_id(&self) -> Result<String>;
}
