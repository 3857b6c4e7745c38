//! Session backed by recorded provider responses on disk.
//!
//! Layout:
//!
//! ```text
//! {root}/
//! ├── account.json                      # {"Account": "123456789012"}
//! └── {region}/
//!     └── {service}/
//!         └── {operation}.json          # response, or {"recorded": [...]}
//! ```
//!
//! A response file is either the decoded response itself or a list of
//! `{"params": {...}, "response": {...}}` / `{"params": {...}, "error": "..."}`
//! entries. The first entry whose `params` are contained in the call
//! parameters answers the call.

use super::{regions, ApiClient, ApiError, ServiceClient, Session};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RecordedSession {
    root: PathBuf,
}

impl RecordedSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Session for RecordedSession {
    fn client(&self, service: ServiceClient, region: &str) -> Result<Arc<dyn ApiClient>> {
        if !regions::is_known(region) {
            return Err(Error::Region {
                region: region.to_string(),
                message: format!("invalid region name for client '{}'", service.key()),
            });
        }
        Ok(Arc::new(RecordedClient {
            dir: self.root.join(region).join(service.key()),
        }))
    }

    async fn account_id(&self) -> Result<String> {
        let path = self.root.join("account.json");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Access(format!("{}: {e}", path.display())))?;
        let identity: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Access(format!("{}: {e}", path.display())))?;
        identity
            .get("Account")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Access("no account id in caller identity".to_string()))
    }
}

#[derive(Debug)]
struct RecordedClient {
    dir: PathBuf,
}

#[async_trait]
impl ApiClient for RecordedClient {
    async fn call(&self, operation: &str, params: Value) -> std::result::Result<Value, ApiError> {
        let path = self.dir.join(format!("{operation}.json"));
        debug!("recorded call {} ({})", operation, path.display());
        let recorded = read_recorded(&path, operation).await?;
        answer(operation, recorded, &params)
    }
}

async fn read_recorded(path: &Path, operation: &str) -> std::result::Result<Value, ApiError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound {
                operation: operation.to_string(),
            });
        }
        Err(e) => return Err(ApiError::Transport(e.to_string())),
    };
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Client {
        operation: operation.to_string(),
        message: format!("malformed recorded response: {e}"),
    })
}

fn answer(operation: &str, recorded: Value, params: &Value) -> std::result::Result<Value, ApiError> {
    let Some(entries) = recorded.get("recorded").and_then(Value::as_array) else {
        return Ok(recorded);
    };
    let entry = entries
        .iter()
        .find(|entry| entry.get("params").is_none_or(|p| contains(params, p)))
        .ok_or_else(|| ApiError::NotFound {
            operation: operation.to_string(),
        })?;
    if let Some(message) = entry.get("error") {
        return Err(ApiError::Client {
            operation: operation.to_string(),
            message: message.as_str().unwrap_or("recorded error").to_string(),
        });
    }
    Ok(entry.get("response").cloned().unwrap_or(Value::Null))
}

/// True if every key of `expected` is present in `actual` with an equal value.
fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected
            .iter()
            .all(|(k, v)| actual.get(k).is_some_and(|a| contains(a, v))),
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_response_is_returned_as_is() {
        let recorded = json!({"Buckets": [{"Name": "b1"}]});
        let response = answer("list_buckets", recorded.clone(), &json!({})).unwrap();
        assert_eq!(response, recorded);
    }

    #[test]
    fn test_recorded_entries_match_on_params() {
        let recorded = json!({"recorded": [
            {"params": {"Bucket": "b1"}, "response": {"LocationConstraint": "eu-west-1"}},
            {"params": {"Bucket": "b2"}, "error": "NoSuchTagSet"},
        ]});
        let response = answer("get_bucket_location", recorded.clone(), &json!({"Bucket": "b1"})).unwrap();
        assert_eq!(response, json!({"LocationConstraint": "eu-west-1"}));

        let err = answer("get_bucket_location", recorded.clone(), &json!({"Bucket": "b2"})).unwrap_err();
        assert!(matches!(err, ApiError::Client { .. }));

        let err = answer("get_bucket_location", recorded, &json!({"Bucket": "b3"})).unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_region_is_rejected() {
        let session = RecordedSession::new("/nonexistent");
        assert!(matches!(
            session.client(ServiceClient::Ec2, "eu-central-"),
            Err(Error::Region { .. })
        ));
        assert!(session.client(ServiceClient::Ec2, "eu-central-1").is_ok());
    }

    #[tokio::test]
    async fn test_missing_account_is_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = RecordedSession::new(dir.path());
        assert!(matches!(session.account_id().await, Err(Error::Access(_))));

        std::fs::write(dir.path().join("account.json"), r#"{"Account": "123456789012"}"#).unwrap();
        assert_eq!(session.account_id().await.unwrap(), "123456789012");
    }
}
