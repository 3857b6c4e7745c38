#![allow(dead_code)]

use async_trait::async_trait;
use aws_collector::agent::{Agent, Plan};
use aws_collector::client::{ApiClient, ApiError, RecordedSession, ServiceClient, Session};
use aws_collector::config::CollectorConfig;
use aws_collector::fingerprint::ConfigFingerprint;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const HOST: &str = "aws-host";
pub const ACCOUNT: &str = "123456789012";

/// Recorded responses plus a cache root, both throwaway.
pub struct Fixture {
    pub responses: TempDir,
    pub cache: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Self {
            responses: TempDir::new().unwrap(),
            cache: TempDir::new().unwrap(),
        };
        std::fs::write(
            fixture.responses.path().join("account.json"),
            format!(r#"{{"Account": "{ACCOUNT}"}}"#),
        )
        .unwrap();
        fixture
    }

    pub fn record(&self, region: &str, service: &str, operation: &str, response: &Value) {
        let dir = self.responses.path().join(region).join(service);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{operation}.json")), response.to_string()).unwrap();
    }

    pub fn session(&self) -> Arc<CountingSession> {
        Arc::new(CountingSession::new(self.responses.path()))
    }

    pub fn config(&self) -> CollectorConfig {
        CollectorConfig::new(HOST, self.cache.path()).unwrap()
    }

    pub fn fingerprint(&self, args: &[&str]) -> ConfigFingerprint {
        ConfigFingerprint::new(self.cache.path(), HOST, args)
    }
}

pub fn plan(services: &[&str], regions: &[&str]) -> Plan {
    Plan {
        services: services.iter().map(ToString::to_string).collect(),
        regions: regions.iter().map(ToString::to_string).collect(),
        ..Plan::default()
    }
}

pub async fn collect(agent: &Agent, fingerprint: &ConfigFingerprint) -> String {
    let mut out = Vec::new();
    agent.run(fingerprint, &mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

/// Recorded session that remembers every operation issued through it.
pub struct CountingSession {
    inner: RecordedSession,
    calls: Arc<Mutex<Vec<String>>>,
}

impl CountingSession {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: RecordedSession::new(root),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.as_str() == operation)
            .count()
    }
}

struct CountingClient {
    inner: Arc<dyn ApiClient>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ApiClient for CountingClient {
    async fn call(&self, operation: &str, params: Value) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(operation.to_string());
        self.inner.call(operation, params).await
    }
}

#[async_trait]
impl Session for CountingSession {
    fn client(
        &self,
        service: ServiceClient,
        region: &str,
    ) -> aws_collector::Result<Arc<dyn ApiClient>> {
        Ok(Arc::new(CountingClient {
            inner: self.inner.client(service, region)?,
            calls: Arc::clone(&self.calls),
        }))
    }

    async fn account_id(&self) -> aws_collector::Result<String> {
        self.inner.account_id().await
    }
}
