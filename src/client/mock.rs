use super::{ApiClient, ApiError, ServiceClient, Session};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&Value) -> core::result::Result<Value, ApiError> + Send + Sync>;

/// In-memory client answering from canned responses and recording every call.
#[derive(Default)]
pub struct MockClient {
    responders: HashMap<String, Responder>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, operation: &str, response: Value) -> Self {
        self.respond_with(operation, move |_| Ok(response.clone()))
    }

    pub fn fail(self, operation: &str, error: ApiError) -> Self {
        self.respond_with(operation, move |_| Err(error.clone()))
    }

    pub fn respond_with<F>(mut self, operation: &str, responder: F) -> Self
    where
        F: Fn(&Value) -> core::result::Result<Value, ApiError> + Send + Sync + 'static,
    {
        self.responders.insert(operation.to_string(), Box::new(responder));
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|(op, _)| op == operation).count()
    }
}

#[async_trait]
impl ApiClient for MockClient {
    async fn call(&self, operation: &str, params: Value) -> core::result::Result<Value, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), params.clone()));
        self.responders
            .get(operation)
            .map_or_else(|| Ok(json!({})), |responder| responder(&params))
    }
}

/// Session handing out one shared [`MockClient`] per service.
#[derive(Default)]
pub struct MockSession {
    clients: HashMap<ServiceClient, Arc<MockClient>>,
    account: Option<String>,
    broken_regions: Vec<String>,
}

impl MockSession {
    pub fn new(account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..Self::default()
        }
    }

    /// A session whose credentials are refused.
    pub fn denied() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, service: ServiceClient, client: MockClient) -> Self {
        self.clients.insert(service, Arc::new(client));
        self
    }

    pub fn with_broken_region(mut self, region: &str) -> Self {
        self.broken_regions.push(region.to_string());
        self
    }

    pub fn mock(&self, service: ServiceClient) -> Arc<MockClient> {
        self.clients.get(&service).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Session for MockSession {
    fn client(&self, service: ServiceClient, region: &str) -> Result<Arc<dyn ApiClient>> {
        if self.broken_regions.iter().any(|r| r == region) {
            return Err(Error::Region {
                region: region.to_string(),
                message: format!("cannot build client '{}'", service.key()),
            });
        }
        let client: Arc<dyn ApiClient> = self.mock(service);
        Ok(client)
    }

    async fn account_id(&self) -> Result<String> {
        self.account
            .clone()
            .ok_or_else(|| Error::Access("credentials refused".to_string()))
    }
}
