//! Concrete sections per provider service.
//!
//! Every section implements [`SectionCollector`](crate::section::SectionCollector)
//! on top of a [`ServiceContext`], which carries the region's API client and
//! the operator's configuration.

pub mod ce;
pub mod cloudwatch;
pub mod ebs;
pub mod ec2;
pub mod elb;
pub mod elbv2;
pub mod metric_series;
pub mod rds;
pub mod s3;

use crate::client::ApiClient;
use crate::config::{tag_pairs, CollectorConfig, ServiceFilter};
use crate::error::Result;
use crate::section::collector::{items, response_content};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Request and response field carrying a continuation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub request: &'static str,
    pub response: &'static str,
}

/// EC2 style paging.
pub const NEXT_TOKEN: Pagination = Pagination {
    request: "NextToken",
    response: "NextToken",
};

/// RDS and classic load balancer style paging.
pub const MARKER: Pagination = Pagination {
    request: "Marker",
    response: "NextMarker",
};

pub const RDS_MARKER: Pagination = Pagination {
    request: "Marker",
    response: "Marker",
};

/// What a section needs to talk to one service of one region.
#[derive(Clone)]
pub struct ServiceContext {
    pub client: Arc<dyn ApiClient>,
    pub region: String,
    pub config: Arc<CollectorConfig>,
}

impl ServiceContext {
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>, region: &str, config: Arc<CollectorConfig>) -> Self {
        Self {
            client,
            region: region.to_string(),
            config,
        }
    }

    /// # Errors
    ///
    /// Returns `Error::Api` if the client call fails.
    pub async fn call(&self, section: &str, operation: &str, params: Value) -> Result<Value> {
        debug!("{}: {} {}", section, operation, params);
        Ok(self.client.call(operation, params).await?)
    }

    /// Call `operation` until the provider stops handing out continuation
    /// tokens and collect `key` of every page.
    ///
    /// # Errors
    ///
    /// Returns `Error::Api` if any page fails.
    pub async fn paginate(
        &self,
        section: &str,
        operation: &str,
        params: Value,
        key: &str,
        pagination: Pagination,
    ) -> Result<Vec<Value>> {
        let base = params.as_object().cloned().unwrap_or_default();
        let mut collected = Vec::new();
        let mut seen = HashSet::new();
        let mut token: Option<String> = None;
        loop {
            let mut request = base.clone();
            if let Some(token) = &token {
                request.insert(pagination.request.to_string(), Value::from(token.as_str()));
            }
            let response = self.call(section, operation, Value::Object(request)).await?;
            collected.extend_from_slice(items(&response_content(section, &response, key)));

            match response.get(pagination.response).and_then(Value::as_str) {
                Some(next) if !next.is_empty() && seen.insert(next.to_string()) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }
        Ok(collected)
    }

    #[must_use]
    pub fn filter(&self, service: &str) -> &ServiceFilter {
        self.config.service(service)
    }

    /// Tags exported as labels, per the configured import policy.
    #[must_use]
    pub fn cmk_labels(&self, tags: &[Value]) -> Value {
        Value::Object(self.config.import_tags.select(tags))
    }
}

/// `resource[field]` as a list of `{"Key", "Value"}` tags.
#[must_use]
pub fn tags_of<'a>(resource: &'a Value, field: &str) -> &'a [Value] {
    resource.get(field).map(items).unwrap_or_default()
}

/// True if any of the resource's tags is one of the filter's tag pairs.
#[must_use]
pub fn has_wanted_tag(tags: &[Value], filter: &ServiceFilter) -> bool {
    filter.tags.as_ref().is_some_and(|filters| {
        let wanted = tag_pairs(filters);
        tags.iter().any(|tag| wanted.contains(tag))
    })
}

/// Add one field to a JSON object; other values are left untouched.
pub fn set_field(resource: &mut Value, field: &str, value: Value) {
    if let Value::Object(map) = resource {
        map.insert(field.to_string(), value);
    }
}

/// Key a list of resources by one of their string fields.
#[must_use]
pub fn keyed_by(resources: &[Value], field: &str) -> Map<String, Value> {
    resources
        .iter()
        .filter_map(|resource| {
            let key = resource.get(field)?.as_str()?;
            Some((key.to_string(), resource.clone()))
        })
        .collect()
}

/// Values of a mapping as a list.
#[must_use]
pub fn values_of(mapping: &Value) -> Value {
    mapping.as_object().map_or_else(
        || Value::Array(Vec::new()),
        |map| Value::Array(map.values().cloned().collect()),
    )
}

/// Strings of a JSON list.
#[must_use]
pub fn strings(value: Option<&Vec<String>>) -> Value {
    value.map_or(Value::Null, |names| {
        Value::Array(names.iter().map(|n| Value::from(n.as_str())).collect())
    })
}

#[cfg(test)]
pub(crate) fn test_context(
    client: Arc<crate::client::mock::MockClient>,
    config: CollectorConfig,
) -> ServiceContext {
    ServiceContext::new(client, "eu-west-1", Arc::new(config))
}
