use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Immutable identity of a section instance; determines its cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionIdentity {
    pub name: String,
    pub region: String,
    pub host: String,
}

impl SectionIdentity {
    #[must_use]
    pub fn new(name: &str, region: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            host: host.to_string(),
        }
    }
}

/// Content handed over by upstream sections in the current run.
#[derive(Debug, Clone, PartialEq)]
pub struct ColleagueContent {
    pub payload: Value,
    pub timestamp: f64,
}

impl ColleagueContent {
    #[must_use]
    pub const fn new(payload: Value, timestamp: f64) -> Self {
        Self { payload, timestamp }
    }

    /// What a consumer sees when no upstream section delivered anything.
    #[must_use]
    pub const fn neutral() -> Self {
        Self::new(Value::Null, 0.0)
    }

    /// Content of a single producer, or the neutral default if it produced
    /// nothing or only empty content.
    #[must_use]
    pub fn from_producer(received: &Received, producer: &str) -> Self {
        received
            .non_empty(producer)
            .map_or_else(Self::neutral, |c| Self::new(c.payload.clone(), c.timestamp))
    }

    /// # Errors
    ///
    /// Returns `Error::InvalidShape` if the timestamp is not a finite,
    /// non-negative number of seconds.
    pub fn validate(&self, section: &str) -> Result<()> {
        if self.timestamp.is_finite() && self.timestamp >= 0.0 {
            Ok(())
        } else {
            Err(Error::invalid_shape(
                section,
                format!("colleague timestamp {} is not a valid point in time", self.timestamp),
            ))
        }
    }
}

/// Unprocessed API payload, stamped with its fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawContent {
    pub payload: Value,
    pub timestamp: f64,
}

/// A section's final content; shared with consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedContent {
    pub payload: Value,
    pub timestamp: f64,
}

/// One record attributed to the invoking host (empty piggyback) or a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionResult {
    pub piggyback: String,
    pub content: Value,
    /// Labels for the piggyback host itself.
    pub host_labels: BTreeMap<String, String>,
}

impl SectionResult {
    #[must_use]
    pub fn new(piggyback: impl Into<String>, content: Value) -> Self {
        Self {
            piggyback: piggyback.into(),
            content,
            host_labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_host_label(mut self, key: &str, value: &str) -> Self {
        self.host_labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// A quota and its current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitRecord {
    pub key: String,
    pub title: String,
    pub limit: u64,
    pub amount: u64,
    pub region: String,
}

impl LimitRecord {
    #[must_use]
    pub fn new(key: &str, title: impl Into<String>, limit: u64, amount: u64, region: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.into(),
            limit,
            amount,
            region: region.to_string(),
        }
    }
}

/// Latest computed content per producer, as seen by one consumer.
#[derive(Debug, Clone, Default)]
pub struct Received {
    latest: HashMap<String, ComputedContent>,
}

impl Received {
    pub fn insert(&mut self, producer: String, content: ComputedContent) {
        self.latest.insert(producer, content);
    }

    #[must_use]
    pub fn get(&self, producer: &str) -> Option<&ComputedContent> {
        self.latest.get(producer)
    }

    /// Only content that is not falsy.
    #[must_use]
    pub fn non_empty(&self, producer: &str) -> Option<&ComputedContent> {
        self.get(producer).filter(|c| !is_falsy(&c.payload))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// `null`, `false`, zero, and empty strings, lists and objects carry no data.
#[must_use]
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_falsy_values() {
        for value in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(is_falsy(&value), "{value} should be falsy");
        }
        for value in [json!(true), json!(1), json!("x"), json!([0]), json!({"a": null})] {
            assert!(!is_falsy(&value), "{value} should not be falsy");
        }
    }

    #[test]
    fn test_colleague_defaults_to_neutral() {
        let mut received = Received::default();
        assert_eq!(ColleagueContent::from_producer(&received, "ec2_summary"), ColleagueContent::neutral());

        received.insert(
            "ec2_summary".to_string(),
            ComputedContent { payload: json!({}), timestamp: 5.0 },
        );
        assert_eq!(ColleagueContent::from_producer(&received, "ec2_summary"), ColleagueContent::neutral());

        received.insert(
            "ec2_summary".to_string(),
            ComputedContent { payload: json!({"i-1": {}}), timestamp: 7.0 },
        );
        let colleague = ColleagueContent::from_producer(&received, "ec2_summary");
        assert_eq!(colleague.payload, json!({"i-1": {}}));
        assert!((colleague.timestamp - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_colleague_timestamp_validation() {
        assert!(ColleagueContent::neutral().validate("ec2").is_ok());
        let broken = ColleagueContent::new(json!([]), f64::NAN);
        assert!(broken.validate("ec2").unwrap_err().is_contract_violation());
        let negative = ColleagueContent::new(json!([]), -1.0);
        assert!(negative.validate("ec2").is_err());
    }

    #[test]
    fn test_limit_record_serialization() {
        let record = LimitRecord::new("vpc_elastic_ip_addresses", "VPC Elastic IP addresses", 5, 2, "eu-west-1");
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "key": "vpc_elastic_ip_addresses",
                "title": "VPC Elastic IP addresses",
                "limit": 5,
                "amount": 2,
                "region": "eu-west-1",
            })
        );
    }
}
