use super::content::SectionResult;
use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;

/// The closed set of section kinds. Each kind owns one shape contract for
/// the records it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Lists of limit records.
    Limits,
    /// One flat string mapping per resource.
    Labels,
    /// Lists of arbitrary records.
    Generic,
    /// Lists of metric data results, batched per API round trip.
    MetricSeries,
}

impl SectionKind {
    /// Check every shaped result against this kind's contract.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidShape` naming the section on the first mismatch.
    pub fn validate(self, section: &str, results: &[SectionResult]) -> Result<()> {
        results
            .iter()
            .try_for_each(|result| self.validate_result(section, result))
    }

    fn validate_result(self, section: &str, result: &SectionResult) -> Result<()> {
        match self {
            Self::Labels => {
                if result.piggyback.is_empty() {
                    return Err(Error::invalid_shape(
                        section,
                        "piggyback host name of a labels record must not be empty",
                    ));
                }
                let Value::Object(labels) = &result.content else {
                    return Err(Error::invalid_shape(
                        section,
                        format!("labels record must be a mapping, got {}", type_name(&result.content)),
                    ));
                };
                if let Some((key, value)) = labels.iter().find(|(_, v)| !v.is_string()) {
                    return Err(Error::invalid_shape(
                        section,
                        format!("label '{key}' must be a string, got {}", type_name(value)),
                    ));
                }
                Ok(())
            }
            Self::Limits | Self::Generic | Self::MetricSeries => {
                if result.content.is_array() {
                    Ok(())
                } else {
                    Err(Error::invalid_shape(
                        section,
                        format!("result content must be a list, got {}", type_name(&result.content)),
                    ))
                }
            }
        }
    }

    /// Labels blocks are not wrapped into an implicit list by the consumer.
    #[must_use]
    pub const fn is_labels(self) -> bool {
        matches!(self, Self::Labels)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Limits => "limits",
            Self::Labels => "labels",
            Self::Generic => "generic",
            Self::MetricSeries => "metric-series",
        };
        f.write_str(name)
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_kinds_reject_mappings() {
        let ok = [SectionResult::new("", json!([{"a": 1}]))];
        let bad = [SectionResult::new("", json!({"a": 1}))];
        for kind in [SectionKind::Limits, SectionKind::Generic, SectionKind::MetricSeries] {
            assert!(kind.validate("s", &ok).is_ok());
            let err = kind.validate("s", &bad).unwrap_err();
            assert!(err.is_contract_violation());
            assert_eq!(err.to_string(), "s: result content must be a list, got mapping");
        }
    }

    #[test]
    fn test_labels_contract() {
        let kind = SectionKind::Labels;
        assert!(kind.validate("ec2_labels", &[SectionResult::new("host-1", json!({"env": "prod"}))]).is_ok());
        assert!(kind.validate("ec2_labels", &[SectionResult::new("", json!({"env": "prod"}))]).is_err());
        assert!(kind.validate("ec2_labels", &[SectionResult::new("host-1", json!(["env"]))]).is_err());
        assert!(kind.validate("ec2_labels", &[SectionResult::new("host-1", json!({"n": 1}))]).is_err());
    }
}
