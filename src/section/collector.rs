use super::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use super::kind::SectionKind;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

/// The per-section capability set. Implementations only describe what to
/// fetch and how to interpret it; caching, timestamps, distribution and
/// shape validation are handled by [`super::Section`].
#[async_trait]
pub trait SectionCollector: Send + Sync {
    fn kind(&self) -> SectionKind;

    /// Pick this section's input from the content upstream sections delivered.
    fn colleagues(&self, _received: &Received) -> ColleagueContent {
        ColleagueContent::neutral()
    }

    /// Call the provider API.
    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value>;

    /// Pure interpretation of the raw payload, optionally enriched by colleagues.
    fn compute_content(&self, raw: &Value, colleagues: &ColleagueContent) -> Result<Value>;

    /// Pure mapping of computed content to attributable records.
    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>>;
}

/// `response[key]`, or an empty list if the response does not carry it.
#[must_use]
pub fn response_content(section: &str, response: &Value, key: &str) -> Value {
    response.get(key).cloned().unwrap_or_else(|| {
        info!("{}: key '{}' missing in response", section, key);
        Value::Array(Vec::new())
    })
}

/// Items of a list, or nothing for anything else.
#[must_use]
pub fn items(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// String field of a JSON object.
#[must_use]
pub fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

/// A single record for the invoking host.
#[must_use]
pub fn host_result(content: Value) -> Vec<SectionResult> {
    vec![SectionResult::new("", content)]
}

/// One record per key of a piggyback mapping.
#[must_use]
pub fn piggyback_results(computed: &Value) -> Vec<SectionResult> {
    computed.as_object().map_or_else(Vec::new, |by_host| {
        by_host
            .iter()
            .map(|(host, content)| SectionResult::new(host.clone(), content.clone()))
            .collect()
    })
}

/// Group rows by the string found in `field`; rows without it are dropped.
#[must_use]
pub fn group_by(rows: &[Value], field: &str) -> Map<String, Value> {
    let mut grouped = Map::new();
    for row in rows {
        let Some(key) = str_field(row, field) else {
            continue;
        };
        if let Value::Array(group) = grouped
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            group.push(row.clone());
        }
    }
    grouped
}

/// Group limit records into one record list per piggyback host, keeping
/// the order in which hosts first appear.
///
/// # Errors
///
/// Returns `Error::Json` if a record cannot be serialized.
pub fn limit_results(limits: Vec<(String, LimitRecord)>) -> Result<Vec<SectionResult>> {
    let mut results: Vec<SectionResult> = Vec::new();
    for (piggyback, record) in limits {
        let record = serde_json::to_value(record)?;
        match results.iter_mut().find(|r| r.piggyback == piggyback) {
            Some(SectionResult {
                content: Value::Array(records),
                ..
            }) => records.push(record),
            _ => results.push(SectionResult::new(piggyback, Value::Array(vec![record]))),
        }
    }
    Ok(results)
}
