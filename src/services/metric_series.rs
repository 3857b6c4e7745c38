use super::ServiceContext;
use crate::cache::config::{METRIC_BATCH_LIMIT, METRIC_PERIOD_MULTIPLE};
use crate::error::{Error, Result};
use crate::section::collector::{items, response_content, SectionCollector};
use crate::section::content::{ColleagueContent, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

/// One query of a `get_metric_data` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub index: usize,
    pub extra: Option<String>,
    pub label: String,
    pub namespace: &'static str,
    pub metric_name: &'static str,
    pub dimensions: Vec<(&'static str, String)>,
    pub period: u64,
    pub stat: &'static str,
    pub unit: Option<&'static str>,
}

impl MetricQuery {
    #[must_use]
    pub fn new(
        index: usize,
        metric_name: &'static str,
        label: impl Into<String>,
        namespace: &'static str,
        period: u64,
    ) -> Self {
        Self {
            index,
            extra: None,
            label: label.into(),
            namespace,
            metric_name,
            dimensions: Vec::new(),
            period,
            stat: "Average",
            unit: None,
        }
    }

    /// Disambiguate queries of the same metric and resource, e.g. per storage class.
    #[must_use]
    pub fn id_extra(mut self, extra: &str) -> Self {
        self.extra = Some(extra.to_string());
        self
    }

    #[must_use]
    pub fn id(&self) -> String {
        match &self.extra {
            Some(extra) => query_id(self.index, &[extra.as_str()], self.metric_name),
            None => query_id(self.index, &[], self.metric_name),
        }
    }

    #[must_use]
    pub fn dimension(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.dimensions.push((name, value.into()));
        self
    }

    #[must_use]
    pub const fn stat(mut self, stat: &'static str) -> Self {
        self.stat = stat;
        self
    }

    #[must_use]
    pub const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let dimensions: Vec<Value> = self
            .dimensions
            .iter()
            .map(|(name, value)| json!({"Name": name, "Value": value}))
            .collect();
        let mut metric_stat = json!({
            "Metric": {
                "Namespace": self.namespace,
                "MetricName": self.metric_name,
                "Dimensions": dimensions,
            },
            "Period": self.period,
            "Stat": self.stat,
        });
        if let (Some(unit), Value::Object(stat)) = (self.unit, &mut metric_stat) {
            stat.insert("Unit".to_string(), Value::from(unit));
        }
        json!({
            "Id": self.id(),
            "Label": self.label,
            "MetricStat": metric_stat,
        })
    }
}

/// `id_<index>[_<extra>...]_<metric>`; unique within one call and starting
/// with a lowercase letter as the API demands.
#[must_use]
pub fn query_id(index: usize, extra: &[&str], metric_name: &str) -> String {
    let mut parts = vec!["id".to_string(), index.to_string()];
    parts.extend(extra.iter().map(ToString::to_string));
    parts.push(metric_name.to_string());
    parts.join("_")
}

/// # Errors
///
/// Returns `Error::Config` unless `period` is a positive multiple of 60.
pub fn validate_period(period: u64) -> Result<u64> {
    if period > 0 && period % METRIC_PERIOD_MULTIPLE == 0 {
        Ok(period)
    } else {
        Err(Error::Config(format!(
            "metric period {period} must be a multiple of {METRIC_PERIOD_MULTIPLE}"
        )))
    }
}

/// Datapoint period of a section: twice its refresh interval.
///
/// # Errors
///
/// Returns `Error::Config` if the resulting period is not a multiple of 60.
pub fn metric_period(cache_interval: u64) -> Result<u64> {
    validate_period(cache_interval.saturating_mul(2))
}

/// Issue `queries` in batches of at most [`METRIC_BATCH_LIMIT`] and return
/// every `MetricDataResults` row, values paired with their period.
///
/// # Errors
///
/// Returns the first failing call's error.
pub async fn fetch_metric_data(
    ctx: &ServiceContext,
    section: &str,
    queries: &[MetricQuery],
    period: u64,
    end: DateTime<Utc>,
) -> Result<Vec<Value>> {
    let window = i64::try_from(period)
        .map_err(|_| Error::Config(format!("metric period {period} out of range")))?;
    let start = end - TimeDelta::seconds(window);

    let mut rows = Vec::new();
    for (batch, chunk) in queries.chunks(METRIC_BATCH_LIMIT).enumerate() {
        debug!("{}: metric batch {} with {} queries", section, batch, chunk.len());
        let params = json!({
            "MetricDataQueries": chunk.iter().map(MetricQuery::to_value).collect::<Vec<_>>(),
            "StartTime": start.to_rfc3339_opts(SecondsFormat::Secs, true),
            "EndTime": end.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        let response = ctx.call(section, "get_metric_data", params).await?;
        rows.extend_from_slice(items(&response_content(section, &response, "MetricDataResults")));
    }
    extend_values_by_period(queries, &mut rows);
    Ok(rows)
}

/// Turn every datapoint into `[value, period]`; the period is only known to
/// the consumer for `Sum` statistics, the others carry `null`.
pub fn extend_values_by_period(queries: &[MetricQuery], rows: &mut [Value]) {
    let periods: HashMap<String, Value> = queries
        .iter()
        .map(|q| {
            let period = if q.stat == "Sum" {
                Value::from(q.period)
            } else {
                Value::Null
            };
            (q.id(), period)
        })
        .collect();

    for row in rows {
        let Some(period) = row
            .get("Id")
            .and_then(Value::as_str)
            .and_then(|id| periods.get(id))
            .cloned()
        else {
            continue;
        };
        if let Some(Value::Array(values)) = row.get_mut("Values") {
            for value in values.iter_mut() {
                *value = json!([value.take(), period.clone()]);
            }
        }
    }
}

/// Copy the fields of the resource named by each row's `Label` into the row.
#[must_use]
pub fn merge_by_label(rows: &Value, resources: &Value) -> Value {
    let merged = items(rows)
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let resource = row
                .get("Label")
                .and_then(Value::as_str)
                .and_then(|label| resources.get(label))
                .and_then(Value::as_object)
                .cloned();
            if let (Some(resource), Value::Object(fields)) = (resource, &mut row) {
                fields.extend(resource);
            }
            row
        })
        .collect();
    Value::Array(merged)
}

/// The service specific part of a metric-series section.
pub trait MetricSource: Send + Sync {
    fn colleagues(&self, received: &Received) -> ColleagueContent;

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery>;

    fn compute_content(&self, rows: &Value, colleagues: &ColleagueContent) -> Result<Value>;

    fn shape_results(&self, computed: &Value) -> Vec<SectionResult>;
}

/// Adapter running a [`MetricSource`] through batched `get_metric_data` calls.
pub struct MetricSeries<S> {
    name: &'static str,
    ctx: ServiceContext,
    period: u64,
    source: S,
}

impl<S: MetricSource> MetricSeries<S> {
    /// # Errors
    ///
    /// Returns `Error::Config` if the derived metric period is invalid.
    pub fn new(name: &'static str, ctx: ServiceContext, cache_interval: u64, source: S) -> Result<Self> {
        Ok(Self {
            name,
            ctx,
            period: metric_period(cache_interval)?,
            source,
        })
    }

    #[must_use]
    pub const fn period(&self) -> u64 {
        self.period
    }
}

#[async_trait]
impl<S: MetricSource> SectionCollector for MetricSeries<S> {
    fn kind(&self) -> SectionKind {
        SectionKind::MetricSeries
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        self.source.colleagues(received)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let queries = self.source.queries(colleagues, self.period);
        if queries.is_empty() {
            debug!("{}: nothing to query", self.name);
            return Ok(Value::Array(Vec::new()));
        }
        let rows = fetch_metric_data(&self.ctx, self.name, &queries, self.period, Utc::now()).await?;
        Ok(Value::Array(rows))
    }

    fn compute_content(&self, raw: &Value, colleagues: &ColleagueContent) -> Result<Value> {
        self.source.compute_content(raw, colleagues)
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(self.source.shape_results(computed))
    }
}
