use super::metric_series::{merge_by_label, MetricQuery, MetricSource};
use super::{set_field, ServiceContext};
use crate::client::regions::GLOBAL_SERVICE_REGION;
use crate::client::ApiError;
use crate::error::{Error, Result};
use crate::section::collector::{
    host_result, items, limit_results, response_content, str_field, SectionCollector,
};
use crate::section::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

pub const S3_LIMITS: &str = "s3_limits";
pub const S3_SUMMARY: &str = "s3_summary";
pub const S3: &str = "s3";
pub const S3_REQUESTS: &str = "s3_requests";

const SERVICE: &str = "s3";

const STORAGE_METRICS: &[(&str, &str, &[&str])] = &[
    (
        "BucketSizeBytes",
        "Bytes",
        &["StandardStorage", "StandardIAStorage", "ReducedRedundancyStorage"],
    ),
    ("NumberOfObjects", "Count", &["AllStorageTypes"]),
];

const REQUEST_METRICS: &[(&str, &str, &str)] = &[
    ("AllRequests", "Count", "Sum"),
    ("GetRequests", "Count", "Sum"),
    ("PutRequests", "Count", "Sum"),
    ("DeleteRequests", "Count", "Sum"),
    ("HeadRequests", "Count", "Sum"),
    ("PostRequests", "Count", "Sum"),
    ("SelectRequests", "Count", "Sum"),
    ("SelectBytesScanned", "Bytes", "Sum"),
    ("SelectBytesReturned", "Bytes", "Sum"),
    ("ListRequests", "Count", "Sum"),
    ("BytesDownloaded", "Bytes", "Sum"),
    ("BytesUploaded", "Bytes", "Sum"),
    ("4xxErrors", "Count", "Sum"),
    ("5xxErrors", "Count", "Sum"),
    ("FirstByteLatency", "Milliseconds", "Average"),
    ("TotalRequestLatency", "Milliseconds", "Average"),
];

/// All buckets of the account, each with its `LocationConstraint`.
/// Buckets whose location cannot be read are left out.
///
/// # Errors
///
/// Returns `Error::Api` if listing fails or a location lookup fails for
/// reasons other than a client side refusal.
pub async fn list_buckets(ctx: &ServiceContext, section: &str) -> Result<Vec<Value>> {
    let response = ctx.call(section, "list_buckets", json!({})).await?;
    let mut buckets = Vec::new();
    for bucket in items(&response_content(section, &response, "Buckets")) {
        let Some(name) = str_field(bucket, "Name") else {
            continue;
        };
        let location = match ctx.call(section, "get_bucket_location", json!({"Bucket": name})).await {
            Ok(location) => location,
            Err(Error::Api(e @ (ApiError::Client { .. } | ApiError::NotFound { .. }))) => {
                info!("{}/{}: location not readable, {}", section, name, e);
                continue;
            }
            Err(e) => return Err(e),
        };
        // The default region reports no constraint
        let constraint = str_field(&location, "LocationConstraint")
            .filter(|c| !c.is_empty())
            .unwrap_or(GLOBAL_SERVICE_REGION);
        let mut bucket = bucket.clone();
        set_field(&mut bucket, "LocationConstraint", Value::from(constraint));
        buckets.push(bucket);
    }
    Ok(buckets)
}

/// Bucket count against the account quota.
pub struct S3Limits {
    ctx: ServiceContext,
}

impl S3Limits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SectionCollector for S3Limits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(Value::Array(list_buckets(&self.ctx, S3_LIMITS).await?))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        // Buckets are an account wide resource
        let record = LimitRecord::new("buckets", "Buckets", 100, items(computed).len() as u64, "Global");
        limit_results(vec![(String::new(), record)])
    }
}

/// Buckets located in the section's region, with their tags.
pub struct S3Summary {
    ctx: ServiceContext,
}

impl S3Summary {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn bucket_tags(&self, name: &str) -> Result<Value> {
        match self
            .ctx
            .call(S3_SUMMARY, "get_bucket_tagging", json!({"Bucket": name}))
            .await
        {
            Ok(response) => Ok(response_content(S3_SUMMARY, &response, "TagSet")),
            // A bucket without tags answers with an error
            Err(Error::Api(e @ (ApiError::Client { .. } | ApiError::NotFound { .. }))) => {
                info!("{}/{}: no tags set, {}", S3_SUMMARY, name, e);
                Ok(Value::Array(Vec::new()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SectionCollector for S3Summary {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, S3_LIMITS)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let buckets = match colleagues.payload.as_array() {
            Some(known) if !known.is_empty() => known.clone(),
            _ => list_buckets(&self.ctx, S3_SUMMARY).await?,
        };
        let filter = self.ctx.filter(SERVICE);

        let mut found = Vec::new();
        for mut bucket in buckets {
            if str_field(&bucket, "LocationConstraint") != Some(self.ctx.region.as_str()) {
                continue;
            }
            let Some(name) = str_field(&bucket, "Name").map(ToString::to_string) else {
                continue;
            };
            if filter.names.as_ref().is_some_and(|names| !names.contains(&name)) {
                continue;
            }
            let tagging = self.bucket_tags(&name).await?;
            if !filter.matches_tags(items(&tagging)) {
                continue;
            }
            let labels = self.ctx.cmk_labels(items(&tagging));
            set_field(&mut bucket, "Tagging", tagging);
            set_field(&mut bucket, "TagsForCmkLabels", labels);
            found.push(bucket);
        }
        Ok(Value::Array(found))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        let by_name: Map<String, Value> = items(raw)
            .iter()
            .filter_map(|bucket| Some((str_field(bucket, "Name")?.to_string(), bucket.clone())))
            .collect();
        Ok(Value::Object(by_name))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(host_result(super::values_of(computed)))
    }
}

fn bucket_names(colleagues: &ColleagueContent) -> Vec<&String> {
    colleagues
        .payload
        .as_object()
        .map(|buckets| buckets.keys().collect())
        .unwrap_or_default()
}

/// Daily storage metrics per bucket and storage class.
pub struct S3Metrics;

impl MetricSource for S3Metrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, S3_SUMMARY)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        let mut queries = Vec::new();
        for (idx, bucket) in bucket_names(colleagues).into_iter().enumerate() {
            for &(metric, unit, storage_classes) in STORAGE_METRICS {
                for storage_class in storage_classes {
                    queries.push(
                        MetricQuery::new(idx, metric, bucket.as_str(), "AWS/S3", period)
                            .id_extra(storage_class)
                            .dimension("BucketName", bucket.as_str())
                            .dimension("StorageType", *storage_class)
                            .unit(unit),
                    );
                }
            }
        }
        queries
    }

    fn compute_content(&self, rows: &Value, colleagues: &ColleagueContent) -> Result<Value> {
        Ok(merge_by_label(rows, &colleagues.payload))
    }

    fn shape_results(&self, computed: &Value) -> Vec<SectionResult> {
        host_result(computed.clone())
    }
}

/// Request metrics per bucket; needs request metrics enabled on the bucket.
pub struct S3RequestMetrics;

impl MetricSource for S3RequestMetrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, S3_SUMMARY)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        bucket_names(colleagues)
            .into_iter()
            .enumerate()
            .flat_map(|(idx, bucket)| {
                REQUEST_METRICS.iter().map(move |&(metric, unit, stat)| {
                    MetricQuery::new(idx, metric, bucket.as_str(), "AWS/S3", period)
                        .dimension("BucketName", bucket.as_str())
                        .dimension("FilterId", "EntireBucket")
                        .stat(stat)
                        .unit(unit)
                })
            })
            .collect()
    }

    fn compute_content(&self, rows: &Value, colleagues: &ColleagueContent) -> Result<Value> {
        Ok(merge_by_label(rows, &colleagues.payload))
    }

    fn shape_results(&self, computed: &Value) -> Vec<SectionResult> {
        host_result(computed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::config::{CollectorConfig, TagFilter};
    use crate::section::content::ComputedContent;
    use crate::services::test_context;
    use std::sync::Arc;

    fn config() -> CollectorConfig {
        CollectorConfig::new("aws-host", "/tmp").unwrap()
    }

    fn client() -> MockClient {
        MockClient::new()
            .respond(
                "list_buckets",
                json!({"Buckets": [{"Name": "logs"}, {"Name": "legacy"}, {"Name": "secret"}, {"Name": "web"}]}),
            )
            .respond_with("get_bucket_location", |params| match params["Bucket"].as_str() {
                Some("logs" | "web") => Ok(json!({"LocationConstraint": "eu-west-1"})),
                Some("legacy") => Ok(json!({"LocationConstraint": null})),
                _ => Err(ApiError::Client {
                    operation: "get_bucket_location".to_string(),
                    message: "AccessDenied".to_string(),
                }),
            })
    }

    #[tokio::test]
    async fn test_bucket_locations() {
        let ctx = test_context(Arc::new(client()), config());
        let buckets = list_buckets(&ctx, S3_LIMITS).await.unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[1], json!({"Name": "legacy", "LocationConstraint": "us-east-1"}));

        let limits = S3Limits::new(ctx);
        let results = limits.shape_results(&Value::Array(buckets)).unwrap();
        assert_eq!(
            results[0].content,
            json!([{"key": "buckets", "title": "Buckets", "limit": 100, "amount": 3, "region": "Global"}])
        );
    }

    #[tokio::test]
    async fn test_summary_filters_region_and_tags() {
        let client = Arc::new(client().respond_with("get_bucket_tagging", |params| {
            if params["Bucket"] == "web" {
                Ok(json!({"TagSet": [{"Key": "env", "Value": "prod"}]}))
            } else {
                Err(ApiError::Client {
                    operation: "get_bucket_tagging".to_string(),
                    message: "NoSuchTagSet".to_string(),
                })
            }
        }));
        let mut cfg = config();
        let tags = TagFilter::from_pairs(&["env".to_string()], &[vec!["prod".to_string()]]);
        cfg.set_service("s3", None, tags, false);
        let summary = S3Summary::new(test_context(Arc::clone(&client), cfg));

        let raw = summary.fetch_raw(&ColleagueContent::neutral()).await.unwrap();
        let computed = summary.compute_content(&raw, &ColleagueContent::neutral()).unwrap();
        assert_eq!(computed.as_object().unwrap().keys().collect::<Vec<_>>(), vec!["web"]);
        assert_eq!(computed["web"]["TagsForCmkLabels"], json!({"env": "prod"}));
        assert_eq!(client.call_count("get_bucket_tagging"), 2);
    }

    #[tokio::test]
    async fn test_summary_reuses_limits_buckets() {
        let client = Arc::new(MockClient::new());
        let mut cfg = config();
        cfg.set_service("s3", Some(vec!["logs".to_string()]), None, false);
        let summary = S3Summary::new(test_context(Arc::clone(&client), cfg));

        let mut received = Received::default();
        received.insert(
            S3_LIMITS.to_string(),
            ComputedContent {
                payload: json!([
                    {"Name": "logs", "LocationConstraint": "eu-west-1"},
                    {"Name": "other", "LocationConstraint": "eu-west-1"},
                ]),
                timestamp: 3.0,
            },
        );
        let raw = summary.fetch_raw(&summary.colleagues(&received)).await.unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 1);
        assert_eq!(client.call_count("list_buckets"), 0);
    }

    #[test]
    fn test_storage_and_request_queries() {
        let colleagues = ColleagueContent::new(json!({"logs": {"Name": "logs", "Size": 1}}), 1.0);

        let storage = S3Metrics.queries(&colleagues, 172_800);
        assert_eq!(storage.len(), 4);
        assert_eq!(storage[0].id(), "id_0_StandardStorage_BucketSizeBytes");
        assert_eq!(storage[3].id(), "id_0_AllStorageTypes_NumberOfObjects");

        let requests = S3RequestMetrics.queries(&colleagues, 600);
        assert_eq!(requests.len(), REQUEST_METRICS.len());
        assert!(requests.iter().all(|q| q.dimensions.len() == 2));
        assert_eq!(requests[0].stat, "Sum");

        let rows = json!([{"Id": "id_0_AllRequests", "Label": "logs", "Values": [[3, 600]]}]);
        let computed = S3RequestMetrics.compute_content(&rows, &colleagues).unwrap();
        let results = S3RequestMetrics.shape_results(&computed);
        assert_eq!(results[0].piggyback, "");
        assert_eq!(results[0].content[0]["Size"], 1);
    }
}
