use super::ec2::labels_by_host;
use super::metric_series::{MetricQuery, MetricSource};
use super::{set_field, strings, tags_of, values_of, ServiceContext, MARKER};
use crate::error::Result;
use crate::section::collector::{
    group_by, host_result, items, limit_results, piggyback_results, response_content, str_field,
    SectionCollector,
};
use crate::section::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::info;

pub const ELB_LIMITS: &str = "elb_limits";
pub const ELB_SUMMARY: &str = "elb_summary";
pub const ELB_LABELS: &str = "elb_generic_labels";
pub const ELB_HEALTH: &str = "elb_health";
pub const ELB: &str = "elb";

/// What differs between the classic and the application/network load
/// balancer APIs as far as the summary chain is concerned.
#[derive(Debug)]
pub struct LoadBalancerApi {
    pub service: &'static str,
    pub limits_section: &'static str,
    pub summary_section: &'static str,
    /// Response key of `describe_load_balancers`.
    pub list_key: &'static str,
    /// Request parameter selecting load balancers by name.
    pub names_param: &'static str,
    /// Request parameter of `describe_tags` and the load balancer field filling it.
    pub tags_param: &'static str,
    pub tags_field: &'static str,
}

pub const CLASSIC: LoadBalancerApi = LoadBalancerApi {
    service: "elb",
    limits_section: ELB_LIMITS,
    summary_section: ELB_SUMMARY,
    list_key: "LoadBalancerDescriptions",
    names_param: "LoadBalancerNames",
    tags_param: "LoadBalancerNames",
    tags_field: "LoadBalancerName",
};

/// Account limit name, record key, title and the provider default.
const ACCOUNT_LIMITS: &[(&str, &str, &str, u64)] = &[
    ("classic-load-balancers", "load_balancers", "Load balancers", 20),
    ("classic-listeners", "load_balancer_listeners", "Listeners", 100),
    (
        "classic-registered-instances",
        "load_balancer_registered_instances",
        "Registered instances",
        1000,
    ),
];

const ELB_METRICS: &[(&str, &str)] = &[
    ("RequestCount", "Sum"),
    ("SurgeQueueLength", "Maximum"),
    ("SpilloverCount", "Sum"),
    ("Latency", "Average"),
    ("HTTPCode_ELB_4XX", "Sum"),
    ("HTTPCode_ELB_5XX", "Sum"),
    ("HTTPCode_Backend_2XX", "Sum"),
    ("HTTPCode_Backend_3XX", "Sum"),
    ("HTTPCode_Backend_4XX", "Sum"),
    ("HTTPCode_Backend_5XX", "Sum"),
    ("HealthyHostCount", "Average"),
    ("UnHealthyHostCount", "Average"),
    ("BackendConnectionErrors", "Sum"),
];

pub(super) async fn describe_load_balancers(
    ctx: &ServiceContext,
    api: &LoadBalancerApi,
    section: &str,
    params: Value,
) -> Result<Vec<Value>> {
    ctx.paginate(section, "describe_load_balancers", params, api.list_key, MARKER)
        .await
}

/// Classic load balancer quotas; listener and instance usage is reported on
/// the load balancer's own host.
pub struct ElbLimits {
    ctx: ServiceContext,
}

impl ElbLimits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn limit_records(&self, content: &Value) -> Vec<(String, LimitRecord)> {
        let region = self.ctx.region.as_str();
        let maxima: HashMap<&str, u64> = content
            .get("Limits")
            .map(items)
            .unwrap_or_default()
            .iter()
            .filter_map(|limit| {
                let max = limit.get("Max")?;
                let max = max.as_u64().or_else(|| max.as_str()?.parse().ok())?;
                Some((str_field(limit, "Name")?, max))
            })
            .collect();
        let record = |name: &str, amount: usize| {
            let (key, title, default) = ACCOUNT_LIMITS
                .iter()
                .find(|(n, ..)| *n == name)
                .map_or((name, name, 0), |&(_, key, title, default)| (key, title, default));
            let limit = maxima.get(name).copied().unwrap_or_else(|| {
                info!("{}: no account limit '{}', using {}", ELB_LIMITS, name, default);
                default
            });
            LimitRecord::new(key, title, limit, amount as u64, region)
        };

        let load_balancers = content.get("LoadBalancerDescriptions").map(items).unwrap_or_default();
        let mut limits = vec![(String::new(), record("classic-load-balancers", load_balancers.len()))];
        for load_balancer in load_balancers {
            let Some(dns_name) = str_field(load_balancer, "DNSName") else {
                continue;
            };
            let count = |field: &str| load_balancer.get(field).map_or(0, |v| items(v).len());
            limits.push((
                dns_name.to_string(),
                record("classic-listeners", count("ListenerDescriptions")),
            ));
            limits.push((
                dns_name.to_string(),
                record("classic-registered-instances", count("Instances")),
            ));
        }
        limits
    }
}

#[async_trait]
impl SectionCollector for ElbLimits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let load_balancers = describe_load_balancers(&self.ctx, &CLASSIC, ELB_LIMITS, json!({})).await?;
        let response = self.ctx.call(ELB_LIMITS, "describe_account_limits", json!({})).await?;
        Ok(json!({
            "LoadBalancerDescriptions": load_balancers,
            "Limits": response_content(ELB_LIMITS, &response, "Limits"),
        }))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        limit_results(self.limit_records(computed))
    }
}

/// Load balancers with their tags, keyed by DNS name.
pub struct ElbSummary {
    ctx: ServiceContext,
    api: &'static LoadBalancerApi,
}

impl ElbSummary {
    #[must_use]
    pub const fn new(ctx: ServiceContext, api: &'static LoadBalancerApi) -> Self {
        Self { ctx, api }
    }

    async fn load_balancers(&self, known: &[Value]) -> Result<Vec<Value>> {
        let section = self.api.summary_section;
        match &self.ctx.filter(self.api.service).names {
            Some(names) if !known.is_empty() => Ok(known
                .iter()
                .filter(|lb| {
                    str_field(lb, "LoadBalancerName").is_some_and(|n| names.iter().any(|name| name == n))
                })
                .cloned()
                .collect()),
            Some(names) => {
                let mut params = Map::new();
                params.insert(self.api.names_param.to_string(), strings(Some(names)));
                describe_load_balancers(&self.ctx, self.api, section, Value::Object(params)).await
            }
            None if !known.is_empty() => Ok(known.to_vec()),
            None => describe_load_balancers(&self.ctx, self.api, section, json!({})).await,
        }
    }

    async fn tags(&self, load_balancer: &Value) -> Vec<Value> {
        let section = self.api.summary_section;
        let Some(id) = str_field(load_balancer, self.api.tags_field) else {
            return Vec::new();
        };
        let mut params = Map::new();
        params.insert(self.api.tags_param.to_string(), json!([id]));
        let response = match self.ctx.call(section, "describe_tags", Value::Object(params)).await {
            Ok(response) => response,
            Err(e) => {
                info!("{}/{}: no tags, {}", section, id, e);
                return Vec::new();
            }
        };
        items(&response_content(section, &response, "TagDescriptions"))
            .iter()
            .flat_map(|description| tags_of(description, "Tags").iter().cloned())
            .collect()
    }
}

#[async_trait]
impl SectionCollector for ElbSummary {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        let limits = ColleagueContent::from_producer(received, self.api.limits_section);
        match limits.payload.get(self.api.list_key) {
            Some(load_balancers) => ColleagueContent::new(load_balancers.clone(), limits.timestamp),
            None => ColleagueContent::neutral(),
        }
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let filter = self.ctx.filter(self.api.service);
        let mut found = Vec::new();
        for mut load_balancer in self.load_balancers(items(&colleagues.payload)).await? {
            let tags = self.tags(&load_balancer).await;
            if !filter.matches_tags(&tags) {
                continue;
            }
            let labels = self.ctx.cmk_labels(&tags);
            set_field(&mut load_balancer, "TagDescriptions", Value::Array(tags));
            set_field(&mut load_balancer, "TagsForCmkLabels", labels);
            found.push(load_balancer);
        }
        Ok(Value::Array(found))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        let mut by_dns = Map::new();
        for load_balancer in items(raw) {
            // Gateway load balancers carry no DNS name
            let Some(dns_name) = str_field(load_balancer, "DNSName") else {
                continue;
            };
            by_dns
                .entry(dns_name.to_string())
                .or_insert_with(|| load_balancer.clone());
        }
        Ok(Value::Object(by_dns))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(host_result(values_of(computed)))
    }
}

/// Load balancer tags as labels of the load balancer's host.
pub struct ElbLabels {
    api: &'static LoadBalancerApi,
}

impl ElbLabels {
    #[must_use]
    pub const fn new(api: &'static LoadBalancerApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SectionCollector for ElbLabels {
    fn kind(&self) -> SectionKind {
        SectionKind::Labels
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, self.api.summary_section)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        Ok(colleagues.payload.clone())
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(labels_by_host(raw))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(piggyback_results(computed))
    }
}

/// Backend instance states per load balancer.
pub struct ElbHealth {
    ctx: ServiceContext,
}

impl ElbHealth {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SectionCollector for ElbHealth {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, ELB_SUMMARY)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let mut by_dns = Map::new();
        let Some(load_balancers) = colleagues.payload.as_object() else {
            return Ok(Value::Object(by_dns));
        };
        for (dns_name, load_balancer) in load_balancers {
            let Some(name) = str_field(load_balancer, "LoadBalancerName") else {
                continue;
            };
            let response = self
                .ctx
                .call(ELB_HEALTH, "describe_instance_health", json!({"LoadBalancerName": name}))
                .await?;
            let states = response_content(ELB_HEALTH, &response, "InstanceStates");
            if !items(&states).is_empty() {
                by_dns.insert(dns_name.clone(), states);
            }
        }
        Ok(Value::Object(by_dns))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(piggyback_results(computed))
    }
}

/// Load balancer metrics on the load balancer's host.
pub struct ElbMetrics;

impl MetricSource for ElbMetrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, ELB_SUMMARY)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        let Some(load_balancers) = colleagues.payload.as_object() else {
            return Vec::new();
        };
        load_balancers
            .iter()
            .enumerate()
            .filter_map(|(idx, (dns_name, lb))| Some((idx, dns_name, str_field(lb, "LoadBalancerName")?)))
            .flat_map(|(idx, dns_name, name)| {
                ELB_METRICS.iter().map(move |&(metric, stat)| {
                    MetricQuery::new(idx, metric, dns_name.as_str(), "AWS/ELB", period)
                        .dimension("LoadBalancerName", name)
                        .stat(stat)
                })
            })
            .collect()
    }

    fn compute_content(&self, rows: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(Value::Object(group_by(items(rows), "Label")))
    }

    fn shape_results(&self, computed: &Value) -> Vec<SectionResult> {
        piggyback_results(computed)
            .into_iter()
            .map(|result| result.with_host_label("cmk/aws/service", "elb"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::ApiError;
    use crate::config::{CollectorConfig, TagFilter};
    use crate::section::content::ComputedContent;
    use crate::services::test_context;
    use std::sync::Arc;

    fn load_balancer(name: &str) -> Value {
        json!({
            "LoadBalancerName": name,
            "DNSName": format!("{name}.elb.amazonaws.com"),
            "ListenerDescriptions": [{}, {}],
            "Instances": [{"InstanceId": "i-1"}],
        })
    }

    fn config() -> CollectorConfig {
        CollectorConfig::new("aws-host", "/tmp").unwrap()
    }

    #[test]
    fn test_limits_per_account_and_load_balancer() {
        let limits = ElbLimits::new(test_context(Arc::new(MockClient::new()), config()));
        let content = json!({
            "LoadBalancerDescriptions": [load_balancer("web"), {"LoadBalancerName": "gateway"}],
            "Limits": [
                {"Name": "classic-load-balancers", "Max": "40"},
                {"Name": "classic-listeners", "Max": "100"},
            ],
        });
        let results = limits.shape_results(&content).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content[0]["key"], "load_balancers");
        assert_eq!(results[0].content[0]["limit"], 40);
        assert_eq!(results[0].content[0]["amount"], 2);

        assert_eq!(results[1].piggyback, "web.elb.amazonaws.com");
        assert_eq!(results[1].content[0]["amount"], 2);
        assert_eq!(results[1].content[1]["key"], "load_balancer_registered_instances");
        assert_eq!(results[1].content[1]["limit"], 1000);
    }

    #[tokio::test]
    async fn test_summary_matches_tags() {
        let client = Arc::new(
            MockClient::new()
                .respond(
                    "describe_load_balancers",
                    json!({"LoadBalancerDescriptions": [load_balancer("web"), load_balancer("db")]}),
                )
                .respond_with("describe_tags", |params| {
                    if params["LoadBalancerNames"][0] == "web" {
                        Ok(json!({"TagDescriptions": [{"Tags": [{"Key": "env", "Value": "prod"}]}]}))
                    } else {
                        Err(ApiError::Transport("reset".to_string()))
                    }
                }),
        );
        let mut cfg = config();
        let tags = TagFilter::from_pairs(&["env".to_string()], &[vec!["prod".to_string()]]);
        cfg.set_service("elb", None, tags, false);
        let summary = ElbSummary::new(test_context(client, cfg), &CLASSIC);

        let raw = summary.fetch_raw(&ColleagueContent::neutral()).await.unwrap();
        let computed = summary.compute_content(&raw, &ColleagueContent::neutral()).unwrap();
        let web = &computed["web.elb.amazonaws.com"];
        assert_eq!(web["TagsForCmkLabels"], json!({"env": "prod"}));
        assert!(computed.get("db.elb.amazonaws.com").is_none());

        let results = summary.shape_results(&computed).unwrap();
        assert_eq!(results[0].piggyback, "");
    }

    #[tokio::test]
    async fn test_summary_filters_colleague_by_name() {
        let client = Arc::new(MockClient::new());
        let mut cfg = config();
        cfg.set_service("elb", Some(vec!["db".to_string()]), None, false);
        let summary = ElbSummary::new(test_context(Arc::clone(&client), cfg), &CLASSIC);

        let mut received = Received::default();
        received.insert(
            ELB_LIMITS.to_string(),
            ComputedContent {
                payload: json!({"LoadBalancerDescriptions": [load_balancer("web"), load_balancer("db")]}),
                timestamp: 2.0,
            },
        );
        let raw = summary.fetch_raw(&summary.colleagues(&received)).await.unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 1);
        assert_eq!(client.call_count("describe_load_balancers"), 0);
        assert_eq!(client.call_count("describe_tags"), 1);
    }

    #[tokio::test]
    async fn test_health_skips_empty_states() {
        let client = Arc::new(MockClient::new().respond_with("describe_instance_health", |params| {
            Ok(if params["LoadBalancerName"] == "web" {
                json!({"InstanceStates": [{"InstanceId": "i-1", "State": "InService"}]})
            } else {
                json!({"InstanceStates": []})
            })
        }));
        let health = ElbHealth::new(test_context(client, config()));
        let colleagues = ColleagueContent::new(
            json!({
                "web.elb.amazonaws.com": load_balancer("web"),
                "db.elb.amazonaws.com": load_balancer("db"),
            }),
            1.0,
        );
        let raw = health.fetch_raw(&colleagues).await.unwrap();
        let results = health.shape_results(&health.compute_content(&raw, &colleagues).unwrap()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].piggyback, "web.elb.amazonaws.com");
    }

    #[test]
    fn test_metrics_carry_service_label() {
        let colleagues = ColleagueContent::new(json!({"web.elb.amazonaws.com": load_balancer("web")}), 1.0);
        let queries = ElbMetrics.queries(&colleagues, 600);
        assert_eq!(queries.len(), ELB_METRICS.len());
        assert_eq!(queries[1].stat, "Maximum");
        assert_eq!(queries[0].dimensions, vec![("LoadBalancerName", "web".to_string())]);

        let rows = json!([{"Id": "id_0_RequestCount", "Label": "web.elb.amazonaws.com", "Values": []}]);
        let results = ElbMetrics.shape_results(&ElbMetrics.compute_content(&rows, &colleagues).unwrap());
        assert_eq!(results[0].host_labels.get("cmk/aws/service").map(String::as_str), Some("elb"));
    }
}
