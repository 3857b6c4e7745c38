use super::elb::{describe_load_balancers, LoadBalancerApi};
use super::metric_series::{MetricQuery, MetricSource};
use super::ServiceContext;
use crate::error::Result;
use crate::section::collector::{
    group_by, items, limit_results, piggyback_results, response_content, str_field,
    SectionCollector,
};
use crate::section::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::info;

pub const ELBV2_LIMITS: &str = "elbv2_limits";
pub const ELBV2_SUMMARY: &str = "elbv2_summary";
pub const ELBV2_LABELS: &str = "elbv2_generic_labels";
pub const ELBV2_TARGET_GROUPS: &str = "elbv2_target_groups";
pub const ELBV2_APPLICATION: &str = "elbv2_application";
pub const ELBV2_NETWORK: &str = "elbv2_network";

pub const ELBV2: LoadBalancerApi = LoadBalancerApi {
    service: "elbv2",
    limits_section: ELBV2_LIMITS,
    summary_section: ELBV2_SUMMARY,
    list_key: "LoadBalancers",
    names_param: "Names",
    tags_param: "ResourceArns",
    tags_field: "LoadBalancerArn",
};

const APPLICATION: &str = "application";
const NETWORK: &str = "network";

/// Certificates per application load balancer, not counting the default one.
const CERTIFICATES_LIMIT: u64 = 25;

/// Provider defaults for account limits the account did not report.
const DEFAULT_LIMITS: &[(&str, u64)] = &[
    ("application-load-balancers", 20),
    ("network-load-balancers", 20),
    ("target-groups", 3000),
    ("rules-per-application-load-balancer", 100),
    ("listeners-per-application-load-balancer", 50),
    ("listeners-per-network-load-balancer", 50),
    ("targets-per-application-load-balancer", 1000),
    ("targets-per-network-load-balancer", 200),
];

const APPLICATION_METRICS: &[(&str, &str)] = &[
    ("ActiveConnectionCount", "Sum"),
    ("ClientTLSNegotiationErrorCount", "Sum"),
    ("ConsumedLCUs", "Sum"),
    ("HTTP_Fixed_Response_Count", "Sum"),
    ("HTTP_Redirect_Count", "Sum"),
    ("HTTP_Redirect_Url_Limit_Exceeded_Count", "Sum"),
    ("HTTPCode_ELB_3XX_Count", "Sum"),
    ("HTTPCode_ELB_4XX_Count", "Sum"),
    ("HTTPCode_ELB_5XX_Count", "Sum"),
    ("HTTPCode_ELB_500_Count", "Sum"),
    ("HTTPCode_ELB_502_Count", "Sum"),
    ("HTTPCode_ELB_503_Count", "Sum"),
    ("HTTPCode_ELB_504_Count", "Sum"),
    ("IPv6ProcessedBytes", "Sum"),
    ("IPv6RequestCount", "Sum"),
    ("NewConnectionCount", "Sum"),
    ("ProcessedBytes", "Sum"),
    ("RejectedConnectionCount", "Sum"),
    ("RequestCount", "Sum"),
    ("RuleEvaluations", "Sum"),
];

const NETWORK_METRICS: &[(&str, &str)] = &[
    ("ActiveFlowCount", "Average"),
    ("ActiveFlowCount_TLS", "Average"),
    ("ClientTLSNegotiationErrorCount", "Sum"),
    ("ConsumedLCUs", "Sum"),
    ("HealthyHostCount", "Maximum"),
    ("NewFlowCount", "Sum"),
    ("NewFlowCount_TLS", "Sum"),
    ("ProcessedBytes", "Sum"),
    ("ProcessedBytes_TLS", "Sum"),
    ("TargetTLSNegotiationErrorCount", "Sum"),
    ("TCP_Client_Reset_Count", "Sum"),
    ("TCP_ELB_Reset_Count", "Sum"),
    ("TCP_Target_Reset_Count", "Sum"),
    ("UnHealthyHostCount", "Maximum"),
];

fn load_balancer_type(load_balancer: &Value) -> Option<&str> {
    str_field(load_balancer, "Type").filter(|t| matches!(*t, APPLICATION | NETWORK))
}

fn len_of(resource: &Value, field: &str) -> u64 {
    resource.get(field).map_or(0, |v| items(v).len() as u64)
}

/// Application and network load balancer quotas. Usage comes from the load
/// balancers themselves, since `describe_account_limits` only knows maxima.
pub struct Elbv2Limits {
    ctx: ServiceContext,
}

impl Elbv2Limits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn describe(&self, operation: &str, params: Value, key: &str) -> Result<Value> {
        let response = self.ctx.call(ELBV2_LIMITS, operation, params).await?;
        Ok(response_content(ELBV2_LIMITS, &response, key))
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
        let limit = |name: &str| {
            maxima.get(name).copied().unwrap_or_else(|| {
                let default = DEFAULT_LIMITS
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map_or(0, |&(_, default)| default);
                info!("{}: no account limit '{}', using {}", ELBV2_LIMITS, name, default);
                default
            })
        };

        let mut limits = Vec::new();
        let (mut applications, mut networks, mut target_groups) = (0, 0, 0);
        for load_balancer in content.get("LoadBalancers").map(items).unwrap_or_default() {
            let (Some(lb_type), Some(dns_name)) =
                (load_balancer_type(load_balancer), str_field(load_balancer, "DNSName"))
            else {
                continue;
            };
            let groups = len_of(load_balancer, "TargetGroups");
            target_groups += groups;
            let title = if lb_type == APPLICATION {
                applications += 1;
                let certificates = load_balancer
                    .get("Listeners")
                    .map(items)
                    .unwrap_or_default()
                    .iter()
                    .flat_map(|listener| listener.get("Certificates").map(items).unwrap_or_default())
                    .filter(|c| c.get("IsDefault").and_then(Value::as_bool) != Some(true))
                    .count() as u64;
                limits.push((
                    dns_name.to_string(),
                    LimitRecord::new(
                        "application_load_balancer_rules",
                        "Application Load Balancer Rules",
                        limit("rules-per-application-load-balancer"),
                        len_of(load_balancer, "Rules"),
                        region,
                    ),
                ));
                limits.push((
                    dns_name.to_string(),
                    LimitRecord::new(
                        "application_load_balancer_certificates",
                        "Application Load Balancer Certificates",
                        CERTIFICATES_LIMIT,
                        certificates,
                        region,
                    ),
                ));
                "Application"
            } else {
                networks += 1;
                "Network"
            };
            limits.push((
                dns_name.to_string(),
                LimitRecord::new(
                    &format!("{lb_type}_load_balancer_listeners"),
                    format!("{title} Load Balancer Listeners"),
                    limit(&format!("listeners-per-{lb_type}-load-balancer")),
                    len_of(load_balancer, "Listeners"),
                    region,
                ),
            ));
            limits.push((
                dns_name.to_string(),
                LimitRecord::new(
                    &format!("{lb_type}_load_balancer_target_groups"),
                    format!("{title} Load Balancer Target Groups"),
                    limit(&format!("targets-per-{lb_type}-load-balancer")),
                    groups,
                    region,
                ),
            ));
        }

        let account = [
            ("application_load_balancers", "Application Load balancers", "application-load-balancers", applications),
            ("network_load_balancers", "Network Load balancers", "network-load-balancers", networks),
            ("load_balancer_target_groups", "Load balancers Target Groups", "target-groups", target_groups),
        ];
        for (key, title, name, amount) in account {
            limits.push((String::new(), LimitRecord::new(key, title, limit(name), amount, region)));
        }
        limits
    }
}

#[async_trait]
impl SectionCollector for Elbv2Limits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let mut load_balancers =
            describe_load_balancers(&self.ctx, &ELBV2, ELBV2_LIMITS, json!({})).await?;
        for load_balancer in &mut load_balancers {
            let Some(arn) = str_field(load_balancer, "LoadBalancerArn").map(ToString::to_string) else {
                continue;
            };
            let params = json!({"LoadBalancerArn": arn});
            let target_groups = self
                .describe("describe_target_groups", params.clone(), "TargetGroups")
                .await?;
            let listeners = self.describe("describe_listeners", params, "Listeners").await?;

            let mut rules = Vec::new();
            if str_field(load_balancer, "Type") == Some(APPLICATION) {
                for listener in items(&listeners) {
                    let Some(listener_arn) = str_field(listener, "ListenerArn") else {
                        continue;
                    };
                    let params = json!({"ListenerArn": listener_arn});
                    let found = self.describe("describe_rules", params, "Rules").await?;
                    // default rules do not count against the limit
                    rules.extend(
                        items(&found)
                            .iter()
                            .filter(|r| r.get("IsDefault").and_then(Value::as_bool) != Some(true))
                            .cloned(),
                    );
                }
            }

            if let Value::Object(map) = load_balancer {
                map.insert("TargetGroups".to_string(), target_groups);
                map.insert("Listeners".to_string(), listeners);
                map.insert("Rules".to_string(), Value::Array(rules));
            }
        }
        let limits = self.describe("describe_account_limits", json!({}), "Limits").await?;
        Ok(json!({"LoadBalancers": load_balancers, "Limits": limits}))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        limit_results(self.limit_records(computed))
    }
}

/// Target groups and their target health per load balancer, as
/// `[type, target groups]` pairs.
pub struct Elbv2TargetGroups {
    ctx: ServiceContext,
}

impl Elbv2TargetGroups {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SectionCollector for Elbv2TargetGroups {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, ELBV2_SUMMARY)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let mut by_dns = Map::new();
        let Some(load_balancers) = colleagues.payload.as_object() else {
            return Ok(Value::Object(by_dns));
        };
        for (dns_name, load_balancer) in load_balancers {
            let Some(lb_type) = load_balancer_type(load_balancer) else {
                continue;
            };
            let mut target_groups = match load_balancer.get("TargetGroups") {
                Some(groups) => groups.clone(),
                None => {
                    let arn = str_field(load_balancer, "LoadBalancerArn").unwrap_or_default();
                    let response = self
                        .ctx
                        .call(ELBV2_TARGET_GROUPS, "describe_target_groups", json!({"LoadBalancerArn": arn}))
                        .await?;
                    response_content(ELBV2_TARGET_GROUPS, &response, "TargetGroups")
                }
            };
            if let Value::Array(groups) = &mut target_groups {
                for group in groups {
                    let Some(arn) = str_field(group, "TargetGroupArn").map(ToString::to_string) else {
                        continue;
                    };
                    let response = self
                        .ctx
                        .call(ELBV2_TARGET_GROUPS, "describe_target_health", json!({"TargetGroupArn": arn}))
                        .await?;
                    let health = response_content(ELBV2_TARGET_GROUPS, &response, "TargetHealthDescriptions");
                    if let Value::Object(map) = group {
                        map.insert("TargetHealthDescriptions".to_string(), health);
                    }
                }
            }
            by_dns.insert(dns_name.clone(), json!([[lb_type, target_groups]]));
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

/// Metrics of one load balancer type on the load balancer's host.
pub struct Elbv2Metrics {
    lb_type: &'static str,
    namespace: &'static str,
    metrics: &'static [(&'static str, &'static str)],
}

impl Elbv2Metrics {
    #[must_use]
    pub const fn application() -> Self {
        Self {
            lb_type: APPLICATION,
            namespace: "AWS/ApplicationELB",
            metrics: APPLICATION_METRICS,
        }
    }

    #[must_use]
    pub const fn network() -> Self {
        Self {
            lb_type: NETWORK,
            namespace: "AWS/NetworkELB",
            metrics: NETWORK_METRICS,
        }
    }
}

/// The `LoadBalancer` dimension: `<app|net>/<name>/<id>`, the tail of the ARN.
#[must_use]
pub fn load_balancer_dimension(arn: &str) -> String {
    let parts: Vec<&str> = arn.split('/').collect();
    parts[parts.len().saturating_sub(3)..].join("/")
}

impl MetricSource for Elbv2Metrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, ELBV2_SUMMARY)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        let Some(load_balancers) = colleagues.payload.as_object() else {
            return Vec::new();
        };
        load_balancers
            .iter()
            .enumerate()
            .filter(|(_, (_, lb))| str_field(lb, "Type") == Some(self.lb_type))
            .filter_map(|(idx, (dns_name, lb))| {
                Some((idx, dns_name, load_balancer_dimension(str_field(lb, "LoadBalancerArn")?)))
            })
            .flat_map(|(idx, dns_name, dimension)| {
                self.metrics.iter().map(move |&(metric, stat)| {
                    MetricQuery::new(idx, metric, dns_name.as_str(), self.namespace, period)
                        .dimension("LoadBalancer", dimension.clone())
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
            .map(|result| result.with_host_label("cmk/aws/service", "elbv2"))
            .collect()
    }
}
