use super::metric_series::{merge_by_label, MetricQuery, MetricSource};
use super::{set_field, values_of, ServiceContext, RDS_MARKER};
use crate::client::ApiError;
use crate::error::{Error, Result};
use crate::section::collector::{
    host_result, items, limit_results, response_content, str_field, SectionCollector,
};
use crate::section::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

pub const RDS_LIMITS: &str = "rds_limits";
pub const RDS_SUMMARY: &str = "rds_summary";
pub const RDS: &str = "rds";

const SERVICE: &str = "rds";

const QUOTA_NAMES: &[(&str, &str, &str)] = &[
    ("DBClusters", "db_clusters", "DB clusters"),
    ("DBClusterParameterGroups", "db_cluster_parameter_groups", "DB cluster parameter groups"),
    ("DBInstances", "db_instances", "DB instances"),
    ("EventSubscriptions", "event_subscriptions", "Event subscriptions"),
    ("ManualSnapshots", "manual_snapshots", "Manual snapshots"),
    ("OptionGroups", "option_groups", "Option groups"),
    ("DBParameterGroups", "db_parameter_groups", "DB parameter groups"),
    ("ReadReplicasPerMaster", "read_replica_per_master", "Read replica per master"),
    ("ReservedDBInstances", "reserved_db_instances", "Reserved DB instances"),
    ("DBSecurityGroups", "db_security_groups", "DB security groups"),
    ("DBSubnetGroups", "db_subnet_groups", "DB subnet groups"),
    ("SubnetsPerDBSubnetGroup", "subnet_per_db_subnet_groups", "Subnet per DB subnet groups"),
    ("AllocatedStorage", "allocated_storage", "Allocated storage"),
    (
        "AuthorizationsPerDBSecurityGroup",
        "auths_per_db_security_groups",
        "Authorizations per DB security group",
    ),
    ("DBClusterRoles", "db_cluster_roles", "DB cluster roles"),
];

/// Metric, statistic and unit. Replication slot and log sizes are only
/// answered in bytes.
const RDS_METRICS: &[(&str, &str, &str)] = &[
    ("BinLogDiskUsage", "Average", "Bytes"),
    ("BurstBalance", "Average", "Percent"),
    ("CPUUtilization", "Average", "Percent"),
    ("CPUCreditUsage", "Average", "Count"),
    ("CPUCreditBalance", "Average", "Count"),
    ("DatabaseConnections", "Average", "Count"),
    ("DiskQueueDepth", "Average", "Count"),
    ("FailedSQLServerAgentJobsCount", "Sum", "Count"),
    ("NetworkReceiveThroughput", "Average", "Bytes/Second"),
    ("NetworkTransmitThroughput", "Average", "Bytes/Second"),
    ("OldestReplicationSlotLag", "Average", "Bytes"),
    ("ReadIOPS", "Average", "Count/Second"),
    ("ReadLatency", "Average", "Seconds"),
    ("ReadThroughput", "Average", "Bytes/Second"),
    ("ReplicaLag", "Average", "Seconds"),
    ("ReplicationSlotDiskUsage", "Average", "Bytes"),
    ("TransactionLogsDiskUsage", "Average", "Bytes"),
    ("TransactionLogsGeneration", "Average", "Bytes/Second"),
    ("WriteIOPS", "Average", "Count/Second"),
    ("WriteLatency", "Average", "Seconds"),
    ("WriteThroughput", "Average", "Bytes/Second"),
];

fn quota_value(quota: &Value, field: &str) -> u64 {
    quota.get(field).and_then(Value::as_u64).unwrap_or_default()
}

/// Account quotas as reported by the database service itself.
pub struct RdsLimits {
    ctx: ServiceContext,
}

impl RdsLimits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SectionCollector for RdsLimits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let response = self
            .ctx
            .call(RDS_LIMITS, "describe_account_attributes", json!({}))
            .await?;
        Ok(response_content(RDS_LIMITS, &response, "AccountQuotas"))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        let mut limits = Vec::new();
        for quota in items(computed) {
            let name = str_field(quota, "AccountQuotaName").unwrap_or_default();
            let Some((_, key, title)) = QUOTA_NAMES.iter().find(|(n, ..)| *n == name) else {
                info!("{}: unhandled account quota name '{}'", RDS_LIMITS, name);
                continue;
            };
            limits.push((
                String::new(),
                LimitRecord::new(
                    key,
                    *title,
                    quota_value(quota, "Max"),
                    quota_value(quota, "Used"),
                    &self.ctx.region,
                ),
            ));
        }
        limit_results(limits)
    }
}

/// Database instances with their tags, keyed by instance identifier.
pub struct RdsSummary {
    ctx: ServiceContext,
}

impl RdsSummary {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn describe_db_instances(&self) -> Result<Vec<Value>> {
        let Some(names) = &self.ctx.filter(SERVICE).names else {
            return self
                .ctx
                .paginate(RDS_SUMMARY, "describe_db_instances", json!({}), "DBInstances", RDS_MARKER)
                .await;
        };
        let mut instances = Vec::new();
        for name in names {
            let params = json!({"DBInstanceIdentifier": name});
            match self
                .ctx
                .paginate(RDS_SUMMARY, "describe_db_instances", params, "DBInstances", RDS_MARKER)
                .await
            {
                Ok(found) => instances.extend(found),
                Err(Error::Api(ApiError::NotFound { .. })) => {
                    debug!("{}: no database instance '{}'", RDS_SUMMARY, name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(instances)
    }
}

#[async_trait]
impl SectionCollector for RdsSummary {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let filter = self.ctx.filter(SERVICE);
        let mut found = Vec::new();
        for mut instance in self.describe_db_instances().await? {
            let Some(arn) = str_field(&instance, "DBInstanceArn").map(ToString::to_string) else {
                continue;
            };
            let response = self
                .ctx
                .call(RDS_SUMMARY, "list_tags_for_resource", json!({"ResourceName": arn}))
                .await?;
            let tags = response_content(RDS_SUMMARY, &response, "TagList");
            if !filter.matches_tags(items(&tags)) {
                continue;
            }
            let labels = self.ctx.cmk_labels(items(&tags));
            set_field(&mut instance, "Region", Value::from(self.ctx.region.as_str()));
            set_field(&mut instance, "TagsForCmkLabels", labels);
            found.push(instance);
        }
        Ok(Value::Array(found))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        let by_id: Map<String, Value> = items(raw)
            .iter()
            .filter_map(|instance| {
                Some((str_field(instance, "DBInstanceIdentifier")?.to_string(), instance.clone()))
            })
            .collect();
        Ok(Value::Object(by_id))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(host_result(values_of(computed)))
    }
}

/// Database metrics, labelled `<instance id> <region>`.
pub struct RdsMetrics;

impl RdsMetrics {
    fn label(instance_id: &str, instance: &Value) -> String {
        format!("{instance_id} {}", str_field(instance, "Region").unwrap_or_default())
    }
}

impl MetricSource for RdsMetrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, RDS_SUMMARY)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        let Some(instances) = colleagues.payload.as_object() else {
            return Vec::new();
        };
        instances
            .iter()
            .enumerate()
            .flat_map(|(idx, (instance_id, instance))| {
                let label = Self::label(instance_id, instance);
                RDS_METRICS.iter().map(move |&(metric, stat, unit)| {
                    MetricQuery::new(idx, metric, label.as_str(), "AWS/RDS", period)
                        .dimension("DBInstanceIdentifier", instance_id.as_str())
                        .stat(stat)
                        .unit(unit)
                })
            })
            .collect()
    }

    fn compute_content(&self, rows: &Value, colleagues: &ColleagueContent) -> Result<Value> {
        let by_label: Map<String, Value> = colleagues
            .payload
            .as_object()
            .map(|instances| {
                instances
                    .iter()
                    .map(|(id, instance)| (Self::label(id, instance), instance.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(merge_by_label(rows, &Value::Object(by_label)))
    }

    fn shape_results(&self, computed: &Value) -> Vec<SectionResult> {
        host_result(computed.clone())
    }
}
