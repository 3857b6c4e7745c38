use super::ec2::EC2_SUMMARY;
use super::metric_series::{MetricQuery, MetricSource};
use super::{has_wanted_tag, set_field, tags_of, ServiceContext, NEXT_TOKEN};
use crate::cache::config::FILTER_BATCH_LIMIT;
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

pub const EBS_LIMITS: &str = "ebs_limits";
pub const EBS_SUMMARY: &str = "ebs_summary";
pub const EBS: &str = "ebs";

const SERVICE: &str = "ebs";

/// Space quotas per volume type, in TiB.
const SPACE_LIMITS: &[(&str, &str, u64)] = &[
    ("standard", "Magnetic volumes space", 300),
    ("io1", "Provisioned IOPS SSD (io1) space", 300),
    ("io2", "Provisioned IOPS SSD (io2) space", 20),
    ("gp2", "General Purpose SSD (gp2) space", 300),
    ("gp3", "General Purpose SSD (gp3) space", 300),
    ("sc1", "Cold HDD space", 300),
    ("st1", "Throughput Optimized HDD space", 300),
];

const IOPS_LIMITS: &[(&str, &str, u64)] = &[
    ("io1", "Provisioned IOPS SSD (io1) IO operations per second", 300_000),
    ("io2", "Provisioned IOPS SSD (io2) IO operations per second", 100_000),
];

/// Metric, unit and the volume types it exists for (empty: all).
const EBS_METRICS: &[(&str, &str, &[&str])] = &[
    ("VolumeReadOps", "Count", &[]),
    ("VolumeWriteOps", "Count", &[]),
    ("VolumeReadBytes", "Bytes", &[]),
    ("VolumeWriteBytes", "Bytes", &[]),
    ("VolumeQueueLength", "Count", &[]),
    ("BurstBalance", "Percent", &["gp2", "st1", "sc1"]),
];

/// Account quotas of block storage.
pub struct EbsLimits {
    ctx: ServiceContext,
}

impl EbsLimits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn limit_records(&self, content: &Value) -> Vec<(String, LimitRecord)> {
        let region = self.ctx.region.as_str();
        let volumes = content.get("Volumes").map(items).unwrap_or_default();
        let snapshots = content.get("Snapshots").map(items).unwrap_or_default();

        let mut space: HashMap<&str, u64> = HashMap::new();
        let mut iops: HashMap<&str, u64> = HashMap::new();
        for volume in volumes {
            let Some(volume_type) = str_field(volume, "VolumeType") else {
                continue;
            };
            if !SPACE_LIMITS.iter().any(|(t, _, _)| *t == volume_type) {
                info!("{}: unhandled volume type '{}'", EBS_LIMITS, volume_type);
                continue;
            }
            *space.entry(volume_type).or_default() +=
                volume.get("Size").and_then(Value::as_u64).unwrap_or_default();
            *iops.entry(volume_type).or_default() +=
                volume.get("Iops").and_then(Value::as_u64).unwrap_or_default();
        }

        let mut limits = vec![LimitRecord::new(
            "block_store_snapshots",
            "Block store snapshots",
            100_000,
            snapshots.len() as u64,
            region,
        )];
        for (volume_type, title, limit) in SPACE_LIMITS {
            limits.push(LimitRecord::new(
                &format!("block_store_space_{volume_type}"),
                *title,
                *limit,
                space.get(volume_type).copied().unwrap_or_default(),
                region,
            ));
        }
        for (volume_type, title, limit) in IOPS_LIMITS {
            limits.push(LimitRecord::new(
                &format!("block_store_iops_{volume_type}"),
                *title,
                *limit,
                iops.get(volume_type).copied().unwrap_or_default(),
                region,
            ));
        }
        limits.into_iter().map(|record| (String::new(), record)).collect()
    }
}

#[async_trait]
impl SectionCollector for EbsLimits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let volumes = self
            .ctx
            .paginate(EBS_LIMITS, "describe_volumes", json!({}), "Volumes", NEXT_TOKEN)
            .await?;
        let snapshots = self
            .ctx
            .paginate(
                EBS_LIMITS,
                "describe_snapshots",
                json!({"OwnerIds": ["self"]}),
                "Snapshots",
                NEXT_TOKEN,
            )
            .await?;
        Ok(json!({"Volumes": volumes, "Snapshots": snapshots}))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        limit_results(self.limit_records(computed))
    }
}

/// Volumes with their status, grouped by the instance they are attached to.
pub struct EbsSummary {
    ctx: ServiceContext,
}

impl EbsSummary {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn describe_volumes(&self, params: Value) -> Result<Vec<Value>> {
        self.ctx
            .paginate(EBS_SUMMARY, "describe_volumes", params, "Volumes", NEXT_TOKEN)
            .await
    }

    async fn select_volumes(&self, known: &[Value]) -> Result<Vec<Value>> {
        let filter = self.ctx.filter(SERVICE);
        match (&filter.names, &filter.tags) {
            (Some(names), None) if !known.is_empty() => Ok(known
                .iter()
                .filter(|v| str_field(v, "VolumeId").is_some_and(|id| names.iter().any(|n| n == id)))
                .cloned()
                .collect()),
            (Some(names), None) => self.describe_volumes(json!({"VolumeIds": names})).await,
            (_, Some(_)) if !known.is_empty() => Ok(known
                .iter()
                .filter(|v| has_wanted_tag(tags_of(v, "Tags"), filter))
                .cloned()
                .collect()),
            (_, Some(tags)) => {
                let mut volumes = Vec::new();
                for chunk in tags.chunks(FILTER_BATCH_LIMIT) {
                    let filters: Vec<Value> = chunk.iter().map(|f| f.to_api_filter()).collect();
                    volumes.extend(self.describe_volumes(json!({"Filters": filters})).await?);
                }
                Ok(volumes)
            }
            (None, None) if !known.is_empty() => Ok(known.to_vec()),
            (None, None) => self.describe_volumes(json!({})).await,
        }
    }
}

#[async_trait]
impl SectionCollector for EbsSummary {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        let limits = ColleagueContent::from_producer(received, EBS_LIMITS);
        let instances = ColleagueContent::from_producer(received, EC2_SUMMARY);
        let volumes = limits.payload.get("Volumes").cloned().unwrap_or_else(|| json!([]));
        let instances_payload = if instances.payload.is_object() {
            instances.payload
        } else {
            json!({})
        };
        ColleagueContent::new(
            json!({"volumes": volumes, "instances": instances_payload}),
            limits.timestamp.max(instances.timestamp),
        )
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let known = colleagues.payload.get("volumes").map(items).unwrap_or_default();
        let volumes = self.select_volumes(known).await?;

        let mut by_id = Map::new();
        for mut volume in volumes {
            let Some(volume_id) = str_field(&volume, "VolumeId").map(ToString::to_string) else {
                continue;
            };
            let response = self
                .ctx
                .call(EBS_SUMMARY, "describe_volume_status", json!({"VolumeIds": [volume_id]}))
                .await?;
            let statuses = response_content(EBS_SUMMARY, &response, "VolumeStatuses");
            if let Some(status) = items(&statuses)
                .iter()
                .find(|s| str_field(s, "VolumeId") == Some(volume_id.as_str()))
                .and_then(|s| s.get("VolumeStatus"))
            {
                set_field(&mut volume, "VolumeStatus", status.clone());
            }
            by_id.insert(volume_id, volume);
        }
        Ok(Value::Object(by_id))
    }

    fn compute_content(&self, raw: &Value, colleagues: &ColleagueContent) -> Result<Value> {
        let instance_hosts: HashMap<&str, &str> = colleagues
            .payload
            .get("instances")
            .and_then(Value::as_object)
            .map(|instances| {
                instances
                    .iter()
                    .filter_map(|(host, inst)| Some((str_field(inst, "InstanceId")?, host.as_str())))
                    .collect()
            })
            .unwrap_or_default();

        let mut by_host: Map<String, Value> = Map::new();
        for volume in raw.as_object().map(|m| m.values()).into_iter().flatten() {
            let mut volume = volume.clone();
            let labels = self.ctx.cmk_labels(tags_of(&volume, "Tags"));
            set_field(&mut volume, "TagsForCmkLabels", labels);

            let volume_id = str_field(&volume, "VolumeId").unwrap_or_default();
            let hosts: Vec<String> = volume
                .get("Attachments")
                .map(items)
                .unwrap_or_default()
                .iter()
                .filter(|a| str_field(a, "VolumeId") == Some(volume_id))
                .map(|a| {
                    str_field(a, "InstanceId")
                        .and_then(|id| instance_hosts.get(id))
                        .map(ToString::to_string)
                        .unwrap_or_default()
                })
                .collect();

            for host in hosts {
                if let Value::Array(volumes) =
                    by_host.entry(host).or_insert_with(|| Value::Array(Vec::new()))
                {
                    volumes.push(volume.clone());
                }
            }
        }
        Ok(Value::Object(by_host))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(piggyback_results(computed))
    }
}

/// Volume metrics, attributed to the instance a volume is attached to.
pub struct EbsMetrics;

impl MetricSource for EbsMetrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        let summary = ColleagueContent::from_producer(received, EBS_SUMMARY);
        let Some(by_host) = summary.payload.as_object() else {
            return ColleagueContent::new(json!([]), 0.0);
        };
        let volumes: Vec<Value> = by_host
            .iter()
            .flat_map(|(host, volumes)| {
                items(volumes).iter().map(move |v| {
                    json!([host, v.get("VolumeId"), v.get("VolumeType")])
                })
            })
            .collect();
        ColleagueContent::new(Value::Array(volumes), summary.timestamp)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        let mut queries = Vec::new();
        for (idx, entry) in items(&colleagues.payload).iter().enumerate() {
            let (Some(host), Some(volume_id)) = (entry[0].as_str(), entry[1].as_str()) else {
                continue;
            };
            let volume_type = entry[2].as_str().unwrap_or_default();
            for &(metric, unit, types) in EBS_METRICS {
                if !types.is_empty() && !types.contains(&volume_type) {
                    continue;
                }
                queries.push(
                    MetricQuery::new(idx, metric, host, "AWS/EBS", period)
                        .dimension("VolumeID", volume_id)
                        .unit(unit),
                );
            }
        }
        queries
    }

    fn compute_content(&self, rows: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(Value::Object(group_by(items(rows), "Label")))
    }

    fn shape_results(&self, computed: &Value) -> Vec<SectionResult> {
        piggyback_results(computed)
    }
}
