use super::metric_series::{MetricQuery, MetricSource};
use super::{has_wanted_tag, keyed_by, set_field, tags_of, values_of, ServiceContext, NEXT_TOKEN};
use crate::cache::config::FILTER_BATCH_LIMIT;
use crate::config::NamingConvention;
use crate::error::Result;
use crate::section::collector::{
    group_by, host_result, items, limit_results, piggyback_results, response_content, str_field,
    SectionCollector,
};
use crate::section::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

pub const EC2_LIMITS: &str = "ec2_limits";
pub const EC2_SUMMARY: &str = "ec2_summary";
pub const EC2_LABELS: &str = "ec2_labels";
pub const EC2_SECURITY_GROUPS: &str = "ec2_security_groups";
pub const EC2: &str = "ec2";

const SERVICE: &str = "ec2";

/// On-demand instance limit of the total and of every type not listed in
/// [`ON_DEMAND_LIMITS`].
const ON_DEMAND_LIMIT: u64 = 20;

/// Instance types whose on-demand limit differs from [`ON_DEMAND_LIMIT`].
const ON_DEMAND_LIMITS: &[(&str, u64)] = &[
    ("c4.4xlarge", 10),
    ("c4.8xlarge", 5),
    ("c5.4xlarge", 10),
    ("c5.9xlarge", 5),
    ("c5.18xlarge", 5),
    ("cg1.4xlarge", 2),
    ("cr1.8xlarge", 2),
    ("d2.4xlarge", 10),
    ("d2.8xlarge", 5),
    ("g2.2xlarge", 5),
    ("g2.8xlarge", 2),
    ("g3.4xlarge", 1),
    ("g3.8xlarge", 1),
    ("g3.16xlarge", 1),
    ("h1.8xlarge", 10),
    ("h1.16xlarge", 5),
    ("hi1.4xlarge", 2),
    ("hs1.8xlarge", 2),
    ("i2.2xlarge", 8),
    ("i2.4xlarge", 4),
    ("i2.8xlarge", 2),
    ("i2.xlarge", 8),
    ("i3.2xlarge", 2),
    ("i3.4xlarge", 2),
    ("i3.8xlarge", 2),
    ("i3.16xlarge", 2),
    ("i3.large", 2),
    ("i3.xlarge", 2),
    ("m4.4xlarge", 10),
    ("m4.10xlarge", 5),
    ("m4.16xlarge", 5),
    ("m5.4xlarge", 10),
    ("m5.12xlarge", 5),
    ("m5.24xlarge", 5),
    ("p2.8xlarge", 1),
    ("p2.16xlarge", 1),
    ("p2.xlarge", 1),
    ("p3.2xlarge", 1),
    ("p3.8xlarge", 1),
    ("p3.16xlarge", 1),
    ("p3dn.24xlarge", 1),
    ("r3.4xlarge", 10),
    ("r3.8xlarge", 5),
    ("r4.4xlarge", 10),
    ("r4.8xlarge", 5),
    ("r4.16xlarge", 1),
];

const _: () = {
    let mut i = 0;
    while i < ON_DEMAND_LIMITS.len() {
        assert!(ON_DEMAND_LIMITS[i].1 > 0 && ON_DEMAND_LIMITS[i].1 <= ON_DEMAND_LIMIT);
        i += 1;
    }
};

/// On-demand limit of one instance type.
#[must_use]
pub fn on_demand_limit(instance_type: &str) -> u64 {
    ON_DEMAND_LIMITS
        .iter()
        .find(|(name, _)| *name == instance_type)
        .map_or(ON_DEMAND_LIMIT, |&(_, limit)| limit)
}

const EC2_METRICS: &[(&str, &str)] = &[
    ("CPUCreditUsage", "Count"),
    ("CPUCreditBalance", "Count"),
    ("CPUUtilization", "Percent"),
    ("DiskReadOps", "Count"),
    ("DiskWriteOps", "Count"),
    ("DiskReadBytes", "Bytes"),
    ("DiskWriteBytes", "Bytes"),
    ("NetworkIn", "Bytes"),
    ("NetworkOut", "Bytes"),
    ("StatusCheckFailed_Instance", "Count"),
    ("StatusCheckFailed_System", "Count"),
];

/// Piggyback host name of a compute instance.
///
/// Private address and id survive stopping the instance, so the name is
/// stable across its lifecycle.
#[must_use]
pub fn piggyback_name(instance: &Value, region: &str, naming: NamingConvention) -> Option<String> {
    match naming {
        NamingConvention::IpRegionInstance => {
            let ip = str_field(instance, "PrivateIpAddress")?;
            let id = str_field(instance, "InstanceId")?;
            Some(format!("{ip}-{region}-{id}"))
        }
        NamingConvention::PrivateDnsName => str_field(instance, "PrivateDnsName")
            .filter(|name| !name.is_empty())
            .map(ToString::to_string),
    }
}

/// Every instance of a list of reservations.
pub fn instances_of(reservations: &[Value]) -> impl Iterator<Item = &Value> {
    reservations
        .iter()
        .flat_map(|reservation| reservation.get("Instances").map(items).unwrap_or_default())
}

fn count(value: Option<&Value>) -> u64 {
    value.and_then(Value::as_u64).unwrap_or_default()
}

fn len_of(resource: &Value, field: &str) -> u64 {
    resource.get(field).map_or(0, |v| items(v).len() as u64)
}

/// Account quotas of compute resources.
pub struct Ec2Limits {
    ctx: ServiceContext,
}

impl Ec2Limits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn limit_records(&self, content: &Value) -> Vec<(String, LimitRecord)> {
        let region = self.ctx.region.as_str();
        let section = |key: &str| content.get(key).map(items).unwrap_or_default();
        let mut limits = Vec::new();

        let reservations = section("Reservations");
        let spot_requests = section("SpotInstanceRequests");
        let on_demand = on_demand_instances(reservations, section("ReservedInstances"), spot_requests);
        let mut total = 0;
        for (instance_type, amount) in on_demand {
            total += amount;
            limits.push(LimitRecord::new(
                &format!("running_ondemand_instances_{instance_type}"),
                format!("Running On-Demand {instance_type} Instances"),
                on_demand_limit(&instance_type),
                amount,
                region,
            ));
        }
        limits.push(LimitRecord::new(
            "running_ondemand_instances_total",
            "Total Running On-Demand Instances",
            ON_DEMAND_LIMIT,
            total,
            region,
        ));

        let addresses = section("Addresses");
        let in_domain = |domain: &str| {
            addresses
                .iter()
                .filter(|a| str_field(a, "Domain") == Some(domain))
                .count() as u64
        };
        limits.push(LimitRecord::new("vpc_elastic_ip_addresses", "VPC Elastic IP Addresses", 5, in_domain("vpc"), region));
        limits.push(LimitRecord::new("elastic_ip_addresses", "Elastic IP Addresses", 5, in_domain("standard"), region));

        let security_groups = section("SecurityGroups");
        limits.push(LimitRecord::new(
            "vpc_sec_groups",
            "VPC security groups",
            2500,
            security_groups.len() as u64,
            region,
        ));
        for group in security_groups {
            if str_field(group, "VpcId").is_none_or(str::is_empty) {
                continue;
            }
            limits.push(LimitRecord::new(
                "vpc_sec_group_rules",
                format!(
                    "Rules of VPC security group {}",
                    str_field(group, "GroupName").unwrap_or_default()
                ),
                120,
                len_of(group, "IpPermissions"),
                region,
            ));
        }

        // Interfaces need not be attached to an instance, so they count for the account
        for interface in section("NetworkInterfaces") {
            limits.push(LimitRecord::new(
                "if_vpc_sec_group",
                format!(
                    "VPC security groups of elastic network interface {}",
                    str_field(interface, "NetworkInterfaceId").unwrap_or_default()
                ),
                5,
                len_of(interface, "Groups"),
                region,
            ));
        }

        let open_spot_requests = spot_requests
            .iter()
            .filter(|r| matches!(str_field(r, "State"), Some("open" | "active")))
            .count() as u64;
        limits.push(LimitRecord::new("spot_inst_requests", "Spot Instance Requests", 20, open_spot_requests, region));

        let active_fleets: Vec<&Value> = section("SpotFleetRequestConfigs")
            .iter()
            .filter(|r| str_field(r, "SpotFleetRequestState") == Some("active"))
            .collect();
        let target_capacity = active_fleets
            .iter()
            .map(|r| count(r.pointer("/SpotFleetRequestConfig/TargetCapacity")))
            .sum();
        limits.push(LimitRecord::new(
            "active_spot_fleet_requests",
            "Active Spot Fleet Requests",
            1000,
            active_fleets.len() as u64,
            region,
        ));
        limits.push(LimitRecord::new(
            "spot_fleet_total_target_capacity",
            "Spot Fleet Requests Total Target Capacity",
            5000,
            target_capacity,
            region,
        ));

        limits.into_iter().map(|record| (String::new(), record)).collect()
    }
}

/// Running on-demand instances per type: running instances minus matching
/// active reservations of the same availability zone; spot instances excluded.
fn on_demand_instances(
    reservations: &[Value],
    reserved_instances: &[Value],
    spot_requests: &[Value],
) -> BTreeMap<String, u64> {
    let spot_ids: HashSet<&str> = spot_requests
        .iter()
        .filter_map(|r| str_field(r, "InstanceId"))
        .collect();

    let mut running: BTreeMap<(String, String), u64> = BTreeMap::new();
    for instance in instances_of(reservations) {
        if str_field(instance, "InstanceId").is_some_and(|id| spot_ids.contains(id)) {
            continue;
        }
        if matches!(
            instance.pointer("/State/Name").and_then(Value::as_str),
            Some("stopped" | "terminated")
        ) {
            continue;
        }
        let (Some(instance_type), Some(zone)) = (
            str_field(instance, "InstanceType"),
            instance.pointer("/Placement/AvailabilityZone").and_then(Value::as_str),
        ) else {
            continue;
        };
        *running.entry((zone.to_string(), instance_type.to_string())).or_default() += 1;
    }

    let mut reserved: BTreeMap<(String, String), u64> = BTreeMap::new();
    for reservation in reserved_instances {
        if str_field(reservation, "State") != Some("active") {
            continue;
        }
        let (Some(instance_type), Some(zone)) = (
            str_field(reservation, "InstanceType"),
            str_field(reservation, "AvailabilityZone"),
        ) else {
            continue;
        };
        *reserved.entry((zone.to_string(), instance_type.to_string())).or_default() +=
            count(reservation.get("InstanceCount"));
    }

    let mut on_demand: BTreeMap<String, u64> = BTreeMap::new();
    for ((zone, instance_type), amount) in running {
        let covered = reserved.get(&(zone, instance_type.clone())).copied().unwrap_or_default();
        if amount > covered {
            *on_demand.entry(instance_type).or_default() += amount - covered;
        }
    }
    on_demand
}

#[async_trait]
impl SectionCollector for Ec2Limits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let ctx = &self.ctx;
        let reservations = ctx
            .paginate(EC2_LIMITS, "describe_instances", json!({}), "Reservations", NEXT_TOKEN)
            .await?;
        let reserved = ctx.call(EC2_LIMITS, "describe_reserved_instances", json!({})).await?;
        let addresses = ctx.call(EC2_LIMITS, "describe_addresses", json!({})).await?;
        let security_groups = ctx
            .paginate(EC2_LIMITS, "describe_security_groups", json!({}), "SecurityGroups", NEXT_TOKEN)
            .await?;
        let interfaces = ctx
            .paginate(EC2_LIMITS, "describe_network_interfaces", json!({}), "NetworkInterfaces", NEXT_TOKEN)
            .await?;
        let spot_requests = ctx
            .paginate(
                EC2_LIMITS,
                "describe_spot_instance_requests",
                json!({}),
                "SpotInstanceRequests",
                NEXT_TOKEN,
            )
            .await?;
        let spot_fleets = ctx
            .paginate(
                EC2_LIMITS,
                "describe_spot_fleet_requests",
                json!({}),
                "SpotFleetRequestConfigs",
                NEXT_TOKEN,
            )
            .await?;

        Ok(json!({
            "Reservations": reservations,
            "ReservedInstances": response_content(EC2_LIMITS, &reserved, "ReservedInstances"),
            "Addresses": response_content(EC2_LIMITS, &addresses, "Addresses"),
            "SecurityGroups": security_groups,
            "NetworkInterfaces": interfaces,
            "SpotInstanceRequests": spot_requests,
            "SpotFleetRequestConfigs": spot_fleets,
        }))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        limit_results(self.limit_records(computed))
    }
}

/// Instance inventory, keyed by piggyback host name.
pub struct Ec2Summary {
    ctx: ServiceContext,
}

impl Ec2Summary {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn describe_instances(&self, params: Value) -> Result<Vec<Value>> {
        let reservations = self
            .ctx
            .paginate(EC2_SUMMARY, "describe_instances", params, "Reservations", NEXT_TOKEN)
            .await?;
        Ok(instances_of(&reservations).cloned().collect())
    }
}

#[async_trait]
impl SectionCollector for Ec2Summary {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, EC2_LIMITS)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let filter = self.ctx.filter(SERVICE);
        let known: Vec<&Value> = instances_of(
            colleagues.payload.get("Reservations").map(items).unwrap_or_default(),
        )
        .collect();

        let instances = match (&filter.names, &filter.tags) {
            (Some(names), None) if !known.is_empty() => known
                .into_iter()
                .filter(|i| str_field(i, "InstanceId").is_some_and(|id| names.iter().any(|n| n == id)))
                .cloned()
                .collect(),
            (Some(names), None) => self.describe_instances(json!({"InstanceIds": names})).await?,
            (_, Some(_)) if !known.is_empty() => known
                .into_iter()
                .filter(|i| has_wanted_tag(tags_of(i, "Tags"), filter))
                .cloned()
                .collect(),
            (_, Some(tags)) => {
                let mut instances = Vec::new();
                for chunk in tags.chunks(FILTER_BATCH_LIMIT) {
                    let filters: Vec<Value> = chunk.iter().map(|f| f.to_api_filter()).collect();
                    instances.extend(self.describe_instances(json!({"Filters": filters})).await?);
                }
                instances
            }
            (None, None) if !known.is_empty() => known.into_iter().cloned().collect(),
            (None, None) => self.describe_instances(json!({})).await?,
        };
        Ok(Value::Array(instances))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        let mut by_host = Map::new();
        for instance in items(raw) {
            let Some(host) = piggyback_name(instance, &self.ctx.region, self.ctx.config.naming) else {
                info!("{}: instance without piggyback name skipped", EC2_SUMMARY);
                continue;
            };
            let mut instance = instance.clone();
            let labels = self.ctx.cmk_labels(tags_of(&instance, "Tags"));
            set_field(&mut instance, "TagsForCmkLabels", labels);
            by_host.insert(host, instance);
        }
        Ok(Value::Object(by_host))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(host_result(values_of(computed)))
    }
}

/// Instance tags as labels of the instance's piggyback host.
pub struct Ec2Labels;

#[async_trait]
impl SectionCollector for Ec2Labels {
    fn kind(&self) -> SectionKind {
        SectionKind::Labels
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, EC2_SUMMARY)
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

/// `{host: TagsForCmkLabels}` for every resource with at least one label.
#[must_use]
pub fn labels_by_host(resources: &Value) -> Value {
    let labels: Map<String, Value> = resources
        .as_object()
        .map(|by_host| {
            by_host
                .iter()
                .filter_map(|(host, resource)| {
                    let labels = resource.get("TagsForCmkLabels")?.as_object()?;
                    (!labels.is_empty()).then(|| (host.clone(), Value::Object(labels.clone())))
                })
                .collect()
        })
        .unwrap_or_default();
    Value::Object(labels)
}

/// Security groups attached to each instance.
pub struct Ec2SecurityGroups {
    ctx: ServiceContext,
}

impl Ec2SecurityGroups {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SectionCollector for Ec2SecurityGroups {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, EC2_SUMMARY)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        if colleagues.payload.as_object().is_none_or(Map::is_empty) {
            return Ok(Value::Object(Map::new()));
        }
        let params = match &self.ctx.filter(SERVICE).tags {
            Some(tags) => json!({"Filters": tags.iter().map(|f| f.to_api_filter()).collect::<Vec<_>>()}),
            None => json!({}),
        };
        let groups = self
            .ctx
            .paginate(EC2_SECURITY_GROUPS, "describe_security_groups", params, "SecurityGroups", NEXT_TOKEN)
            .await?;
        Ok(Value::Object(keyed_by(&groups, "GroupId")))
    }

    fn compute_content(&self, raw: &Value, colleagues: &ColleagueContent) -> Result<Value> {
        let mut by_host = Map::new();
        let Some(instances) = colleagues.payload.as_object() else {
            return Ok(Value::Object(by_host));
        };
        for (host, instance) in instances {
            let groups: Vec<Value> = instance
                .get("SecurityGroups")
                .map(items)
                .unwrap_or_default()
                .iter()
                .filter_map(|attached| raw.get(str_field(attached, "GroupId")?))
                .cloned()
                .collect();
            if !groups.is_empty() {
                by_host.insert(host.clone(), Value::Array(groups));
            }
        }
        Ok(Value::Object(by_host))
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(piggyback_results(computed))
    }
}

/// Instance metrics, one record per instance host.
pub struct Ec2Metrics;

impl MetricSource for Ec2Metrics {
    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, EC2_SUMMARY)
    }

    fn queries(&self, colleagues: &ColleagueContent, period: u64) -> Vec<MetricQuery> {
        let Some(instances) = colleagues.payload.as_object() else {
            return Vec::new();
        };
        instances
            .iter()
            .enumerate()
            .filter_map(|(idx, (host, instance))| {
                Some((idx, host, str_field(instance, "InstanceId")?))
            })
            .flat_map(|(idx, host, instance_id)| {
                EC2_METRICS.iter().map(move |&(metric, unit)| {
                    MetricQuery::new(idx, metric, host.as_str(), "AWS/EC2", period)
                        .dimension("InstanceId", instance_id)
                        .unit(unit)
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
            .map(|result| result.with_host_label("cmk/aws/ec2", "instance"))
            .collect()
    }
}
