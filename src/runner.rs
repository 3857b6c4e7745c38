//! Builds the section graph of one region and drives it in dependency order.

use crate::cache::config::{DAILY_SECTION_INTERVAL_SECS, DEFAULT_SECTION_INTERVAL_SECS};
use crate::cache::CacheStore;
use crate::client::regions::GLOBAL_SERVICE_REGION;
use crate::client::{ApiClient, ServiceClient, Session};
use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::section::{RunOptions, Section, SectionCollector, SectionIdentity, SectionOutput};
use crate::services::ce::{CostsAndUsage, COSTS_AND_USAGE};
use crate::services::cloudwatch::{
    CloudwatchAlarms, CloudwatchAlarmsLimits, CLOUDWATCH_ALARMS, CLOUDWATCH_ALARMS_LIMITS,
};
use crate::services::ebs::{EbsLimits, EbsMetrics, EbsSummary, EBS, EBS_LIMITS, EBS_SUMMARY};
use crate::services::ec2::{
    Ec2Labels, Ec2Limits, Ec2Metrics, Ec2SecurityGroups, Ec2Summary, EC2, EC2_LABELS, EC2_LIMITS,
    EC2_SECURITY_GROUPS, EC2_SUMMARY,
};
use crate::services::elb::{
    ElbHealth, ElbLabels, ElbLimits, ElbMetrics, ElbSummary, CLASSIC, ELB, ELB_HEALTH, ELB_LABELS,
    ELB_LIMITS, ELB_SUMMARY,
};
use crate::services::elbv2::{
    Elbv2Limits, Elbv2Metrics, Elbv2TargetGroups, ELBV2, ELBV2_APPLICATION, ELBV2_LABELS,
    ELBV2_LIMITS, ELBV2_NETWORK, ELBV2_SUMMARY, ELBV2_TARGET_GROUPS,
};
use crate::services::metric_series::MetricSeries;
use crate::services::rds::{RdsLimits, RdsMetrics, RdsSummary, RDS, RDS_LIMITS, RDS_SUMMARY};
use crate::services::s3::{
    S3Limits, S3Metrics, S3RequestMetrics, S3Summary, S3, S3_LIMITS, S3_REQUESTS, S3_SUMMARY,
};
use crate::services::ServiceContext;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Services collected once per run in the global region.
pub const GLOBAL_SERVICES: &[&str] = &["ce"];

/// Services collected in every configured region.
pub const REGIONAL_SERVICES: &[&str] = &["ec2", "ebs", "s3", "elb", "elbv2", "rds", "cloudwatch"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    /// `account_wide` marks the one region that also carries account-wide sections.
    Regional { account_wide: bool },
}

/// Outcome of one region pass.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub region: String,
    pub outputs: Vec<SectionOutput>,
    pub exceptions: Vec<String>,
}

impl RunReport {
    #[must_use]
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            ..Self::default()
        }
    }

    /// A report for a region whose clients could not be built.
    #[must_use]
    pub fn failed(region: &str, err: &Error) -> Self {
        let mut report = Self::new(region);
        report.exceptions.push(err.to_string());
        report
    }
}

fn exception_line(section: &str, err: &Error) -> String {
    if err.is_contract_violation() {
        err.to_string()
    } else {
        format!("{section}: {err}")
    }
}

/// Hands out one shared client per service and wraps sections of one region.
struct Builder<'a> {
    region: String,
    config: Arc<CollectorConfig>,
    session: &'a dyn Session,
    cache: Arc<CacheStore>,
    clients: HashMap<ServiceClient, Arc<dyn ApiClient>>,
}

impl Builder<'_> {
    fn ctx(&mut self, service: ServiceClient) -> Result<ServiceContext> {
        let client = if let Some(client) = self.clients.get(&service) {
            Arc::clone(client)
        } else {
            let client = self.session.client(service, &self.region)?;
            debug!("Created {} client for {}", service.key(), self.region);
            self.clients.insert(service, Arc::clone(&client));
            client
        };
        Ok(ServiceContext::new(client, &self.region, Arc::clone(&self.config)))
    }

    fn section<C: SectionCollector + 'static>(
        &self,
        name: &str,
        interval: u64,
        collector: C,
    ) -> Result<Section> {
        Section::new(
            SectionIdentity::new(name, &self.region, &self.config.hostname),
            interval,
            Box::new(collector),
            Arc::clone(&self.cache),
        )
    }
}

/// The ordered sections of one region, producers before their consumers.
#[derive(Debug)]
pub struct SectionRunner {
    region: String,
    sections: Vec<Section>,
    debug: bool,
}

impl SectionRunner {
    /// Build and wire every enabled section of `region`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Region` if a service client cannot be created, or
    /// `Error::Config` for an invalid section definition.
    pub async fn init(
        scope: Scope,
        services: &[String],
        region: &str,
        config: Arc<CollectorConfig>,
        session: &dyn Session,
        cache: Arc<CacheStore>,
    ) -> Result<Self> {
        let region = match scope {
            Scope::Global => GLOBAL_SERVICE_REGION,
            Scope::Regional { .. } => region,
        };
        let mut builder = Builder {
            region: region.to_string(),
            config,
            session,
            cache,
            clients: HashMap::new(),
        };
        let enabled = |service: &str| services.iter().any(|s| s == service);

        let sections = match scope {
            Scope::Global => {
                let mut sections = Vec::new();
                if enabled("ce") {
                    let ctx = builder.ctx(ServiceClient::CostExplorer)?;
                    sections.push(builder.section(
                        COSTS_AND_USAGE,
                        DAILY_SECTION_INTERVAL_SECS,
                        CostsAndUsage::new(ctx),
                    )?);
                }
                sections
            }
            Scope::Regional { account_wide } => {
                regional_sections(&mut builder, &enabled, account_wide).await?
            }
        };

        info!(
            "Initialized {} sections for {}",
            sections.len(),
            builder.region
        );
        Ok(Self {
            region: builder.region,
            sections,
            debug: false,
        })
    }

    /// In debug mode the first section error aborts the pass.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(Section::name).collect()
    }

    /// Run every section once, collecting failures as exception lines.
    ///
    /// # Errors
    ///
    /// Only in debug mode, where the first section error is returned.
    pub async fn run(&mut self, options: RunOptions) -> Result<RunReport> {
        let mut report = RunReport::new(&self.region);
        for section in &mut self.sections {
            match section.run(options).await {
                Ok(output) => report.outputs.push(output),
                Err(e) if self.debug => {
                    error!("{} failed in {}: {}", section.name(), self.region, e);
                    return Err(e);
                }
                Err(e) => {
                    if e.is_contract_violation() {
                        error!("{} broke its output contract: {}", section.name(), e);
                    } else {
                        warn!("{} failed in {}: {}", section.name(), self.region, e);
                    }
                    report.exceptions.push(exception_line(section.name(), &e));
                }
            }
        }
        Ok(report)
    }
}

async fn regional_sections(
    builder: &mut Builder<'_>,
    enabled: &dyn Fn(&str) -> bool,
    account_wide: bool,
) -> Result<Vec<Section>> {
    let config = Arc::clone(&builder.config);
    let limits = |service: &str| config.service(service).limits;
    let default = DEFAULT_SECTION_INTERVAL_SECS;
    let mut sections = Vec::new();

    let ebs_summary = if enabled("ebs") {
        let ctx = builder.ctx(ServiceClient::Ec2)?;
        Some(builder.section(EBS_SUMMARY, default, EbsSummary::new(ctx))?)
    } else {
        None
    };

    if enabled("ec2") {
        let ec2 = builder.ctx(ServiceClient::Ec2)?;
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let ec2_limits = builder.section(EC2_LIMITS, default, Ec2Limits::new(ec2.clone()))?;
        let summary = builder.section(EC2_SUMMARY, default, Ec2Summary::new(ec2.clone()))?;
        let labels = builder.section(EC2_LABELS, default, Ec2Labels)?;
        let security_groups =
            builder.section(EC2_SECURITY_GROUPS, default, Ec2SecurityGroups::new(ec2))?;
        let metrics = builder.section(
            EC2,
            default,
            MetricSeries::new(EC2, cloudwatch, default, Ec2Metrics)?,
        )?;

        summary.consume_from(&ec2_limits).await;
        labels.consume_from(&summary).await;
        security_groups.consume_from(&summary).await;
        metrics.consume_from(&summary).await;
        if let Some(ebs_summary) = &ebs_summary {
            ebs_summary.consume_from(&summary).await;
        }

        if limits("ec2") {
            sections.push(ec2_limits);
        }
        sections.extend([summary, labels, security_groups, metrics]);
    }

    if let Some(ebs_summary) = ebs_summary {
        let ec2 = builder.ctx(ServiceClient::Ec2)?;
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let ebs_limits = builder.section(EBS_LIMITS, default, EbsLimits::new(ec2))?;
        let metrics = builder.section(
            EBS,
            default,
            MetricSeries::new(EBS, cloudwatch, default, EbsMetrics)?,
        )?;

        ebs_summary.consume_from(&ebs_limits).await;
        metrics.consume_from(&ebs_summary).await;

        if limits("ebs") {
            sections.push(ebs_limits);
        }
        sections.extend([ebs_summary, metrics]);
    }

    if enabled("elb") {
        let elb = builder.ctx(ServiceClient::Elb)?;
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let elb_limits = builder.section(ELB_LIMITS, default, ElbLimits::new(elb.clone()))?;
        let summary = builder.section(ELB_SUMMARY, default, ElbSummary::new(elb.clone(), &CLASSIC))?;
        let labels = builder.section(ELB_LABELS, default, ElbLabels::new(&CLASSIC))?;
        let health = builder.section(ELB_HEALTH, default, ElbHealth::new(elb))?;
        let metrics = builder.section(
            ELB,
            default,
            MetricSeries::new(ELB, cloudwatch, default, ElbMetrics)?,
        )?;

        summary.consume_from(&elb_limits).await;
        labels.consume_from(&summary).await;
        health.consume_from(&summary).await;
        metrics.consume_from(&summary).await;

        if limits("elb") {
            sections.push(elb_limits);
        }
        sections.extend([summary, labels, health, metrics]);
    }

    if enabled("elbv2") {
        let elbv2 = builder.ctx(ServiceClient::Elbv2)?;
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let elbv2_limits = builder.section(ELBV2_LIMITS, default, Elbv2Limits::new(elbv2.clone()))?;
        let summary = builder.section(ELBV2_SUMMARY, default, ElbSummary::new(elbv2.clone(), &ELBV2))?;
        let labels = builder.section(ELBV2_LABELS, default, ElbLabels::new(&ELBV2))?;
        let target_groups =
            builder.section(ELBV2_TARGET_GROUPS, default, Elbv2TargetGroups::new(elbv2))?;
        let application = builder.section(
            ELBV2_APPLICATION,
            default,
            MetricSeries::new(ELBV2_APPLICATION, cloudwatch.clone(), default, Elbv2Metrics::application())?,
        )?;
        let network = builder.section(
            ELBV2_NETWORK,
            default,
            MetricSeries::new(ELBV2_NETWORK, cloudwatch, default, Elbv2Metrics::network())?,
        )?;

        summary.consume_from(&elbv2_limits).await;
        for consumer in [&labels, &target_groups, &application, &network] {
            consumer.consume_from(&summary).await;
        }

        if limits("elbv2") {
            sections.push(elbv2_limits);
        }
        sections.extend([summary, labels, target_groups, application, network]);
    }

    if enabled("s3") {
        let daily = DAILY_SECTION_INTERVAL_SECS;
        let s3 = builder.ctx(ServiceClient::S3)?;
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let s3_limits = builder.section(S3_LIMITS, daily, S3Limits::new(s3.clone()))?;
        let summary = builder.section(S3_SUMMARY, daily, S3Summary::new(s3))?;
        let metrics = builder.section(
            S3,
            daily,
            MetricSeries::new(S3, cloudwatch.clone(), daily, S3Metrics)?,
        )?;
        let requests = builder.section(
            S3_REQUESTS,
            default,
            MetricSeries::new(S3_REQUESTS, cloudwatch, default, S3RequestMetrics)?,
        )?;

        summary.consume_from(&s3_limits).await;
        metrics.consume_from(&summary).await;
        requests.consume_from(&summary).await;

        // Bucket counts are account-wide; one region reports them.
        if limits("s3") && account_wide {
            sections.push(s3_limits);
        }
        sections.extend([summary, metrics]);
        if config.s3_requests {
            sections.push(requests);
        }
    }

    if enabled("rds") {
        let rds = builder.ctx(ServiceClient::Rds)?;
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let rds_limits = builder.section(RDS_LIMITS, default, RdsLimits::new(rds.clone()))?;
        let summary = builder.section(RDS_SUMMARY, default, RdsSummary::new(rds))?;
        let metrics = builder.section(
            RDS,
            default,
            MetricSeries::new(RDS, cloudwatch, default, RdsMetrics)?,
        )?;

        metrics.consume_from(&summary).await;

        if limits("rds") {
            sections.push(rds_limits);
        }
        sections.extend([summary, metrics]);
    }

    if enabled("cloudwatch") {
        let cloudwatch = builder.ctx(ServiceClient::Cloudwatch)?;
        let alarm_limits = builder.section(
            CLOUDWATCH_ALARMS_LIMITS,
            default,
            CloudwatchAlarmsLimits::new(cloudwatch.clone()),
        )?;
        let alarms = builder.section(CLOUDWATCH_ALARMS, default, CloudwatchAlarms::new(cloudwatch))?;

        alarms.consume_from(&alarm_limits).await;

        if limits("cloudwatch") {
            sections.push(alarm_limits);
        }
        if config.cloudwatch_alarms.is_some() {
            sections.push(alarms);
        }
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockClient, MockSession};
    use crate::client::ApiError;
    use serde_json::json;
    use tempfile::TempDir;

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn config_with_limits(service_names: &[&str]) -> CollectorConfig {
        let mut config = CollectorConfig::new("aws-host", "/tmp").unwrap();
        for service in service_names {
            config.set_service(service, None, None, true);
        }
        config
    }

    async fn runner(
        scope: Scope,
        names: &[&str],
        config: CollectorConfig,
        session: &MockSession,
        dir: &TempDir,
    ) -> SectionRunner {
        SectionRunner::init(
            scope,
            &services(names),
            "eu-west-1",
            Arc::new(config),
            session,
            Arc::new(CacheStore::new(dir.path())),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_ec2_and_ebs_section_order() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new("123456789012");
        let runner = runner(
            Scope::Regional { account_wide: true },
            &["ec2", "ebs"],
            config_with_limits(&["ec2", "ebs"]),
            &session,
            &dir,
        )
        .await;
        assert_eq!(
            runner.section_names(),
            vec![
                EC2_LIMITS,
                EC2_SUMMARY,
                EC2_LABELS,
                EC2_SECURITY_GROUPS,
                EC2,
                EBS_LIMITS,
                EBS_SUMMARY,
                EBS,
            ]
        );
    }

    #[tokio::test]
    async fn test_limits_sections_follow_flags() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new("123456789012");
        let mut config = config_with_limits(&["s3"]);
        config.s3_requests = true;
        let runner = runner(
            Scope::Regional { account_wide: false },
            &["s3", "rds"],
            config,
            &session,
            &dir,
        )
        .await;
        assert_eq!(
            runner.section_names(),
            vec![S3_SUMMARY, S3, S3_REQUESTS, RDS_SUMMARY, RDS]
        );
    }

    #[tokio::test]
    async fn test_load_balancer_sections() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new("123456789012");
        let runner = runner(
            Scope::Regional { account_wide: true },
            &["elb", "elbv2"],
            config_with_limits(&["elbv2"]),
            &session,
            &dir,
        )
        .await;
        assert_eq!(
            runner.section_names(),
            vec![
                ELB_SUMMARY,
                ELB_LABELS,
                ELB_HEALTH,
                ELB,
                ELBV2_LIMITS,
                ELBV2_SUMMARY,
                ELBV2_LABELS,
                ELBV2_TARGET_GROUPS,
                ELBV2_APPLICATION,
                ELBV2_NETWORK,
            ]
        );
    }

    #[tokio::test]
    async fn test_global_scope_uses_global_region() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new("123456789012");
        let runner = runner(
            Scope::Global,
            &["ce"],
            CollectorConfig::new("aws-host", "/tmp").unwrap(),
            &session,
            &dir,
        )
        .await;
        assert_eq!(runner.region(), GLOBAL_SERVICE_REGION);
        assert_eq!(runner.section_names(), vec![COSTS_AND_USAGE]);
    }

    #[tokio::test]
    async fn test_broken_region_fails_init() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new("123456789012").with_broken_region("eu-west-1");
        let result = SectionRunner::init(
            Scope::Regional { account_wide: true },
            &services(&["ec2"]),
            "eu-west-1",
            Arc::new(CollectorConfig::new("aws-host", "/tmp").unwrap()),
            &session,
            Arc::new(CacheStore::new(dir.path())),
        )
        .await;
        assert!(matches!(result, Err(Error::Region { .. })));
    }

    fn failing_alarms_session() -> MockSession {
        MockSession::new("123456789012").with_client(
            ServiceClient::Cloudwatch,
            MockClient::new().fail(
                "describe_alarms",
                ApiError::Client {
                    operation: "describe_alarms".to_string(),
                    message: "throttled".to_string(),
                },
            ),
        )
    }

    #[tokio::test]
    async fn test_failure_becomes_exception() {
        let dir = TempDir::new().unwrap();
        let session = failing_alarms_session();
        let mut config = config_with_limits(&["cloudwatch"]);
        config.cloudwatch_alarms = Some(vec![]);
        let mut runner = runner(
            Scope::Regional { account_wide: true },
            &["cloudwatch"],
            config,
            &session,
            &dir,
        )
        .await;
        let report = runner.run(RunOptions::default()).await.unwrap();

        assert_eq!(report.exceptions.len(), 2);
        assert!(report.exceptions[0].starts_with("cloudwatch_alarms_limits: "));
        assert!(report.exceptions[0].contains("throttled"));
        assert!(report.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_debug_mode_propagates() {
        let dir = TempDir::new().unwrap();
        let session = failing_alarms_session();
        let mut runner = runner(
            Scope::Regional { account_wide: true },
            &["cloudwatch"],
            config_with_limits(&["cloudwatch"]),
            &session,
            &dir,
        )
        .await
        .with_debug(true);
        assert!(runner.run(RunOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_producer_content_reaches_consumer() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new("123456789012").with_client(
            ServiceClient::Cloudwatch,
            MockClient::new().respond(
                "describe_alarms",
                json!({"MetricAlarms": [{"AlarmName": "cpu", "StateValue": "ALARM"}]}),
            ),
        );
        let mut config = config_with_limits(&["cloudwatch"]);
        config.cloudwatch_alarms = Some(vec!["cpu".to_string()]);
        let mut runner = runner(
            Scope::Regional { account_wide: true },
            &["cloudwatch"],
            config,
            &session,
            &dir,
        )
        .await;
        let report = runner.run(RunOptions::default()).await.unwrap();

        assert!(report.exceptions.is_empty());
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(
            report.outputs[1].results[0].content,
            json!([{"AlarmName": "cpu", "StateValue": "ALARM"}])
        );
        // the alarms section reused the limits section's listing
        assert_eq!(session.mock(ServiceClient::Cloudwatch).call_count("describe_alarms"), 1);
    }
}
