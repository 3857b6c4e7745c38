use super::{strings, ServiceContext, NEXT_TOKEN};
use crate::error::Result;
use crate::section::collector::{host_result, items, limit_results, str_field, SectionCollector};
use crate::section::content::{ColleagueContent, LimitRecord, Received, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use serde_json::{json, Value};

pub const CLOUDWATCH_ALARMS_LIMITS: &str = "cloudwatch_alarms_limits";
pub const CLOUDWATCH_ALARMS: &str = "cloudwatch_alarms";

async fn describe_alarms(ctx: &ServiceContext, section: &str, params: Value) -> Result<Vec<Value>> {
    ctx.paginate(section, "describe_alarms", params, "MetricAlarms", NEXT_TOKEN)
        .await
}

pub struct CloudwatchAlarmsLimits {
    ctx: ServiceContext,
}

impl CloudwatchAlarmsLimits {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SectionCollector for CloudwatchAlarmsLimits {
    fn kind(&self) -> SectionKind {
        SectionKind::Limits
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(Value::Array(
            describe_alarms(&self.ctx, CLOUDWATCH_ALARMS_LIMITS, json!({})).await?,
        ))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        let record = LimitRecord::new(
            "cloudwatch_alarms",
            "CloudWatch Alarms",
            5000,
            items(computed).len() as u64,
            &self.ctx.region,
        );
        limit_results(vec![(String::new(), record)])
    }
}

/// Alarm states; a placeholder alarm stands in when there are none.
pub struct CloudwatchAlarms {
    ctx: ServiceContext,
}

impl CloudwatchAlarms {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn wanted(&self) -> Option<&Vec<String>> {
        self.ctx
            .config
            .cloudwatch_alarms
            .as_ref()
            .filter(|names| !names.is_empty())
    }
}

#[async_trait]
impl SectionCollector for CloudwatchAlarms {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    fn colleagues(&self, received: &Received) -> ColleagueContent {
        ColleagueContent::from_producer(received, CLOUDWATCH_ALARMS_LIMITS)
    }

    async fn fetch_raw(&self, colleagues: &ColleagueContent) -> Result<Value> {
        let alarms = match (self.wanted(), colleagues.payload.as_array()) {
            (Some(names), Some(known)) if !known.is_empty() => known
                .iter()
                .filter(|alarm| {
                    str_field(alarm, "AlarmName").is_some_and(|n| names.iter().any(|name| name == n))
                })
                .cloned()
                .collect(),
            (Some(names), _) => {
                let params = json!({"AlarmNames": strings(Some(names))});
                describe_alarms(&self.ctx, CLOUDWATCH_ALARMS, params).await?
            }
            (None, _) => describe_alarms(&self.ctx, CLOUDWATCH_ALARMS, json!({})).await?,
        };
        Ok(Value::Array(alarms))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        if items(raw).is_empty() {
            return Ok(json!([{"AlarmName": "Check_MK/CloudWatch Alarms", "StateValue": "NO_ALARMS"}]));
        }
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(host_result(computed.clone()))
    }
}
