use super::ServiceContext;
use crate::error::Result;
use crate::section::collector::{host_result, response_content, SectionCollector};
use crate::section::content::{ColleagueContent, SectionResult};
use crate::section::kind::SectionKind;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};

pub const COSTS_AND_USAGE: &str = "costs_and_usage";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Daily unblended cost per linked account and service.
pub struct CostsAndUsage {
    ctx: ServiceContext,
}

impl CostsAndUsage {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// `End` is exclusive, so this covers exactly the previous day.
    #[must_use]
    pub fn request(now: DateTime<Utc>) -> Value {
        json!({
            "TimePeriod": {
                "Start": (now - TimeDelta::days(1)).format(DATE_FORMAT).to_string(),
                "End": now.format(DATE_FORMAT).to_string(),
            },
            "Granularity": "DAILY",
            "Metrics": ["UnblendedCost"],
            "GroupBy": [
                {"Type": "DIMENSION", "Key": "LINKED_ACCOUNT"},
                {"Type": "DIMENSION", "Key": "SERVICE"},
            ],
        })
    }
}

#[async_trait]
impl SectionCollector for CostsAndUsage {
    fn kind(&self) -> SectionKind {
        SectionKind::Generic
    }

    async fn fetch_raw(&self, _colleagues: &ColleagueContent) -> Result<Value> {
        let response = self
            .ctx
            .call(COSTS_AND_USAGE, "get_cost_and_usage", Self::request(Utc::now()))
            .await?;
        Ok(response_content(COSTS_AND_USAGE, &response, "ResultsByTime"))
    }

    fn compute_content(&self, raw: &Value, _colleagues: &ColleagueContent) -> Result<Value> {
        Ok(raw.clone())
    }

    fn shape_results(&self, computed: &Value) -> Result<Vec<SectionResult>> {
        Ok(host_result(computed.clone()))
    }
}
