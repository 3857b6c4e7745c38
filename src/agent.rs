//! One invocation of the collector: access check, global pass, regional passes.

use crate::cache::CacheStore;
use crate::client::regions::GLOBAL_SERVICE_REGION;
use crate::client::Session;
use crate::config::CollectorConfig;
use crate::error::Result;
use crate::fingerprint::ConfigFingerprint;
use crate::runner::{RunReport, Scope, SectionRunner};
use crate::section::RunOptions;
use crate::writer::OutputWriter;
use futures::future::join_all;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What to collect where, and how strictly.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub global_services: Vec<String>,
    pub services: Vec<String>,
    pub regions: Vec<String>,
    /// Surface the first error instead of reporting it as an exception.
    pub debug: bool,
    /// Neither read nor write the section cache.
    pub no_cache: bool,
}

pub struct Agent {
    config: Arc<CollectorConfig>,
    session: Arc<dyn Session>,
    cache: Arc<CacheStore>,
    plan: Plan,
}

impl Agent {
    #[must_use]
    pub fn new(config: CollectorConfig, session: Arc<dyn Session>, plan: Plan) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache_dir.clone()));
        Self {
            config: Arc::new(config),
            session,
            cache,
            plan,
        }
    }

    /// Check that the credentials work at all.
    ///
    /// # Errors
    ///
    /// Returns `Error::Access` when the provider refuses the credentials.
    pub async fn test_connection(&self) -> Result<String> {
        self.session.account_id().await
    }

    /// Collect every pass and write the framed output.
    ///
    /// An access failure writes only the exceptions block and still succeeds.
    ///
    /// # Errors
    ///
    /// In debug mode, the first region or section error. Otherwise only
    /// failures to write the output.
    pub async fn run<W: Write>(&self, fingerprint: &ConfigFingerprint, out: &mut W) -> Result<()> {
        let mut writer = OutputWriter::new(out, &self.config.hostname);

        let account_id = match self.session.account_id().await {
            Ok(account_id) => account_id,
            Err(e) => {
                warn!("Giving up, provider not accessible: {}", e);
                return writer.write_exceptions(&[format!("Exception: {e}")]);
            }
        };

        let options = RunOptions {
            use_cache: fingerprint.is_current().await && !self.plan.no_cache,
            write_cache: !self.plan.no_cache,
        };
        info!(
            "Collecting for account {} (use cache: {})",
            account_id, options.use_cache
        );

        if !self.plan.global_services.is_empty() {
            let report = self
                .run_region(
                    Scope::Global,
                    &self.plan.global_services,
                    GLOBAL_SERVICE_REGION,
                    options,
                )
                .await?;
            writer.write_report(&report, Some(&account_id))?;
        }

        if self.plan.services.is_empty() {
            return Ok(());
        }
        if self.plan.regions.is_empty() {
            error!(
                "No region given for the services: {}",
                self.plan.services.join(", ")
            );
            return Ok(());
        }

        let passes = self.plan.regions.iter().enumerate().map(|(i, region)| {
            self.run_region(
                Scope::Regional {
                    account_wide: i == 0,
                },
                &self.plan.services,
                region,
                options,
            )
        });
        for report in join_all(passes).await {
            writer.write_report(&report?, Some(&account_id))?;
        }
        Ok(())
    }

    async fn run_region(
        &self,
        scope: Scope,
        services: &[String],
        region: &str,
        options: RunOptions,
    ) -> Result<RunReport> {
        let runner = SectionRunner::init(
            scope,
            services,
            region,
            Arc::clone(&self.config),
            self.session.as_ref(),
            Arc::clone(&self.cache),
        )
        .await;
        match runner {
            Ok(runner) => runner.with_debug(self.plan.debug).run(options).await,
            Err(e) if self.plan.debug => Err(e),
            Err(e) => {
                error!("Skipping region {}: {}", region, e);
                Ok(RunReport::failed(region, &e))
            }
        }
    }
}
