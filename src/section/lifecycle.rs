use super::collector::SectionCollector;
use super::content::{
    is_falsy, ColleagueContent, ComputedContent, RawContent, SectionIdentity, SectionResult,
};
use super::kind::SectionKind;
use crate::cache::{unix_now, CacheEntry, CacheKey, CacheStore};
use crate::config::check_path_component;
use crate::distributor::{Inbox, InboxSender, ResultDistributor};
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionState {
    Created,
    ColleaguesGathered,
    RawFetched,
    ContentComputed,
    ResultsShaped,
    Done,
    Failed(String),
}

/// Cache behaviour of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Serve raw content from valid cache entries.
    pub use_cache: bool,
    /// Persist freshly fetched raw content.
    pub write_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            write_cache: true,
        }
    }
}

/// Everything the writer needs from one finished section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionOutput {
    pub name: String,
    pub kind: SectionKind,
    pub cache_timestamp: f64,
    pub cache_interval: u64,
    pub results: Vec<SectionResult>,
}

/// A section instance bound to one region and host.
pub struct Section {
    identity: SectionIdentity,
    cache_interval: u64,
    collector: Box<dyn SectionCollector>,
    cache: Arc<CacheStore>,
    inbox: Inbox,
    distributor: Arc<ResultDistributor>,
    state: SectionState,
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("identity", &self.identity)
            .field("cache_interval", &self.cache_interval)
            .field("kind", &self.collector.kind())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Section {
    /// # Errors
    ///
    /// Returns `Error::Config` for a name, region or host that is not a plain
    /// path component, or a zero refresh interval.
    pub fn new(
        identity: SectionIdentity,
        cache_interval: u64,
        collector: Box<dyn SectionCollector>,
        cache: Arc<CacheStore>,
    ) -> Result<Self> {
        check_path_component("section name", &identity.name)?;
        check_path_component("region", &identity.region)?;
        check_path_component("host name", &identity.host)?;
        if cache_interval == 0 {
            return Err(Error::Config(format!(
                "{}: refresh interval must be positive",
                identity.name
            )));
        }
        Ok(Self {
            identity,
            cache_interval,
            collector,
            cache,
            inbox: Inbox::new(),
            distributor: Arc::new(ResultDistributor::new()),
            state: SectionState::Created,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    #[must_use]
    pub const fn identity(&self) -> &SectionIdentity {
        &self.identity
    }

    #[must_use]
    pub const fn cache_interval(&self) -> u64 {
        self.cache_interval
    }

    #[must_use]
    pub fn kind(&self) -> SectionKind {
        self.collector.kind()
    }

    #[must_use]
    pub const fn state(&self) -> &SectionState {
        &self.state
    }

    #[must_use]
    pub const fn distributor(&self) -> &Arc<ResultDistributor> {
        &self.distributor
    }

    #[must_use]
    pub fn inbox_sender(&self) -> InboxSender {
        self.inbox.sender()
    }

    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.identity.name, &self.identity.region, &self.identity.host)
    }

    /// Register `self` as a consumer of `producer`'s content.
    pub async fn consume_from(&self, producer: &Self) -> Uuid {
        producer
            .distributor
            .register(self.name(), self.inbox_sender())
            .await
    }

    /// Collect what upstream sections produced so far in this run.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidShape` if the collector builds colleague content
    /// with an invalid timestamp.
    pub fn gather_colleagues(&mut self) -> Result<ColleagueContent> {
        let received = self.inbox.drain();
        let colleagues = self.collector.colleagues(received);
        colleagues.validate(&self.identity.name)?;
        self.state = SectionState::ColleaguesGathered;
        Ok(colleagues)
    }

    async fn valid_cache_entry(
        &self,
        colleagues: &ColleagueContent,
        use_cache: bool,
    ) -> Option<CacheEntry> {
        if !use_cache {
            return None;
        }
        let key = self.cache_key();
        let entry = self.cache.get(&key).await?;
        let now = unix_now();
        let Some(remaining) = entry.time_until_expiry(self.cache_interval, now) else {
            info!("{}: cache expired (age {:.0}s)", key, entry.age(now));
            return None;
        };
        if colleagues.timestamp > entry.timestamp {
            info!("{}: colleague data is newer than cache", key);
            return None;
        }
        debug!("{}: cache valid for another {:.0}s", key, remaining);
        Some(entry)
    }

    /// True if raw content may be served from the cache.
    pub async fn is_cache_valid(&self, colleagues: &ColleagueContent, use_cache: bool) -> bool {
        self.valid_cache_entry(colleagues, use_cache).await.is_some()
    }

    /// Serve raw content from the cache or call the provider API.
    ///
    /// # Errors
    ///
    /// Propagates API errors of the collector.
    pub async fn fetch_raw(
        &mut self,
        colleagues: &ColleagueContent,
        options: RunOptions,
    ) -> Result<RawContent> {
        if let Some(entry) = self.valid_cache_entry(colleagues, options.use_cache).await {
            debug!("{}: using cached raw content", self.identity.name);
            self.state = SectionState::RawFetched;
            return Ok(RawContent {
                payload: entry.payload,
                timestamp: entry.timestamp,
            });
        }

        let payload = self.collector.fetch_raw(colleagues).await?;
        let timestamp = unix_now();
        if options.write_cache {
            if let Err(e) = self.cache.put(&self.cache_key(), &payload, timestamp).await {
                warn!("{}: cannot write cache: {}", self.identity.name, e);
            }
        }
        self.state = SectionState::RawFetched;
        Ok(RawContent { payload, timestamp })
    }

    /// # Errors
    ///
    /// Propagates errors of the collector.
    pub fn compute_content(
        &mut self,
        raw: &RawContent,
        colleagues: &ColleagueContent,
    ) -> Result<ComputedContent> {
        let payload = self.collector.compute_content(&raw.payload, colleagues)?;
        self.state = SectionState::ContentComputed;
        Ok(ComputedContent {
            payload,
            timestamp: raw.timestamp.max(colleagues.timestamp),
        })
    }

    /// Push computed content to every registered consumer.
    pub async fn publish(&self, computed: &ComputedContent) -> usize {
        self.distributor.publish(self.name(), computed).await
    }

    /// Shape, drop empty records and validate against the kind contract.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidShape` on a contract violation.
    pub fn shape_results(&mut self, computed: &ComputedContent) -> Result<Vec<SectionResult>> {
        let results: Vec<SectionResult> = self
            .collector
            .shape_results(&computed.payload)?
            .into_iter()
            .filter(|result| {
                let keep = !is_falsy(&result.content);
                if !keep {
                    info!("{}: result is empty", self.identity.name);
                }
                keep
            })
            .collect();
        self.collector.kind().validate(&self.identity.name, &results)?;
        self.state = SectionState::ResultsShaped;
        Ok(results)
    }

    /// Drive the full state machine once.
    ///
    /// # Errors
    ///
    /// Any failing step moves the section to `Failed` and returns the error.
    pub async fn run(&mut self, options: RunOptions) -> Result<SectionOutput> {
        match self.run_steps(options).await {
            Ok(output) => {
                self.state = SectionState::Done;
                Ok(output)
            }
            Err(e) => {
                self.state = SectionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_steps(&mut self, options: RunOptions) -> Result<SectionOutput> {
        let colleagues = self.gather_colleagues()?;
        let raw = self.fetch_raw(&colleagues, options).await?;
        let computed = self.compute_content(&raw, &colleagues)?;
        self.publish(&computed).await;
        let results = self.shape_results(&computed)?;
        Ok(SectionOutput {
            name: self.identity.name.clone(),
            kind: self.collector.kind(),
            cache_timestamp: computed.timestamp,
            cache_interval: self.cache_interval,
            results,
        })
    }
}
