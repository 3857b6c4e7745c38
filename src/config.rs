use crate::cache::config::{CACHE_DIR_ENV, DEFAULT_CACHE_DIR};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A provider-side tag filter, `{"Name": "tag:<key>", "Values": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagFilter {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Values")]
    pub values: Vec<String>,
}

impl TagFilter {
    #[must_use]
    pub fn new(key: &str, values: Vec<String>) -> Self {
        Self {
            name: format!("tag:{key}"),
            values,
        }
    }

    /// Pair up repeated `--tag-key` / `--tag-values` occurrences.
    ///
    /// Returns `None` unless both keys and values were given.
    #[must_use]
    pub fn from_pairs(keys: &[String], values: &[Vec<String>]) -> Option<Vec<Self>> {
        if keys.is_empty() || values.is_empty() {
            return None;
        }
        Some(
            keys.iter()
                .zip(values)
                .map(|(key, values)| Self::new(key, values.clone()))
                .collect(),
        )
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.name.strip_prefix("tag:").unwrap_or(&self.name)
    }

    #[must_use]
    pub fn to_api_filter(&self) -> Value {
        json!({"Name": self.name, "Values": self.values})
    }
}

/// Flatten tag filters into the `{"Key": .., "Value": ..}` pairs used in
/// resource descriptions, so already fetched resources can be filtered locally.
#[must_use]
pub fn tag_pairs(filters: &[TagFilter]) -> Vec<Value> {
    filters
        .iter()
        .flat_map(|f| {
            f.values
                .iter()
                .map(move |v| json!({"Key": f.key(), "Value": v}))
        })
        .collect()
}

/// Resource selection for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceFilter {
    pub names: Option<Vec<String>>,
    pub tags: Option<Vec<TagFilter>>,
    pub limits: bool,
}

static NO_FILTER: ServiceFilter = ServiceFilter {
    names: None,
    tags: None,
    limits: false,
};

impl ServiceFilter {
    /// Tags filter only applies when no explicit names are given.
    #[must_use]
    pub fn matches_tags(&self, tags: &[Value]) -> bool {
        if self.names.is_some() {
            return true;
        }
        match &self.tags {
            None => true,
            Some(filters) => {
                let wanted = tag_pairs(filters);
                tags.iter().any(|tag| wanted.contains(tag))
            }
        }
    }
}

/// Which provider tags are exported as labels.
#[derive(Debug, Clone, Default)]
pub enum ImportTags {
    #[default]
    All,
    Ignore,
    Pattern(Regex),
}

impl ImportTags {
    /// Parse `all`, `none` or a regular expression matched against tag keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pattern` for an invalid expression.
    pub fn parse(option: &str) -> Result<Self> {
        match option {
            "all" => Ok(Self::All),
            "none" => Ok(Self::Ignore),
            pattern => Ok(Self::Pattern(Regex::new(pattern)?)),
        }
    }

    /// Turn `[{"Key": k, "Value": v}, ...]` into a label mapping.
    #[must_use]
    pub fn select(&self, tags: &[Value]) -> Map<String, Value> {
        let pairs = tags.iter().filter_map(|tag| {
            let key = tag.get("Key")?.as_str()?;
            let value = tag.get("Value")?.as_str()?;
            Some((key, value))
        });
        match self {
            Self::All => pairs
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .collect(),
            Self::Ignore => Map::new(),
            Self::Pattern(re) => pairs
                .filter(|(k, _)| re.is_match(k))
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .collect(),
        }
    }
}

impl Serialize for ImportTags {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Ignore => serializer.serialize_str("none"),
            Self::Pattern(re) => serializer.serialize_str(re.as_str()),
        }
    }
}

/// How compute instances are named as piggyback hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// `<private ip>-<region>-<instance id>`
    #[default]
    IpRegionInstance,
    /// The instance's private DNS name
    PrivateDnsName,
}

/// Everything the sections of one run need to know about the operator's intent.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorConfig {
    pub hostname: String,
    pub cache_dir: PathBuf,
    services: BTreeMap<String, ServiceFilter>,
    overall_tags: Option<Vec<TagFilter>>,
    pub s3_requests: bool,
    /// `Some(names)` enables the alarms section; empty names select every alarm.
    pub cloudwatch_alarms: Option<Vec<String>>,
    pub import_tags: ImportTags,
    pub naming: NamingConvention,
}

impl CollectorConfig {
    /// # Errors
    ///
    /// Returns `Error::Config` for a host name that cannot name a cache directory.
    pub fn new(hostname: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let hostname = hostname.into();
        check_path_component("host name", &hostname)?;
        Ok(Self {
            hostname,
            cache_dir: cache_dir.into(),
            services: BTreeMap::new(),
            overall_tags: None,
            s3_requests: false,
            cloudwatch_alarms: None,
            import_tags: ImportTags::All,
            naming: NamingConvention::IpRegionInstance,
        })
    }

    #[must_use]
    pub fn with_overall_tags(mut self, tags: Option<Vec<TagFilter>>) -> Self {
        self.overall_tags = tags;
        self
    }

    /// Register the filter of one service. Services without own tag filters
    /// inherit the overall tags.
    pub fn set_service(
        &mut self,
        service: &str,
        names: Option<Vec<String>>,
        tags: Option<Vec<TagFilter>>,
        limits: bool,
    ) {
        let tags = tags.or_else(|| self.overall_tags.clone());
        self.services.insert(
            service.to_string(),
            ServiceFilter {
                names,
                tags,
                limits,
            },
        );
    }

    #[must_use]
    pub fn service(&self, service: &str) -> &ServiceFilter {
        self.services.get(service).unwrap_or(&NO_FILTER)
    }
}

/// Host names and regions become directories below the cache root; they
/// must stay a single, non-empty path component.
///
/// # Errors
///
/// Returns `Error::Config` naming `what` otherwise.
pub fn check_path_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config(format!("{what} must not be empty")));
    }
    if matches!(value, "." | "..") || value.contains(['/', '\\', '\0']) {
        return Err(Error::Config(format!("{what} '{value}' is not a plain name")));
    }
    Ok(())
}

/// Cache root: the explicit directory, else the environment override, else the default.
#[must_use]
pub fn resolve_cache_dir(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            std::env::var_os(CACHE_DIR_ENV)
                .filter(|dir| !dir.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR), PathBuf::from)
        },
        Path::to_path_buf,
    )
}
