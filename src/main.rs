use anyhow::Context;
use aws_collector::agent::{Agent, Plan};
use aws_collector::client::{RecordedSession, Session};
use aws_collector::config::{
    resolve_cache_dir, CollectorConfig, ImportTags, NamingConvention, TagFilter,
};
use aws_collector::fingerprint::ConfigFingerprint;
use aws_collector::runner::{GLOBAL_SERVICES, REGIONAL_SERVICES};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Collects AWS inventory, limits and CloudWatch metrics as agent sections.
///
/// Provider responses are read from a directory of recorded API responses
/// (see `--recorded-responses`); this binary does not call AWS itself.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Name of the monitored host the sections are attributed to
    #[arg(long)]
    hostname: String,

    /// Directory with recorded provider responses, the only data source
    ///
    /// Layout: `<DIR>/account.json` holds the caller identity
    /// (`{"Account": "<id>"}`), and `<DIR>/<region>/<service>/<operation>.json`
    /// the response of one API operation. A missing operation file is
    /// reported as that section's exception.
    #[arg(long, value_name = "DIR")]
    recorded_responses: PathBuf,

    #[arg(long, num_args = 1..)]
    regions: Vec<String>,

    #[arg(long, num_args = 1.., value_parser = clap::builder::PossibleValuesParser::new(GLOBAL_SERVICES.iter().copied()))]
    global_services: Vec<String>,

    #[arg(long, num_args = 1.., value_parser = clap::builder::PossibleValuesParser::new(REGIONAL_SERVICES.iter().copied()))]
    services: Vec<String>,

    #[arg(long)]
    overall_tag_key: Vec<String>,
    /// Comma-separated values, one occurrence per tag key
    #[arg(long)]
    overall_tag_values: Vec<String>,

    #[arg(long, num_args = 1..)]
    ec2_names: Option<Vec<String>>,
    #[arg(long)]
    ec2_tag_key: Vec<String>,
    #[arg(long)]
    ec2_tag_values: Vec<String>,
    #[arg(long)]
    ec2_limits: bool,

    #[arg(long, num_args = 1..)]
    ebs_names: Option<Vec<String>>,
    #[arg(long)]
    ebs_tag_key: Vec<String>,
    #[arg(long)]
    ebs_tag_values: Vec<String>,
    #[arg(long)]
    ebs_limits: bool,

    #[arg(long, num_args = 1..)]
    elb_names: Option<Vec<String>>,
    #[arg(long)]
    elb_tag_key: Vec<String>,
    #[arg(long)]
    elb_tag_values: Vec<String>,
    #[arg(long)]
    elb_limits: bool,

    #[arg(long, num_args = 1..)]
    elbv2_names: Option<Vec<String>>,
    #[arg(long)]
    elbv2_tag_key: Vec<String>,
    #[arg(long)]
    elbv2_tag_values: Vec<String>,
    #[arg(long)]
    elbv2_limits: bool,

    #[arg(long, num_args = 1..)]
    s3_names: Option<Vec<String>>,
    #[arg(long)]
    s3_tag_key: Vec<String>,
    #[arg(long)]
    s3_tag_values: Vec<String>,
    #[arg(long)]
    s3_limits: bool,

    /// Also collect per-request S3 metrics
    #[arg(long)]
    s3_requests: bool,

    #[arg(long, num_args = 1..)]
    rds_names: Option<Vec<String>>,
    #[arg(long)]
    rds_tag_key: Vec<String>,
    #[arg(long)]
    rds_tag_values: Vec<String>,
    #[arg(long)]
    rds_limits: bool,

    /// Collect alarm states, optionally only the named alarms
    #[arg(long, num_args = 0..)]
    cloudwatch_alarms: Option<Vec<String>>,
    #[arg(long)]
    cloudwatch_alarms_limits: bool,

    /// `all`, `none` or a regular expression over tag keys
    #[arg(long, default_value = "all")]
    import_tags: String,

    #[arg(long, value_enum, default_value_t = NamingConvention::IpRegionInstance)]
    naming: NamingConvention,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Only check that the provider is reachable
    #[arg(long)]
    connection_test: bool,

    #[arg(long)]
    no_cache: bool,

    /// Stop at the first error
    #[arg(long)]
    debug: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn split_values(occurrences: &[String]) -> Vec<Vec<String>> {
    occurrences
        .iter()
        .map(|values| values.split(',').map(str::to_string).collect())
        .collect()
}

impl Args {
    fn collector_config(&self) -> anyhow::Result<CollectorConfig> {
        let overall =
            TagFilter::from_pairs(&self.overall_tag_key, &split_values(&self.overall_tag_values));
        let mut config =
            CollectorConfig::new(&self.hostname, resolve_cache_dir(self.cache_dir.as_deref()))?
                .with_overall_tags(overall);

        let services = [
            ("ec2", &self.ec2_names, &self.ec2_tag_key, &self.ec2_tag_values, self.ec2_limits),
            ("ebs", &self.ebs_names, &self.ebs_tag_key, &self.ebs_tag_values, self.ebs_limits),
            ("elb", &self.elb_names, &self.elb_tag_key, &self.elb_tag_values, self.elb_limits),
            ("elbv2", &self.elbv2_names, &self.elbv2_tag_key, &self.elbv2_tag_values, self.elbv2_limits),
            ("s3", &self.s3_names, &self.s3_tag_key, &self.s3_tag_values, self.s3_limits),
            ("rds", &self.rds_names, &self.rds_tag_key, &self.rds_tag_values, self.rds_limits),
        ];
        for (service, names, keys, values, limits) in services {
            let tags = TagFilter::from_pairs(keys, &split_values(values));
            config.set_service(service, names.clone(), tags, limits);
        }
        config.set_service("cloudwatch", None, None, self.cloudwatch_alarms_limits);

        config.s3_requests = self.s3_requests;
        config.cloudwatch_alarms = self.cloudwatch_alarms.clone();
        config.import_tags = ImportTags::parse(&self.import_tags)?;
        config.naming = self.naming;
        Ok(config)
    }

    fn plan(&self) -> Plan {
        let mut services = self.services.clone();
        let wants_alarms = self.cloudwatch_alarms.is_some() || self.cloudwatch_alarms_limits;
        if wants_alarms && !services.iter().any(|s| s == "cloudwatch") {
            services.push("cloudwatch".to_string());
        }
        Plan {
            global_services: self.global_services.clone(),
            services,
            regions: self.regions.clone(),
            debug: self.debug,
            no_cache: self.no_cache,
        }
    }
}

fn init_tracing(args: &Args) {
    let default_level = if args.verbose {
        "debug"
    } else if args.debug {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(&args);

    let config = args.collector_config()?;
    let session: Arc<dyn Session> = Arc::new(RecordedSession::new(&args.recorded_responses));
    let fingerprint = ConfigFingerprint::new(
        &config.cache_dir,
        &config.hostname,
        &std::env::args().skip(1).collect::<Vec<_>>(),
    );
    let agent = Agent::new(config, session, args.plan());

    if args.connection_test {
        return match agent.test_connection().await {
            Ok(account_id) => {
                tracing::info!("Connected to account {}", account_id);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("Connection failed with: {e}");
                Ok(ExitCode::from(2))
            }
        };
    }

    let mut stdout = std::io::stdout().lock();
    agent
        .run(&fingerprint, &mut stdout)
        .await
        .context("collection aborted")?;
    Ok(ExitCode::SUCCESS)
}
