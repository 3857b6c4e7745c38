mod common;

use aws_collector::agent::Agent;
use common::{collect, plan, Fixture, ACCOUNT};
use serde_json::{json, Value};

const REGION: &str = "eu-west-1";
const INSTANCE_HOST: &str = "10.0.0.1-eu-west-1-i-0001";

fn instance(id: &str, ip: &str, tags: Value) -> Value {
    json!({
        "InstanceId": id,
        "InstanceType": "t2.micro",
        "PrivateIpAddress": ip,
        "Placement": {"AvailabilityZone": "eu-west-1a"},
        "State": {"Name": "running"},
        "Tags": tags,
    })
}

fn record_ec2(fixture: &Fixture) {
    let instances = json!({"Reservations": [{"Instances": [
        instance("i-0001", "10.0.0.1", json!([{"Key": "env", "Value": "prod"}])),
        instance("i-0002", "10.0.0.2", json!([])),
    ]}]});
    fixture.record(REGION, "ec2", "describe_instances", &instances);
    for operation in [
        "describe_reserved_instances",
        "describe_addresses",
        "describe_security_groups",
        "describe_network_interfaces",
        "describe_spot_instance_requests",
        "describe_spot_fleet_requests",
    ] {
        fixture.record(REGION, "ec2", operation, &json!({}));
    }
    fixture.record(
        REGION,
        "cloudwatch",
        "get_metric_data",
        &json!({"MetricDataResults": [
            {"Id": "id_0_CPUUtilization", "Label": INSTANCE_HOST, "Values": [12.5], "Timestamps": []},
        ]}),
    );
}

fn record_alarms(fixture: &Fixture, region: &str, alarm: &str) {
    fixture.record(
        region,
        "cloudwatch",
        "describe_alarms",
        &json!({"MetricAlarms": [{"AlarmName": alarm, "StateValue": "OK"}]}),
    );
}

fn alarms_agent(fixture: &Fixture, session: std::sync::Arc<common::CountingSession>, regions: &[&str]) -> Agent {
    let mut config = fixture.config();
    config.cloudwatch_alarms = Some(vec![]);
    Agent::new(config, session, plan(&["cloudwatch"], regions))
}

#[tokio::test]
async fn test_limits_and_labels_of_tagged_instance() {
    let fixture = Fixture::new();
    record_ec2(&fixture);
    let session = fixture.session();
    let mut config = fixture.config();
    config.set_service("ec2", None, None, true);
    let agent = Agent::new(config, session.clone(), plan(&["ec2"], &[REGION]));

    let text = collect(&agent, &fixture.fingerprint(&["--services", "ec2", "--ec2-limits"])).await;

    assert!(text.starts_with("<<<aws_exceptions>>>\nNo exceptions\n"));
    assert!(text.contains(&format!("{{\"cmk/aws/account\":\"{ACCOUNT}\"}}")));
    assert!(text.contains(concat!(
        "{\"key\":\"running_ondemand_instances_t2.micro\",",
        "\"title\":\"Running On-Demand t2.micro Instances\",",
        "\"limit\":20,\"amount\":2,\"region\":\"eu-west-1\"}"
    )));
    // only the tagged instance gets a labels block
    let labels = format!("<<<<{INSTANCE_HOST}>>>>\n<<<ec2_labels:sep(0):cached(");
    assert_eq!(text.matches(&labels).count(), 1);
    assert!(text.contains("\n{\"env\":\"prod\"}\n<<<<>>>>\n"));
    assert!(!text.contains("<<<<10.0.0.2-eu-west-1-i-0002>>>>\n<<<ec2_labels"));
    // instance metrics carry the instance host label
    assert!(text.contains("\"cmk/aws/ec2\":\"instance\""));
    assert!(text.contains("<<<aws_ec2:cached("));
    // the summary reused the limits section's instance listing
    assert_eq!(session.count("describe_instances"), 1);
}

#[tokio::test]
async fn test_application_load_balancer_chain() {
    let fixture = Fixture::new();
    let arn = "arn:aws:elasticloadbalancing:eu-west-1:123456789012:loadbalancer/app/web/50dc6c495c0c9188";
    let responses = [
        (
            "describe_load_balancers",
            json!({"LoadBalancers": [{
                "LoadBalancerName": "web",
                "LoadBalancerArn": arn,
                "DNSName": "web.elb.amazonaws.com",
                "Type": "application",
            }]}),
        ),
        ("describe_target_groups", json!({"TargetGroups": [{"TargetGroupArn": "tg-1"}]})),
        ("describe_listeners", json!({"Listeners": [{"ListenerArn": "l-1"}]})),
        ("describe_rules", json!({"Rules": [{"IsDefault": true}]})),
        ("describe_account_limits", json!({"Limits": []})),
        ("describe_tags", json!({"TagDescriptions": [{"Tags": [{"Key": "team", "Value": "edge"}]}]})),
        (
            "describe_target_health",
            json!({"TargetHealthDescriptions": [{"TargetHealth": {"State": "healthy"}}]}),
        ),
    ];
    for (operation, response) in &responses {
        fixture.record(REGION, "elbv2", operation, response);
    }
    fixture.record(REGION, "cloudwatch", "get_metric_data", &json!({"MetricDataResults": []}));
    let session = fixture.session();
    let mut config = fixture.config();
    config.set_service("elbv2", None, None, true);
    let agent = Agent::new(config, session.clone(), plan(&["elbv2"], &[REGION]));

    let text = collect(&agent, &fixture.fingerprint(&["--services", "elbv2", "--elbv2-limits"])).await;

    assert!(text.starts_with("<<<aws_exceptions>>>\nNo exceptions\n"));
    assert!(text.contains(concat!(
        "{\"key\":\"application_load_balancers\",\"title\":\"Application Load balancers\",",
        "\"limit\":20,\"amount\":1,\"region\":\"eu-west-1\"}"
    )));
    assert!(text.contains("<<<<web.elb.amazonaws.com>>>>\n<<<elbv2_generic_labels:sep(0):cached("));
    assert!(text.contains("\n{\"team\":\"edge\"}\n<<<<>>>>\n"));
    assert!(text.contains("<<<<web.elb.amazonaws.com>>>>\n<<<aws_elbv2_target_groups:cached("));
    assert!(text.contains("\"State\":\"healthy\""));
    // the summary reused the limits section's listing
    assert_eq!(session.count("describe_load_balancers"), 1);
}

#[tokio::test]
async fn test_failing_section_leaves_siblings_intact() {
    let fixture = Fixture::new();
    record_alarms(&fixture, REGION, "cpu-high");
    fixture.record(REGION, "rds", "describe_db_instances", &json!({"DBInstances": []}));
    let mut config = fixture.config();
    config.cloudwatch_alarms = Some(vec![]);
    config.set_service("rds", None, None, true);
    let agent = Agent::new(config, fixture.session(), plan(&["rds", "cloudwatch"], &[REGION]));

    let text = collect(&agent, &fixture.fingerprint(&["--services", "rds", "cloudwatch"])).await;

    let exceptions: Vec<&str> = text
        .lines()
        .skip_while(|line| *line != "<<<aws_exceptions>>>")
        .skip(1)
        .take_while(|line| !line.starts_with("<<<"))
        .collect();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].starts_with("rds_limits: describe_account_attributes"));
    assert!(text.contains("<<<aws_cloudwatch_alarms:cached("));
    assert!(text.contains("\"AlarmName\":\"cpu-high\""));
}

#[tokio::test]
async fn test_regions_do_not_share_content() {
    let fixture = Fixture::new();
    record_alarms(&fixture, "eu-west-1", "alarm-eu");
    record_alarms(&fixture, "us-west-2", "alarm-us");
    let session = fixture.session();
    let agent = alarms_agent(&fixture, session.clone(), &["eu-west-1", "us-west-2"]);
    let fingerprint = fixture.fingerprint(&["--regions", "eu-west-1", "us-west-2"]);

    for _ in 0..2 {
        let text = collect(&agent, &fingerprint).await;
        let (first, second) = text
            .split_once("<<<aws_exceptions>>>")
            .and_then(|(_, rest)| rest.split_once("<<<aws_exceptions>>>"))
            .unwrap();
        assert!(first.contains("alarm-eu") && !first.contains("alarm-us"));
        assert!(second.contains("alarm-us") && !second.contains("alarm-eu"));
    }
    assert!(fixture.cache.path().join("eu-west-1").exists());
    assert!(fixture.cache.path().join("us-west-2").exists());
}

#[tokio::test]
async fn test_second_run_makes_no_calls() {
    let fixture = Fixture::new();
    record_ec2(&fixture);
    let session = fixture.session();
    let mut config = fixture.config();
    config.set_service("ec2", None, None, true);
    let agent = Agent::new(config, session.clone(), plan(&["ec2"], &[REGION]));
    let fingerprint = fixture.fingerprint(&["--services", "ec2", "--ec2-limits"]);

    let first = collect(&agent, &fingerprint).await;
    let calls = session.total();
    assert!(calls > 0);

    let second = collect(&agent, &fingerprint).await;
    assert_eq!(first, second);
    assert_eq!(session.total(), calls);
}

#[tokio::test]
async fn test_changed_config_bypasses_cache() {
    let fixture = Fixture::new();
    record_alarms(&fixture, REGION, "cpu-high");
    let session = fixture.session();
    let agent = alarms_agent(&fixture, session.clone(), &[REGION]);

    collect(&agent, &fixture.fingerprint(&["--cloudwatch-alarms"])).await;
    collect(&agent, &fixture.fingerprint(&["--cloudwatch-alarms"])).await;
    assert_eq!(session.count("describe_alarms"), 1);

    collect(&agent, &fixture.fingerprint(&["--cloudwatch-alarms", "cpu-high"])).await;
    assert_eq!(session.count("describe_alarms"), 2);
}

#[tokio::test]
async fn test_diagnostic_flags_keep_cache() {
    let fixture = Fixture::new();
    record_alarms(&fixture, REGION, "cpu-high");
    let session = fixture.session();
    let agent = alarms_agent(&fixture, session.clone(), &[REGION]);

    collect(&agent, &fixture.fingerprint(&["--regions", REGION, "--verbose"])).await;
    collect(&agent, &fixture.fingerprint(&["--debug", "--regions", REGION])).await;
    assert_eq!(session.count("describe_alarms"), 1);
}

#[tokio::test]
async fn test_empty_section_writes_no_header() {
    let fixture = Fixture::new();
    fixture.record(REGION, "rds", "describe_db_instances", &json!({"DBInstances": []}));
    let agent = Agent::new(fixture.config(), fixture.session(), plan(&["rds"], &[REGION]));

    let text = collect(&agent, &fixture.fingerprint(&["--services", "rds"])).await;

    assert!(text.contains("No exceptions"));
    assert!(!text.contains("<<<aws_rds_summary"));
    assert!(!text.contains("<<<aws_rds"));
}

#[tokio::test]
async fn test_unknown_region_is_reported_not_fatal() {
    let fixture = Fixture::new();
    record_alarms(&fixture, REGION, "cpu-high");
    let agent = alarms_agent(&fixture, fixture.session(), &["mars-north-1", REGION]);

    let text = collect(&agent, &fixture.fingerprint(&["--regions", "mars-north-1", REGION])).await;

    assert!(text.contains("region mars-north-1: invalid region name"));
    assert!(text.contains("\"AlarmName\":\"cpu-high\""));
}

#[tokio::test]
async fn test_missing_credentials_write_only_exceptions() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.responses.path().join("account.json")).unwrap();
    let agent = alarms_agent(&fixture, fixture.session(), &[REGION]);

    let text = collect(&agent, &fixture.fingerprint(&[])).await;

    assert!(text.starts_with("<<<aws_exceptions>>>\nException: cannot access provider: "));
    assert_eq!(text.lines().count(), 2);
}
