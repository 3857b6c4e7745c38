/// Regions a client may be constructed for.
pub const REGIONS: &[&str] = &[
    "ap-south-1",
    "ap-northeast-3",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "ca-central-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "sa-east-1",
    "us-east-2",
    "us-east-1",
    "us-west-1",
    "us-west-2",
];

/// Cost explorer only answers in this region.
pub const GLOBAL_SERVICE_REGION: &str = "us-east-1";

#[must_use]
pub fn is_known(region: &str) -> bool {
    REGIONS.contains(&region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_regions() {
        assert!(is_known("eu-central-1"));
        assert!(is_known(GLOBAL_SERVICE_REGION));
        assert!(!is_known("eu-central-"));
        assert!(!is_known("foobar"));
    }
}
