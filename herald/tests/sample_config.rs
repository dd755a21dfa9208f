//! The shipped sample configuration must stay loadable

use herald::config;

#[test]
fn test_sample_config_is_valid() {
    let config = config::parse(include_str!("../../demos/herald.config.ron"))
        .unwrap_or_else(|error| panic!("sample config rejected: {error}"));

    let names: Vec<&str> = config.backends.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["primary", "secondary", "last-resort"]);
    assert_eq!(config.retry.max_attempts, 3);
}
