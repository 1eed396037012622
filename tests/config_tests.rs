use std::io::Write;

use ratatosk::config::ProxyConfig;
use ratatosk::error::ConfigError;

#[test]
fn test_load_without_file_uses_defaults() {
    let config = ProxyConfig::load(None).unwrap();
    assert_eq!(config.concurrency, 3);
    assert_eq!(config.name, "dns.proxy.server.");
    assert!(config.forwarders.contains_key("normal"));
    assert!(config.forwarders.contains_key("gfw"));
    assert_eq!(config.rules.get("default").map(String::as_str), Some("normal"));
    assert_eq!(config.min_ttl, 600);
    assert_eq!(config.max_ttl, 86_400);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        concurrency = 2
        name = "ns.lan"
        mapper = ["api.internal:10.0.0.7"]

        [bind]
        udp = ":5353"
        http = "127.0.0.1:8080"

        [rules]
        default = "normal"
        "example.com" = "gfw"

        [forwarders]
        normal = ["1.1.1.1:53", "9.9.9.9:53"]

        [logger]
        access = true
        level = "debug"
        "#
    )
    .unwrap();

    let config = ProxyConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.concurrency, 2);
    // Normalization adds the trailing dot and the synthesized gfw group
    assert_eq!(config.name, "ns.lan.");
    assert!(config.forwarders.contains_key("gfw"));
    assert_eq!(config.forwarders["normal"].len(), 2);
    assert!(config.logger.access);
    assert_eq!(config.logger.level, "debug");
}

#[test]
fn test_missing_file_is_an_error() {
    let err = ProxyConfig::load(Some(std::path::Path::new("/nonexistent/ratatosk.toml")))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read(_)), "got {:?}", err);
}

#[test]
fn test_unparsable_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "this is not toml =").unwrap();

    let err = ProxyConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "got {:?}", err);
}

#[test]
fn test_invalid_rule_group_fails_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [rules]
        default = "missing-group"
        "#
    )
    .unwrap();

    let err = ProxyConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownGroup { .. }), "got {:?}", err);
}

#[test]
fn test_invalid_mapper_fails_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"mapper = ["onelabel:1.2.3.4"]"#).unwrap();

    let err = ProxyConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidMapper(_)), "got {:?}", err);
}

#[test]
fn test_explicit_zero_cache_means_unlimited() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "cache = 0").unwrap();

    let config = ProxyConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.cache, 0);
}
