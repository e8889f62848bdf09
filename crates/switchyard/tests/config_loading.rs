//! Loading `SwitchyardConfig` from files and the environment.

use std::io::Write;

use pretty_assertions::assert_eq;
use serial_test::serial;
use switchyard::prelude::*;
use tempfile::NamedTempFile;

const TOML: &str = r#"
[service]
name = "greeter"
binding = "json"
endpoints = [
    { name = "primary", address = "http://10.0.0.1:8080/greeter" },
    { name = "backup", address = "http://10.0.0.2:8080/greeter" },
]

[conduit]
use_async = "always"
max_retransmits = 3

[clustering]
strategy = "retry_on_same_address"
max_retries = 2

[telemetry]
log_level = "debug"
json_logs = true
"#;

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn test_load_toml() {
    let file = write_config(".toml", TOML);
    let config = SwitchyardConfig::from_file(file.path()).unwrap();

    assert_eq!(config.service.name, "greeter");
    assert_eq!(config.service.endpoints.len(), 2);
    assert_eq!(config.service.primary().unwrap().name(), "primary");
    assert_eq!(config.conduit.use_async, UseAsyncPolicy::Always);
    assert_eq!(config.conduit.max_retransmits, 3);
    assert_eq!(config.conduit.reactor_threads, 2);
    assert_eq!(config.clustering.strategy, StrategyKind::RetryOnSameAddress);
    assert_eq!(config.clustering.max_retries, Some(2));
    assert_eq!(config.telemetry.log_level, "debug");
    assert!(config.telemetry.json_logs);
}

#[test]
#[serial]
fn test_load_yaml_and_json() {
    let yaml = write_config(
        ".yaml",
        "service:\n  name: greeter\n  endpoints:\n    - name: primary\n      address: http://10.0.0.1/greeter\nclustering:\n  strategy: random\n",
    );
    let config = SwitchyardConfig::from_file(yaml.path()).unwrap();
    assert_eq!(config.clustering.strategy, StrategyKind::Random);
    assert_eq!(config.service.binding, "json");

    let json = write_config(
        ".json",
        r#"{"service": {"name": "greeter", "endpoints": [{"name": "primary", "address": "http://10.0.0.1/greeter"}]}}"#,
    );
    let config = SwitchyardConfig::from_file(json.path()).unwrap();
    assert_eq!(config.clustering.strategy, StrategyKind::Sequential);
    assert_eq!(config.conduit, ConduitConfig::default());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(".toml", TOML);
    // SAFETY: serialised with the other tests touching the environment.
    unsafe {
        std::env::set_var("SWITCHYARD__CONDUIT__MAX_RETRANSMITS", "7");
        std::env::set_var("SWITCHYARD__CLUSTERING__STRATEGY", "sequential");
    }
    let result = SwitchyardConfig::from_file(file.path());
    unsafe {
        std::env::remove_var("SWITCHYARD__CONDUIT__MAX_RETRANSMITS");
        std::env::remove_var("SWITCHYARD__CLUSTERING__STRATEGY");
    }

    // max_retries without the retry strategy is rejected
    assert!(matches!(result, Err(ConfigError::Clustering(_))));

    unsafe {
        std::env::set_var("SWITCHYARD__CONDUIT__MAX_RETRANSMITS", "7");
    }
    let config = SwitchyardConfig::from_file(file.path());
    unsafe {
        std::env::remove_var("SWITCHYARD__CONDUIT__MAX_RETRANSMITS");
    }
    assert_eq!(config.unwrap().conduit.max_retransmits, 7);
}

#[test]
#[serial]
fn test_load_errors() {
    assert!(matches!(
        SwitchyardConfig::from_file("/nonexistent/switchyard.toml"),
        Err(ConfigError::FileNotFound(_))
    ));

    let ini = write_config(".ini", "[service]\nname = greeter\n");
    assert!(matches!(
        SwitchyardConfig::from_file(ini.path()),
        Err(ConfigError::UnsupportedFormat)
    ));

    let broken = write_config(".toml", "[service\nname = ");
    assert!(matches!(
        SwitchyardConfig::from_file(broken.path()),
        Err(ConfigError::ParseError(_))
    ));

    let empty = write_config(".toml", "[service]\nname = \"greeter\"\n");
    assert!(matches!(
        SwitchyardConfig::from_file(empty.path()),
        Err(ConfigError::InvalidService(_))
    ));

    let insecure = write_config(
        ".toml",
        "[service]\nendpoints = [{ name = \"a\", address = \"https://a/svc\" }]\n[conduit.tls]\nvalidate_certificates = false\n",
    );
    assert!(matches!(
        SwitchyardConfig::from_file(insecure.path()),
        Err(ConfigError::Transport(TransportError::ConfigurationError(_)))
    ));
}

#[test]
#[serial]
fn test_from_config_rejects_invalid_config() {
    let config = SwitchyardConfig::default();
    assert!(matches!(
        FailoverClient::from_config(&config),
        Err(ConfigError::InvalidService(_))
    ));
}
