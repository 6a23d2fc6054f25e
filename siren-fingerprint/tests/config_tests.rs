//! Service configuration loading and environment overrides

use serial_test::serial;
use siren_fingerprint::config::{MetadataConfig, ServiceConfig};
use siren_fingerprint::histogram::HistogramParams;
use std::env;
use std::io::Write;

#[test]
fn test_partial_toml_keeps_defaults() {
    let config: ServiceConfig = toml::from_str(
        r#"
        [postgres]
        host = "db.internal"
        pool_size = 8

        [matching]
        min_wasserstein_distance = 120.0
        "#,
    )
    .unwrap();

    assert_eq!(config.postgres.host, "db.internal");
    assert_eq!(config.postgres.pool_size, 8);
    assert_eq!(config.postgres.port, 5432);
    assert_eq!(config.matching.min_wasserstein_distance, 120.0);
    assert_eq!(config.matching.min_zscore, 3.25);
    assert_eq!(config.elastic.query_batch_size, 500);
    assert_eq!(config.server.threads_per_queue, 1);
}

#[test]
fn test_derived_urls() {
    let config = ServiceConfig::default();
    assert_eq!(config.postgres.url(), "postgresql://postgres:@localhost:5432/fingerprint");
    assert_eq!(config.elastic.base_url(), "https://localhost:9200/");

    let metadata = MetadataConfig {
        address: Some("metadata.internal".to_string()),
        port: Some(7000),
    };
    assert_eq!(metadata.base_url().as_deref(), Some("http://metadata.internal:7000"));
    assert_eq!(MetadataConfig::default().base_url(), None);
}

#[test]
fn test_histogram_params_follow_matching_config() {
    let params = HistogramParams::default();
    assert_eq!(params.min_distance, 250.0);
    assert_eq!(params.noise_sample_size, 10);
    assert_eq!(params.empty_noise_sentinel, 1.0);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nqueues = 2\n\n[elastic]\nhost = \"from-file\"").unwrap();

    env::set_var("SERV_QUEUES", "6");
    env::set_var("MINIMUM_PEAK_PERCENT", "50");
    env::set_var("USE_SSL", "0");
    let config = ServiceConfig::load(file.path());
    env::remove_var("SERV_QUEUES");
    env::remove_var("MINIMUM_PEAK_PERCENT");
    env::remove_var("USE_SSL");

    let config = config.unwrap();
    assert_eq!(config.server.queues, 6);
    assert_eq!(config.elastic.host, "from-file");
    assert_eq!(config.matching.min_peak_percent, 0.5);
    assert!(!config.elastic.use_ssl);
    assert!(!config.ingest.verify_tls);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.server.address, "0.0.0.0:8080");
    assert_eq!(config.postgres.db_name, "fingerprint");
}
