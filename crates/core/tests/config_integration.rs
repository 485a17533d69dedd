//! arpwarden.toml 통합 설정 테스트
//!
//! - arpwarden.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 파일 로딩 / 잘못된 형식 에러 테스트

use std::net::Ipv4Addr;

use arpwarden_core::config::ArpWardenConfig;
use arpwarden_core::error::{ArpWardenError, ConfigError};

const EXAMPLE: &str = include_str!("../../../arpwarden.toml.example");

// =============================================================================
// arpwarden.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = ArpWardenConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.engine.worker_count, 4);
    assert_eq!(config.engine.max_workers, 16);
    assert_eq!(config.engine.executor, "elastic");
}

#[test]
fn example_config_passes_validation() {
    let config = ArpWardenConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_has_context_section() {
    let config = ArpWardenConfig::parse(EXAMPLE).expect("should parse");

    assert_eq!(
        config.context.gateway_ips,
        vec![Ipv4Addr::new(192, 168, 1, 1)]
    );
    assert_eq!(config.context.gateway_macs[0].to_string(), "00:11:22:33:44:55");
    assert_eq!(config.context.trusted_hosts.len(), 1);
    assert_eq!(config.context.arp_table_path, "/proc/net/arp");
}

#[test]
fn example_config_matches_code_defaults() {
    let from_file = ArpWardenConfig::parse(EXAMPLE).expect("should parse");
    let from_code = ArpWardenConfig::default();

    // CPU 수에 따라 달라지는 필드(worker_count, max_workers, max_concurrent_tasks)는 제외
    let (f, c) = (&from_file.engine, &from_code.engine);
    assert_eq!(f.min_workers, c.min_workers);
    assert_eq!(f.batch_size, c.batch_size);
    assert_eq!(f.min_batch_size, c.min_batch_size);
    assert_eq!(f.max_batch_size, c.max_batch_size);
    assert_eq!(f.batch_timeout_secs, c.batch_timeout_secs);
    assert_eq!(f.sub_batch_size, c.sub_batch_size);
    assert_eq!(f.memory_limit_mb, c.memory_limit_mb);
    assert_eq!(f.memory_check_interval_secs, c.memory_check_interval_secs);
    assert_eq!(f.scale_up_threshold, c.scale_up_threshold);
    assert_eq!(f.scale_down_threshold, c.scale_down_threshold);
    assert_eq!(f.scaling_interval_secs, c.scaling_interval_secs);
    assert_eq!(f.scaling_cooldown_secs, c.scaling_cooldown_secs);
    assert_eq!(f.queue_capacity, c.queue_capacity);
    assert_eq!(f.shutdown_timeout_secs, c.shutdown_timeout_secs);
    assert_eq!(f.context_update_interval_secs, c.context_update_interval_secs);
    assert_eq!(f.executor, c.executor);
    assert_eq!(f.default_rule_priority, c.default_rule_priority);
    assert_eq!(f.rule_priority_map, c.rule_priority_map);
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_general_only() {
    let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
"#;
    let config = ArpWardenConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.general.log_level, "debug");
    // 나머지 섹션은 기본값
    assert_eq!(config.engine.batch_size, 50);
    assert!(config.context.gateway_ips.is_empty());
}

#[test]
fn partial_config_gated_executor() {
    let toml = r#"
[engine]
executor = "gated"
max_concurrent_tasks = 2
"#;
    let config = ArpWardenConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.engine.executor, "gated");
    assert_eq!(config.engine.max_concurrent_tasks, 2);
    assert_eq!(config.engine.priority_for("mitm_detection"), 10);
}

#[test]
fn invalid_toml_is_parse_error() {
    let result = ArpWardenConfig::parse("[engine\nbatch_size = ");
    assert!(matches!(
        result,
        Err(ArpWardenError::Config(ConfigError::ParseFailed { .. }))
    ));
}

#[test]
fn wrong_type_is_parse_error() {
    let result = ArpWardenConfig::parse("[engine]\nbatch_size = \"many\"");
    assert!(result.is_err());
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
    let original = std::env::var(key).ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var(key, value) };

    let result = f();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let result = with_env("ARPWARDEN_GENERAL_LOG_LEVEL", "error", || {
        let mut config =
            ArpWardenConfig::parse("[general]\nlog_level = \"info\"").expect("should parse");
        config.apply_env_overrides();
        config.general.log_level
    });
    assert_eq!(result, "error");
}

#[test]
#[serial_test::serial]
fn env_override_numeric_field() {
    let result = with_env("ARPWARDEN_ENGINE_MAX_WORKERS", "32", || {
        let mut config = ArpWardenConfig::parse("").expect("should parse");
        config.apply_env_overrides();
        config.engine.max_workers
    });
    assert_eq!(result, 32);
}

#[test]
#[serial_test::serial]
fn env_override_float_field() {
    let result = with_env("ARPWARDEN_ENGINE_BATCH_TIMEOUT_SECS", "0.25", || {
        let mut config = ArpWardenConfig::parse("").expect("should parse");
        config.apply_env_overrides();
        config.engine.batch_timeout_secs
    });
    assert_eq!(result, 0.25);
}

#[test]
#[serial_test::serial]
fn env_override_invalid_number_keeps_toml_value() {
    let result = with_env("ARPWARDEN_ENGINE_BATCH_SIZE", "lots", || {
        let mut config =
            ArpWardenConfig::parse("[engine]\nbatch_size = 80").expect("should parse");
        config.apply_env_overrides();
        config.engine.batch_size
    });
    assert_eq!(result, 80);
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
#[serial_test::serial]
async fn load_from_file_applies_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("arpwarden.toml");
    std::fs::write(&path, "[engine]\nmin_workers = 9\nmax_workers = 3\n").expect("write");

    let result = ArpWardenConfig::load(&path).await;
    assert!(matches!(
        result,
        Err(ArpWardenError::Config(ConfigError::InvalidValue { .. }))
    ));
}

#[tokio::test]
#[serial_test::serial]
async fn load_example_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("arpwarden.toml");
    std::fs::write(&path, EXAMPLE).expect("write");

    let config = ArpWardenConfig::load(&path).await.expect("should load");
    assert_eq!(config.engine.queue_capacity, 10_000);
}
