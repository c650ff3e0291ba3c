//! Integration tests for configuration validation and loading

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_tcp::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig, MAX_FRAME_SIZE,
};
use packet_tcp::core::serialization::SerializationFormat;
use packet_tcp::crypto::{CryptoConfig, SymmetricCrypto};
use serial_test::serial;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_defaults_match_protocol_limits() {
    let config = NetworkConfig::default();
    assert_eq!(config.transport.max_frame_size, MAX_FRAME_SIZE);
    assert_eq!(config.transport.max_frame_size, 4096);
    assert_eq!(config.transport.poll_interval, Duration::from_millis(10));
    assert!(!config.transport.identity_sync);
    assert_eq!(config.transport.body_format, SerializationFormat::Json);
    assert_eq!(config.transport.crypto, CryptoConfig::None);
    assert_eq!(config.server.max_connections, 100);
    assert_eq!(config.server.max_outbound_queue_depth_per_client, 100);
    assert_eq!(config.client.max_outbound_queue_depth, 100);
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(!errors.is_empty(), "Should have validation errors");
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_client_address() {
    let mut config = NetworkConfig::default();
    config.client.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_client_address_may_name_a_host() {
    let mut config = NetworkConfig::default();
    for address in ["localhost:9000", "example.net:443", "[::1]:9000"] {
        config.client.address = address.to_string();
        assert!(
            config.client.validate().is_empty(),
            "{address} should be accepted"
        );
    }
}

#[test]
fn test_client_address_needs_host_and_port() {
    let mut config = NetworkConfig::default();
    for address in ["nohostport", ":9000", "localhost:", "localhost:http", "host:70000"] {
        config.client.address = address.to_string();
        let errors = config.client.validate();
        assert!(
            errors.iter().any(|e| e.contains("Invalid client address")),
            "{address} should be rejected, got {errors:?}"
        );
    }
}

#[test]
fn test_role_validation_skips_other_role() {
    let mut config = NetworkConfig::default();
    config.server.address = "not an address".to_string();
    assert!(config.validate_client_strict().is_ok());
    assert!(config.validate_server_strict().is_err());

    let mut config = NetworkConfig::default();
    config.client.address = String::new();
    assert!(config.validate_server_strict().is_ok());
    assert!(config.validate_client_strict().is_err());

    // shared sections count for both roles
    config.transport.max_frame_size = 32;
    assert!(config.validate_server_strict().is_err());
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.server.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_zero_queue_depths() {
    let mut config = NetworkConfig::default();
    config.server.max_outbound_queue_depth_per_client = 0;
    config.client.max_outbound_queue_depth = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Per-client outbound queue depth must be greater than 0")));
    assert!(errors
        .iter()
        .any(|e| e.starts_with("Outbound queue depth must be greater than 0")));
}

#[test]
fn test_frame_size_below_envelope_floor() {
    let mut config = NetworkConfig::default();
    config.transport.max_frame_size = 32;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max frame size too small")));
}

#[test]
fn test_zero_poll_interval() {
    let mut config = NetworkConfig::default();
    config.transport.poll_interval = Duration::ZERO;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Poll interval must be greater than 0")));
}

#[test]
fn test_bad_crypto_key_is_reported() {
    let mut config = NetworkConfig::default();
    config.transport.crypto = CryptoConfig::Symmetric {
        key: "c2hvcnQ=".to_string(),
        iv: "c2hvcnQ=".to_string(),
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid crypto configuration")));
}

#[test]
fn test_short_timeouts() {
    let mut config = NetworkConfig::default();
    config.client.connect_timeout = Duration::from_millis(5);
    config.client.request_timeout = Duration::from_millis(1);
    config.server.shutdown_timeout = Duration::from_millis(5);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Connect timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Request timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Shutdown timeout too short")));
}

#[test]
fn test_long_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = "a".repeat(100);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name too long")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();

    let error_str = config.validate_strict().unwrap_err().to_string();
    assert!(error_str.contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NetworkConfig::default();

    config.server.address = String::new();
    config.server.max_connections = 0;
    config.client.address = String::new();
    config.transport.max_frame_size = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_toml_roundtrip_with_crypto() {
    let crypto = SymmetricCrypto::generate().unwrap();
    let config = NetworkConfig {
        server: ServerConfig {
            address: "0.0.0.0:7100".to_string(),
            max_connections: 500,
            max_outbound_queue_depth_per_client: 64,
            shutdown_timeout: Duration::from_secs(2),
        },
        client: ClientConfig {
            address: "127.0.0.1:7100".to_string(),
            max_outbound_queue_depth: 32,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_millis(750),
            request_timeout: Duration::from_secs(1),
        },
        transport: TransportConfig {
            max_frame_size: 8192,
            poll_interval: Duration::from_millis(5),
            identity_sync: true,
            body_format: SerializationFormat::MessagePack,
            crypto: CryptoConfig::Symmetric {
                key: crypto.key_base64(),
                iv: crypto.iv_base64(),
            },
        },
        logging: LoggingConfig {
            app_name: "packet-edge".to_string(),
            log_level: Level::DEBUG,
            json_format: true,
        },
    };
    assert!(config.validate().is_empty());

    let text = toml::to_string_pretty(&config).unwrap();
    let parsed = NetworkConfig::from_toml(&text).unwrap();

    assert_eq!(parsed.server.max_connections, 500);
    assert_eq!(parsed.client.handshake_timeout, Duration::from_millis(750));
    assert_eq!(parsed.transport.body_format, SerializationFormat::MessagePack);
    assert_eq!(parsed.transport.crypto, config.transport.crypto);
    assert_eq!(parsed.logging.log_level, Level::DEBUG);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let parsed = NetworkConfig::from_toml(
        r#"
        [transport]
        identity_sync = true

        [transport.crypto]
        mode = "password"
        password = "correct horse"
        salt = "battery staple"
        "#,
    )
    .unwrap();

    assert!(parsed.transport.identity_sync);
    assert_eq!(parsed.transport.max_frame_size, MAX_FRAME_SIZE);
    assert!(parsed.transport.crypto.is_enabled());
    assert_eq!(parsed.server.address, "127.0.0.1:9000");
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = NetworkConfig::from_toml("[server\naddress = 1");
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    std::env::set_var("PACKET_TCP_MAX_CONNECTIONS", "7");
    std::env::set_var("PACKET_TCP_IDENTITY_SYNC", "true");
    std::env::set_var("PACKET_TCP_POLL_INTERVAL_MS", "25");

    let config = NetworkConfig::from_env().unwrap();

    std::env::remove_var("PACKET_TCP_MAX_CONNECTIONS");
    std::env::remove_var("PACKET_TCP_IDENTITY_SYNC");
    std::env::remove_var("PACKET_TCP_POLL_INTERVAL_MS");

    assert_eq!(config.server.max_connections, 7);
    assert!(config.transport.identity_sync);
    assert_eq!(config.transport.poll_interval, Duration::from_millis(25));
}

#[test]
#[serial]
fn test_from_env_rejects_garbage() {
    std::env::set_var("PACKET_TCP_MAX_FRAME_SIZE", "lots");
    let result = NetworkConfig::from_env();
    std::env::remove_var("PACKET_TCP_MAX_FRAME_SIZE");

    assert!(result.is_err());
}

#[test]
fn test_default_with_overrides() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.identity_sync = true;
        c.server.max_connections = 2;
    });
    assert!(config.transport.identity_sync);
    assert_eq!(config.server.max_connections, 2);
    assert!(NetworkConfig::example_config().contains("[transport]"));
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("packet-tcp-{}.toml", uuid::Uuid::new_v4()));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.client.request_timeout = Duration::from_millis(250);
        c.transport.body_format = SerializationFormat::Bincode;
    });

    config.save_to_file(&path).unwrap();
    let loaded = NetworkConfig::from_file(&path);
    std::fs::remove_file(&path).unwrap();

    let loaded = loaded.unwrap();
    assert_eq!(loaded.client.request_timeout, Duration::from_millis(250));
    assert_eq!(loaded.transport.body_format, SerializationFormat::Bincode);
    assert!(NetworkConfig::from_file(&path).is_err());
}
