use domain::{CollectorParams, RegisterDataType};
use gw_config::{AppConfig, ConfigError};
use std::time::Duration;

const SAMPLE: &str = r#"
application_name = "bridge-gateway"

[logging]
level = "debug"

[collectors.modbus_tcp]
host = "10.0.0.5"
port = 502
poll_interval_ms = 1000

[collectors.nmea]
enabled = false

[mqtt_publisher]
topic_prefix = "fleet/vessel-1"
default_min_publish_interval_seconds = 120

[[sensors]]
id = "depth"
name = "Depth sounder"
collector_type = "modbus_tcp"

[sensors.collector_config]
register_address = 100
unit_id = 3
data_type = "int16"
scale = 0.1
polling_interval_ms = 250

[sensors.publisher_config]
mqtt_topic_suffix = "depth"
unit = "m"
change_threshold = 0.5
min_publish_interval_seconds = 60

[[sensors]]
id = "rot"
name = "Rate of turn"
collector_type = "nmea"

[sensors.collector_config]
expected_talker_id = "he"
expected_sentence_type = "ROT"

[sensors.publisher_config]
mqtt_topic_suffix = "rate_of_turn"
unit = "deg/min"
change_threshold = 1.0
"#;

fn sample_with_sensor(sensor: &str) -> String {
    format!("[mqtt_publisher]\ntopic_prefix = \"t\"\n\n{}", sensor)
}

#[test]
fn parses_full_document() {
    let config = AppConfig::from_toml_str(SAMPLE).expect("config");
    assert_eq!(config.application_name, "bridge-gateway");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.collectors.modbus_tcp.endpoint(), "10.0.0.5:502");
    assert_eq!(config.collectors.modbus_tcp.read_timeout_ms, 100);
    assert!(!config.collectors.nmea.enabled);
    assert_eq!(config.collectors.nmea.port, 8888);
    assert_eq!(config.mqtt_publisher.broker_host, "broker.hivemq.com");
    assert_eq!(config.mqtt_publisher.default_min_publish_interval_seconds, 120);
    assert_eq!(config.sensors.len(), 2);

    let depth = &config.sensors[0];
    let CollectorParams::ModbusTcp(params) = &depth.collector else {
        panic!("expected modbus params");
    };
    assert_eq!(params.register_address, 100);
    assert_eq!(params.unit_id, Some(3));
    assert_eq!(params.data_type, RegisterDataType::Int16);
    assert_eq!(params.scale, Some(0.1));
    assert_eq!(params.polling_interval, Some(Duration::from_millis(250)));
    assert_eq!(params.read_timeout, None);
    assert_eq!(depth.publish.topic_suffix.as_deref(), Some("depth"));
    assert_eq!(depth.publish.min_publish_interval, Some(Duration::from_secs(60)));

    let rot = &config.sensors[1];
    let CollectorParams::Nmea(params) = &rot.collector else {
        panic!("expected nmea params");
    };
    assert_eq!(params.expected_talker_id, "HE");
    assert_eq!(params.value_field, 0);
    assert_eq!(rot.publish.min_publish_interval, None);
}

#[test]
fn empty_document_uses_defaults() {
    let config = AppConfig::from_toml_str("").expect("config");
    assert_eq!(config.application_name, "sensor-gateway");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.collectors.modbus_tcp.endpoint(), "127.0.0.1:8889");
    assert_eq!(config.collectors.modbus_tcp.poll_interval_ms, 500);
    assert_eq!(config.collectors.modbus_tcp.retry_delay_ms, 5000);
    assert_eq!(config.collectors.nmea.endpoint(), "127.0.0.1:8888");
    assert_eq!(config.mqtt_publisher.keepalive_seconds, 600);
    assert_eq!(config.mqtt_publisher.lwt_message, "connection lost");
    assert_eq!(config.mqtt_publisher.timestamp_format, "%Y-%m-%d at %H:%M UTC");
    assert!(config.sensors.is_empty());
}

#[test]
fn collector_config_must_match_collector_type() {
    let text = sample_with_sensor(
        r#"
[[sensors]]
id = "rot"
collector_type = "modbus_tcp"
collector_config = { expected_talker_id = "HE", expected_sentence_type = "ROT" }
publisher_config = { unit = "deg/min", change_threshold = 1.0 }
"#,
    );
    let err = AppConfig::from_toml_str(&text).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("sensor rot")));
}

#[test]
fn unknown_collector_type_is_rejected() {
    let text = sample_with_sensor(
        r#"
[[sensors]]
id = "x"
collector_type = "canbus"
collector_config = { register_address = 1 }
publisher_config = { unit = "m", change_threshold = 1.0 }
"#,
    );
    assert!(matches!(
        AppConfig::from_toml_str(&text),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn duplicate_sensor_ids_are_rejected() {
    let sensor = r#"
[[sensors]]
id = "depth"
collector_type = "modbus_tcp"
collector_config = { register_address = 1 }
publisher_config = { unit = "m", change_threshold = 1.0 }
"#;
    let text = sample_with_sensor(&format!("{}{}", sensor, sensor));
    let err = AppConfig::from_toml_str(&text).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("duplicate")));
}

#[test]
fn negative_threshold_is_rejected() {
    let text = sample_with_sensor(
        r#"
[[sensors]]
id = "depth"
collector_type = "modbus_tcp"
collector_config = { register_address = 1 }
publisher_config = { unit = "m", change_threshold = -0.1 }
"#,
    );
    assert!(matches!(
        AppConfig::from_toml_str(&text),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn publisher_limits_are_enforced() {
    let short_keepalive = "[mqtt_publisher]\nkeepalive_seconds = 30\n";
    assert!(matches!(
        AppConfig::from_toml_str(short_keepalive),
        Err(ConfigError::Validation(_))
    ));

    let zero_interval = "[mqtt_publisher]\ndefault_min_publish_interval_seconds = 0\n";
    assert!(AppConfig::from_toml_str(zero_interval).is_err());

    let bad_format = "[mqtt_publisher]\ntimestamp_format = \"%Y %Q\"\n";
    assert!(AppConfig::from_toml_str(bad_format).is_err());

    let zero_poll = "[collectors.modbus_tcp]\npoll_interval_ms = 0\n";
    assert!(AppConfig::from_toml_str(zero_poll).is_err());
}

#[test]
fn load_resolves_path_and_applies_env_overrides() {
    let path = std::env::temp_dir().join(format!("gw-config-{}.toml", std::process::id()));
    std::fs::write(&path, SAMPLE).expect("write sample");

    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("GATEWAY_CONFIG", &path);
        std::env::set_var("GATEWAY_MQTT_HOST", "mqtt.internal");
        std::env::set_var("GATEWAY_MQTT_PORT", "8883");
        std::env::set_var("GATEWAY_MQTT_USERNAME", "gateway");
        std::env::set_var("GATEWAY_MQTT_PASSWORD", "secret");
        std::env::set_var("GATEWAY_LOG_LEVEL", "warn");
    }

    let config = AppConfig::load().expect("config");
    assert_eq!(config.mqtt_publisher.broker_host, "mqtt.internal");
    assert_eq!(config.mqtt_publisher.broker_port, 8883);
    assert_eq!(
        config.mqtt_publisher.credentials(),
        Some(("gateway", "secret"))
    );
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.sensors.len(), 2);

    unsafe {
        std::env::set_var("GATEWAY_MQTT_PORT", "not-a-port");
    }
    assert!(matches!(
        AppConfig::load(),
        Err(ConfigError::Invalid(ref key, _)) if key == "GATEWAY_MQTT_PORT"
    ));

    unsafe {
        std::env::set_var("GATEWAY_CONFIG", path.with_extension("missing"));
    }
    assert!(matches!(AppConfig::load(), Err(ConfigError::NotFound(_))));

    let _ = std::fs::remove_file(&path);
}
