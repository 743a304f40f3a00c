use domain::{
    CollectorFamily, CollectorParams, NmeaSensorParams, PublishParams, ReadingStatus, SensorSpec,
};
use std::time::Duration;

fn rot_sensor() -> SensorSpec {
    SensorSpec {
        id: "rot-1".to_string(),
        name: "Rate of turn".to_string(),
        collector: CollectorParams::Nmea(NmeaSensorParams {
            expected_talker_id: "HE".to_string(),
            expected_sentence_type: "ROT".to_string(),
            value_field: 0,
        }),
        publish: PublishParams {
            topic_suffix: Some("rot".to_string()),
            unit: "deg/min".to_string(),
            change_threshold: 0.5,
            min_publish_interval: Some(Duration::from_secs(60)),
        },
    }
}

#[test]
fn sensor_reading_carries_publish_params() {
    let sensor = rot_sensor();
    assert_eq!(sensor.family(), CollectorFamily::Nmea);

    let reading = sensor.valid_reading(3.5);
    assert_eq!(reading.sensor_id, "rot-1");
    assert_eq!(reading.value, Some(3.5));
    assert_eq!(reading.unit, "deg/min");
    assert_eq!(reading.topic_suffix.as_deref(), Some("rot"));
    assert_eq!(reading.change_threshold, 0.5);
    assert_eq!(reading.min_publish_interval, Some(Duration::from_secs(60)));
    assert!(reading.is_valid());
}

#[test]
fn invalid_reading_value_is_unusable() {
    let sensor = rot_sensor();
    let reading = sensor.reading(Some(7.0), ReadingStatus::Invalid);
    assert_eq!(reading.value, Some(7.0));
    assert_eq!(reading.usable_value(), None);

    let reading = sensor.invalid_reading();
    assert_eq!(reading.value, None);
    assert_eq!(reading.status, ReadingStatus::Invalid);
}
