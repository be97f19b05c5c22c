use super::reader::{apply_deadzone, map_axis, unpack_buttons};
use super::*;
use crate::config::ControllerConfig;
use std::time::Duration;

fn test_config() -> ControllerConfig {
    ControllerConfig {
        device: "mock".to_string(),
        deadzone: 0.05,
        stale_timeout_ms: 500,
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F, max: Duration) -> bool {
    let deadline = std::time::Instant::now() + max;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[test]
fn test_axis_mapping_bounded() {
    // Every raw byte maps inside [-1, 1]
    for raw in 0..=255u8 {
        let mapped = map_axis(raw);
        assert!((-1.0..=1.0).contains(&mapped), "raw {} -> {}", raw, mapped);
    }

    assert_eq!(map_axis(128), 0.0);
    assert_eq!(map_axis(255), 1.0);
    assert_eq!(map_axis(0), -1.0); // clamped from -128/127
}

#[test]
fn test_deadzone_zeroes_small_inputs() {
    assert_eq!(apply_deadzone(0.01, 0.01, 0.05), (0.0, 0.0));
    assert_eq!(apply_deadzone(0.0, 0.049, 0.05), (0.0, 0.0));

    // On or outside the radius the input passes through untouched
    assert_eq!(apply_deadzone(0.05, 0.0, 0.05), (0.05, 0.0));
    assert_eq!(apply_deadzone(0.5, -0.5, 0.05), (0.5, -0.5));
}

#[test]
fn test_button_nibble_extraction() {
    assert_eq!(unpack_buttons(0x00), [false; 4]);
    assert_eq!(unpack_buttons(0x08), [false; 4]); // low nibble is ignored
    assert_eq!(unpack_buttons(0x10), [true, false, false, false]);
    assert_eq!(unpack_buttons(0x20), [false, true, false, false]);
    assert_eq!(unpack_buttons(0x48), [false, false, true, false]);
    assert_eq!(unpack_buttons(0x80), [false, false, false, true]);
    assert_eq!(unpack_buttons(0xF0), [true; 4]);
}

#[tokio::test]
async fn test_snapshot_neutral_before_start() {
    let reader = ControllerReader::new(
        Box::new(MockDeviceTransport::centered()),
        &test_config(),
    );

    let snap = reader.snapshot();
    assert_eq!(snap.left_stick, (0.0, 0.0));
    assert_eq!(snap.right_stick, (0.0, 0.0));
    assert_eq!(snap.buttons, [false; 4]);
    assert!(snap.age.is_none());
    assert!(snap.is_stale(Duration::from_millis(500)));
}

#[tokio::test]
async fn test_poll_loop_publishes_reports() {
    // Full right deflection on left stick X, stage button held
    let transport = MockDeviceTransport::new(vec![ScriptStep::Report([255, 128, 127, 127, 0x10])]);
    let mut reader = ControllerReader::new(Box::new(transport), &test_config());
    reader.start().unwrap();

    assert!(
        wait_for(|| reader.snapshot().buttons[0], Duration::from_secs(1)).await,
        "snapshot never reflected the scripted report"
    );

    let snap = reader.snapshot();
    assert_eq!(snap.left_stick.0, 1.0);
    assert_eq!(snap.left_stick.1, 0.0);
    assert!(!snap.is_stale(Duration::from_millis(500)));

    reader.stop().await;
}

#[tokio::test]
async fn test_y_axis_inverted() {
    // Raw 0 is stick pushed up; mapped Y must come out positive
    let transport = MockDeviceTransport::new(vec![ScriptStep::Report([127, 0, 127, 255, 8])]);
    let mut reader = ControllerReader::new(Box::new(transport), &test_config());
    reader.start().unwrap();

    assert!(
        wait_for(
            || reader.snapshot().left_stick.1 > 0.5,
            Duration::from_secs(1)
        )
        .await
    );

    let snap = reader.snapshot();
    assert_eq!(snap.left_stick.1, 1.0);
    assert_eq!(snap.right_stick.1, -1.0);

    reader.stop().await;
}

#[tokio::test]
async fn test_stop_resets_to_neutral() {
    let transport = MockDeviceTransport::new(vec![ScriptStep::Report([255, 255, 255, 255, 0xF8])]);
    let mut reader = ControllerReader::new(Box::new(transport), &test_config());
    reader.start().unwrap();

    assert!(wait_for(|| reader.snapshot().buttons[3], Duration::from_secs(1)).await);

    reader.stop().await;

    let snap = reader.snapshot();
    assert_eq!(snap.left_stick, (0.0, 0.0));
    assert_eq!(snap.buttons, [false; 4]);

    // Second stop is a no-op
    reader.stop().await;
}

#[tokio::test]
async fn test_device_error_marks_faulted() {
    let transport = MockDeviceTransport::new(vec![
        ScriptStep::Report([127, 127, 127, 127, 8]),
        ScriptStep::Disconnect,
    ]);
    let mut reader = ControllerReader::new(Box::new(transport), &test_config());
    reader.start().unwrap();

    assert!(
        wait_for(|| reader.is_faulted(), Duration::from_secs(1)).await,
        "reader never latched the fault"
    );

    reader.stop().await;
}

#[tokio::test]
async fn test_start_drains_buffered_reports() {
    let transport = MockDeviceTransport::new(vec![ScriptStep::Report([127, 127, 127, 127, 8])])
        .with_buffered(vec![[255, 255, 255, 255, 0xF0]; 3]);
    let mut reader = ControllerReader::new(Box::new(transport), &test_config());

    // The buffered (stale) reports must never surface as state
    reader.start().unwrap();
    assert!(
        wait_for(
            || reader.snapshot().age.is_some(),
            Duration::from_secs(1)
        )
        .await
    );
    assert_eq!(reader.snapshot().buttons, [false; 4]);

    reader.stop().await;
}

#[tokio::test]
async fn test_double_start_fails() {
    let mut reader = ControllerReader::new(
        Box::new(MockDeviceTransport::centered()),
        &test_config(),
    );
    reader.start().unwrap();
    assert!(reader.start().is_err());
    reader.stop().await;
}
