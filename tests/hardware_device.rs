//! Tests against a real board.
//!
//! Ignored by default. Run with:
//! `ATLINK_TEST_PORT=/dev/ttyACM0 cargo test --features hardware-tests -- --ignored`

#![cfg(feature = "hardware-tests")]

use atlink::{DeviceLink, LinkSettings};
use serial_test::serial;
use std::env;
use std::time::Duration;

struct TestPortConfig {
    port_name: String,
    baud_rate: u32,
}

impl TestPortConfig {
    fn from_env() -> Option<Self> {
        let port_name = env::var("ATLINK_TEST_PORT").ok()?;
        let baud_rate = env::var("ATLINK_TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(921_600);
        Some(Self {
            port_name,
            baud_rate,
        })
    }
}

async fn connect() -> Option<DeviceLink> {
    let Some(config) = TestPortConfig::from_env() else {
        eprintln!("ATLINK_TEST_PORT not set, skipping");
        return None;
    };
    let link = DeviceLink::serial(LinkSettings::default());
    link.connect(&config.port_name, config.baud_rate)
        .await
        .expect("failed to open test port");
    Some(link)
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_real_device_identity() {
    let Some(link) = connect().await else { return };

    let id = link.device_id().await.expect("AT+ID? failed");
    assert!(!id.is_empty());
    let version = link.version().await.expect("AT+VER? failed");
    assert!(!version.software.is_empty());

    link.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_real_device_threshold_round_trip() {
    let Some(link) = connect().await else { return };

    let original = link.score_threshold().await.unwrap();
    let probe = if original == 50 { 51 } else { 50 };
    link.set_score_threshold(probe).await.unwrap();
    assert_eq!(link.score_threshold().await.unwrap(), probe);
    link.set_score_threshold(original).await.unwrap();

    link.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_real_device_invoke_produces_results() {
    let Some(link) = connect().await else { return };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    link.start_invoke(Default::default(), move |result| {
        let _ = tx.send(result);
    })
    .await
    .expect("AT+INVOKE failed");

    let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no invoke result within 10s");
    assert!(first.is_some());

    link.stop_all_tasks().await.unwrap();
    link.disconnect().await.unwrap();
}
