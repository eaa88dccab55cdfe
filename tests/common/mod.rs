//! Shared test utilities for atlink integration tests.
//!
//! - A connected [`DeviceLink`] over the mock opener, with the device end
//! - Small helpers for reading what the engine wrote

#![allow(dead_code)]

pub mod firmware;

use atlink::port::{MockDevice, MockPortOpener};
use atlink::{DeviceLink, LinkSettings};
use std::sync::Arc;
use std::time::Duration;

/// How long a test waits for the engine to write something.
pub const WRITE_WAIT: Duration = Duration::from_millis(500);

/// A short window used to assert that nothing was written.
pub const SILENCE: Duration = Duration::from_millis(100);

pub struct Rig {
    pub link: Arc<DeviceLink>,
    pub opener: MockPortOpener,
    pub device: MockDevice,
}

/// Settings with a short command timeout so failing tests finish quickly.
pub fn test_settings() -> LinkSettings {
    LinkSettings {
        command_timeout: Duration::from_secs(2),
        ..LinkSettings::default()
    }
}

/// Create a link and connect it to `MOCK0`.
pub async fn connected_rig() -> Rig {
    connected_rig_with(test_settings()).await
}

pub async fn connected_rig_with(settings: LinkSettings) -> Rig {
    let opener = MockPortOpener::new();
    let link = Arc::new(DeviceLink::with_settings(Arc::new(opener.clone()), settings));
    link.connect("MOCK0", 921_600)
        .await
        .expect("mock connect should succeed");
    let device = opener.take_device().expect("mock device should exist");
    Rig {
        link,
        opener,
        device,
    }
}

/// Read the next command or fail the test.
pub async fn expect_command(device: &mut MockDevice) -> String {
    device
        .read_command(WRITE_WAIT)
        .await
        .expect("engine should have written a command")
}

/// Poll until `condition` holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
