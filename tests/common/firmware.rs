//! A scripted stand-in for the device firmware.

use atlink::port::MockDevice;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Reply to send for a command: `(name, code, data)`.
pub type Answer = (String, i64, Value);

/// Answer every command the engine writes using `answer`, until the engine
/// closes the port or stays quiet for five seconds. Commands `answer`
/// returns `None` for are left unanswered.
pub fn spawn_firmware<F>(mut device: MockDevice, answer: F) -> JoinHandle<Vec<String>>
where
    F: Fn(&str) -> Option<Answer> + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(command) = device.read_command(Duration::from_secs(5)).await {
            let reply = answer(&command);
            seen.push(command);
            if let Some((name, code, data)) = reply {
                if device.reply(&name, code, data).await.is_err() {
                    break;
                }
            }
        }
        seen
    })
}
