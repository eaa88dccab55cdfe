//! Typed device commands.
//!
//! Each method wraps one AT command: it builds the text, validates arguments
//! before anything is written, issues it through the command queue and turns
//! the reply into a Rust value. A reply with a nonzero `code` becomes
//! [`LinkError::Device`].

use crate::error::{LinkError, LinkResult};
use crate::link::DeviceLink;
use crate::protocol::command::{exec, query, set};
use crate::protocol::{encode_rules, parse_rules, Frame, InvokeResult, TriggerRule};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Currently loaded model, as reported by `AT+MODEL?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: Option<i64>,
    #[serde(default)]
    pub address: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Base64 model metadata, when the firmware has any.
    #[serde(default)]
    pub info: Option<String>,
}

/// Active camera sensor, as reported by `AT+SENSOR?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: Option<i64>,
    #[serde(default)]
    pub state: Option<i64>,
    #[serde(default)]
    pub opt_id: Option<i64>,
    /// Human readable sensor mode, e.g. `240x240 Auto`.
    #[serde(default)]
    pub opt_detail: Option<String>,
}

/// Firmware and board revision from `AT+VER?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub at_api: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub software: String,
    #[serde(deserialize_with = "lenient_string")]
    pub hardware: String,
}

/// Arguments of `AT+INVOKE=<times>,<differed>,<result_only>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Number of inference rounds; `-1` runs until stopped.
    pub times: i32,
    /// Only report results that differ from the previous round.
    pub on_change_only: bool,
    /// Leave the image out of each result.
    pub result_only: bool,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            times: -1,
            on_change_only: false,
            result_only: false,
        }
    }
}

impl InvokeOptions {
    pub fn command(&self) -> String {
        set(
            "INVOKE",
            format_args!(
                "{},{},{}",
                self.times,
                u8::from(self.on_change_only),
                u8::from(self.result_only)
            ),
        )
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Fail with `Device` unless the reply reports success.
fn ensure_ok(command: &str, frame: Frame) -> LinkResult<Frame> {
    if frame.is_ok() {
        Ok(frame)
    } else {
        Err(LinkError::Device {
            command: command.to_string(),
            code: frame.code,
        })
    }
}

fn unexpected(command: &str, reason: impl Into<String>) -> LinkError {
    LinkError::UnexpectedPayload {
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// Deserialize `data`, looking inside `{ key: ... }` when the firmware wraps it.
fn expect_data<T: DeserializeOwned>(command: &str, data: &Value, key: &str) -> LinkResult<T> {
    let inner = data.get(key).unwrap_or(data);
    T::deserialize(inner).map_err(|e| unexpected(command, e.to_string()))
}

fn expect_string(command: &str, data: &Value) -> LinkResult<String> {
    match data {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(unexpected(command, format!("expected a string, got {other}"))),
    }
}

fn expect_integer(command: &str, data: &Value) -> LinkResult<i64> {
    let value = match data {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    value.ok_or_else(|| unexpected(command, format!("expected an integer, got {data}")))
}

fn expect_percent(command: &str, data: &Value) -> LinkResult<u8> {
    let value = expect_integer(command, data)?;
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| unexpected(command, format!("threshold {value} outside 0-100")))
}

fn check_percent(what: &str, value: u8) -> LinkResult<()> {
    if value > 100 {
        return Err(LinkError::InvalidArgument(format!(
            "{what} must be between 0 and 100, got {value}"
        )));
    }
    Ok(())
}

impl DeviceLink {
    async fn checked(&self, command: &str) -> LinkResult<Frame> {
        let frame = self.send_command(command).await?;
        ensure_ok(command, frame)
    }

    /// Detection score threshold, 0-100.
    pub async fn score_threshold(&self) -> LinkResult<u8> {
        let command = query("TSCORE");
        let frame = self.checked(&command).await?;
        expect_percent(&command, &frame.data)
    }

    pub async fn set_score_threshold(&self, value: u8) -> LinkResult<()> {
        check_percent("score threshold", value)?;
        self.checked(&set("TSCORE", value)).await?;
        Ok(())
    }

    /// Non-maximum-suppression IoU threshold, 0-100.
    pub async fn iou_threshold(&self) -> LinkResult<u8> {
        let command = query("TIOU");
        let frame = self.checked(&command).await?;
        expect_percent(&command, &frame.data)
    }

    pub async fn set_iou_threshold(&self, value: u8) -> LinkResult<()> {
        check_percent("IoU threshold", value)?;
        self.checked(&set("TIOU", value)).await?;
        Ok(())
    }

    /// Transport the device reports results on when it boots.
    pub async fn default_transport(&self) -> LinkResult<i64> {
        let command = query("TRANSPORT");
        let frame = self.checked(&command).await?;
        expect_integer(&command, &frame.data)
    }

    pub async fn set_default_transport(&self, transport: u32) -> LinkResult<()> {
        self.checked(&set("TRANSPORT", transport)).await?;
        Ok(())
    }

    pub async fn model(&self) -> LinkResult<ModelInfo> {
        let command = query("MODEL");
        let frame = self.checked(&command).await?;
        expect_data(&command, &frame.data, "model")
    }

    /// Load the model stored under `id`.
    pub async fn set_model(&self, id: u32) -> LinkResult<()> {
        self.checked(&set("MODEL", id)).await?;
        info!(model = id, "model selected");
        Ok(())
    }

    pub async fn sensor(&self) -> LinkResult<SensorInfo> {
        let command = query("SENSOR");
        let frame = self.checked(&command).await?;
        expect_data(&command, &frame.data, "sensor")
    }

    pub async fn device_id(&self) -> LinkResult<String> {
        let command = query("ID");
        let frame = self.checked(&command).await?;
        expect_string(&command, &frame.data)
    }

    pub async fn device_name(&self) -> LinkResult<String> {
        let command = query("NAME");
        let frame = self.checked(&command).await?;
        expect_string(&command, &frame.data)
    }

    pub async fn version(&self) -> LinkResult<VersionInfo> {
        let command = query("VER");
        let frame = self.checked(&command).await?;
        expect_data(&command, &frame.data, "version")
    }

    /// Start continuous inference and hand every result to `on_result`.
    ///
    /// The telemetry subscription is installed before the command is written,
    /// so the first result is never missed. It stays active until
    /// [`stop_all_tasks`](Self::stop_all_tasks), a disconnect, or another
    /// `start_invoke`. If the device refuses the command the subscription is
    /// removed again, unless a later `start_invoke` has already replaced it.
    pub async fn start_invoke<F>(&self, options: InvokeOptions, mut on_result: F) -> LinkResult<()>
    where
        F: FnMut(InvokeResult) + Send + 'static,
    {
        let handle = self.subscribe_frames(move |event| {
            if !event.frame.is_invoke_event() {
                return;
            }
            match event.frame.invoke_result() {
                Ok(result) => on_result(result),
                Err(e) => warn!("dropping malformed invoke result: {e}"),
            }
        });
        let generation = self.replace_invoke(handle);

        let command = options.command();
        match self.checked(&command).await {
            Ok(_) => {
                debug!(command = %command, "invoke started");
                Ok(())
            }
            Err(e) => {
                self.stop_invoke_generation(generation);
                Err(e)
            }
        }
    }

    /// Stop telemetry delivery and tell the device to halt its task.
    ///
    /// Delivery stops before this returns, even when the device is no longer
    /// connected.
    pub async fn stop_all_tasks(&self) -> LinkResult<()> {
        if self.stop_invoke() {
            debug!("invoke subscription stopped");
        }
        if !self.is_connected() {
            return Ok(());
        }
        self.checked(&exec("BREAK")).await?;
        Ok(())
    }

    /// Replace the device's GPIO trigger rules.
    ///
    /// Every rule is validated first; nothing is written if any is invalid.
    pub async fn set_trigger_rules(&self, rules: &[TriggerRule]) -> LinkResult<()> {
        for rule in rules {
            rule.validate()?;
        }
        let command = set("TRIGGER", format_args!("\"{}\"", encode_rules(rules)));
        self.checked(&command).await?;
        Ok(())
    }

    pub async fn trigger_rules(&self) -> LinkResult<Vec<TriggerRule>> {
        let command = query("TRIGGER");
        let frame = self.checked(&command).await?;
        let text = match &frame.data {
            Value::Null => return Ok(Vec::new()),
            data => expect_string(&command, data)?,
        };
        parse_rules(&text).map_err(|e| unexpected(&command, e.to_string()))
    }

    /// Restart the device. The device does not answer, so nothing is awaited.
    pub async fn reboot(&self) -> LinkResult<()> {
        self.send_raw(&exec("RST")).await
    }
}
