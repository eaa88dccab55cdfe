//! Decoded device messages.
//!
//! Every inbound message is a JSON object `{type, name, code, data}`. The
//! `type` field separates command replies from unsolicited events; `data` is
//! command specific and stays a [`serde_json::Value`] until a typed wrapper
//! asks for a concrete shape.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The `type` field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum FrameKind {
    /// `type = 0`: reply to a command.
    Reply,
    /// `type = 1`: unsolicited event such as invoke telemetry.
    Event,
    /// `type = 2`: device log line.
    Log,
    /// Any type this crate does not know about.
    Other(i64),
}

impl From<i64> for FrameKind {
    fn from(value: i64) -> Self {
        match value {
            0 => Self::Reply,
            1 => Self::Event,
            2 => Self::Log,
            other => Self::Other(other),
        }
    }
}

impl From<FrameKind> for i64 {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Reply => 0,
            FrameKind::Event => 1,
            FrameKind::Log => 2,
            FrameKind::Other(other) => other,
        }
    }
}

/// One complete message extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub name: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// `code == 0`.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Whether this frame answers a command with the given correlation key.
    ///
    /// The device echoes the command name back, so equality or containment of
    /// the key in `name` is a match.
    pub fn answers(&self, key: &str) -> bool {
        self.name.contains(key)
    }

    /// Whether this is continuous inference telemetry.
    pub fn is_invoke_event(&self) -> bool {
        self.kind == FrameKind::Event && self.name == "INVOKE"
    }

    /// Interpret `data` as an inference result.
    pub fn invoke_result(&self) -> Result<InvokeResult, serde_json::Error> {
        InvokeResult::deserialize(&self.data)
    }
}

/// Payload of an `INVOKE` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeResult {
    /// Base64 JPEG of the analysed frame, absent in result-only mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(default, deserialize_with = "deserialize_classes")]
    pub classes: Vec<ClassScore>,
}

impl InvokeResult {
    /// The detection with the highest score, if any.
    pub fn best_box(&self) -> Option<&BoundingBox> {
        self.boxes
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// A detection, sent on the wire as `[x, y, w, h, score, classId]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub score: f64,
    pub class_id: i64,
}

impl From<[f64; 6]> for BoundingBox {
    fn from([x, y, w, h, score, class_id]: [f64; 6]) -> Self {
        Self {
            x,
            y,
            w,
            h,
            score,
            class_id: class_id as i64,
        }
    }
}

impl From<BoundingBox> for [f64; 6] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.w, b.h, b.score, b.class_id as f64]
    }
}

/// Classification score for one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub score: f64,
    pub class_id: i64,
}

/// `classes` arrives either as a plain score vector (index = class id) or as
/// `[score, classId]` pairs.
#[derive(Deserialize)]
#[serde(untagged)]
enum ClassEntry {
    Pair([f64; 2]),
    Score(f64),
    Named(ClassScore),
}

fn deserialize_classes<'de, D>(deserializer: D) -> Result<Vec<ClassScore>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<ClassEntry>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            ClassEntry::Pair([score, class_id]) => ClassScore {
                score,
                class_id: class_id as i64,
            },
            ClassEntry::Score(score) => ClassScore {
                score,
                class_id: index as i64,
            },
            ClassEntry::Named(named) => named,
        })
        .collect())
}
