//! Wire protocol: AT commands out, framed JSON in.

pub mod command;
pub mod decoder;
pub mod frame;
pub mod normalize;
pub mod trigger;

pub use command::{encode_command, extract_command_name};
pub use decoder::{DecodedFrame, DecoderStats, FrameDecoder, Framing, DEFAULT_MAX_BUFFER_BYTES};
pub use frame::{BoundingBox, ClassScore, Frame, FrameKind, InvokeResult};
pub use normalize::{normalize, Normalized, RawChunk};
pub use trigger::{encode_rules, parse_rules, Condition, RuleError, TriggerRule};
