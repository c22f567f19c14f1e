//! Algorithm results produced by the device

use serde::{Deserialize, Deserializer, Serialize};

use super::{ChannelId, InboundMessage};
use crate::{ConsoleError, Result};

/// One detected object.
///
/// Decodes both device post-processor shapes: `{bbox, score, id, name}` and
/// `{bbox, prob, label, class_name}`, where `label` is the numeric class id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct DetectionBox {
    /// `[x1, y1, x2, y2]` in source video pixels
    pub bbox: [f32; 4],

    /// Class name
    pub label: String,

    /// Numeric class id, when the model reports one
    pub class_id: Option<u32>,

    /// Confidence
    pub score: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireLabel {
    Id(u32),
    Text(String),
}

#[derive(Deserialize)]
struct WireDetection {
    bbox: [f32; 4],
    #[serde(default, alias = "class_name")]
    name: Option<String>,
    /// Class id from the device, class name when re-reading our own output
    #[serde(default)]
    label: Option<WireLabel>,
    #[serde(default, alias = "class_id")]
    id: Option<u32>,
    #[serde(default, alias = "prob")]
    score: f32,
}

impl<'de> Deserialize<'de> for DetectionBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireDetection::deserialize(deserializer).map(Self::from)
    }
}

impl From<WireDetection> for DetectionBox {
    fn from(wire: WireDetection) -> Self {
        let (label_text, label_id) = match wire.label {
            Some(WireLabel::Id(id)) => (None, Some(id)),
            Some(WireLabel::Text(text)) => (Some(text), None),
            None => (None, None),
        };
        Self {
            bbox: wire.bbox,
            label: wire.name.or(label_text).unwrap_or_default(),
            class_id: wire.id.or(label_id),
            score: wire.score,
        }
    }
}

/// Payload of an algorithm result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ResultPayload {
    /// Classification text for the whole frame
    Classification(String),

    /// Bounding boxes for the frame
    Detection(Vec<DetectionBox>),
}

/// Timestamped algorithm result for one channel. Immutable once queued.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmResult {
    /// Channel the result belongs to
    pub channel: ChannelId,

    /// Capture timestamp of the analysed frame (µs, device epoch)
    pub timestamp: u64,

    /// Result payload
    pub payload: ResultPayload,
}

#[derive(Deserialize)]
struct WireResult {
    pipeline: u32,
    timestamp: u64,
    #[serde(default)]
    classification_result: Option<String>,
    #[serde(default)]
    detection_result: Option<Vec<DetectionBox>>,
}

impl AlgorithmResult {
    /// Create a result
    pub fn new(channel: ChannelId, timestamp: u64, payload: ResultPayload) -> Self {
        Self { channel, timestamp, payload }
    }

    /// Decode an algorithm-result message (`kind` 10).
    ///
    /// Exactly one of `classification_result` and `detection_result` must be present.
    pub fn from_message(message: &InboundMessage) -> Result<Self> {
        let wire: WireResult = serde_json::from_value(message.body().clone())?;

        let payload = match (wire.classification_result, wire.detection_result) {
            (Some(text), None) => ResultPayload::Classification(text),
            (None, Some(boxes)) => ResultPayload::Detection(boxes),
            (Some(_), Some(_)) => {
                return Err(ConsoleError::parse(
                    "algorithm result",
                    "both classification_result and detection_result are present",
                ));
            }
            (None, None) => {
                return Err(ConsoleError::parse("algorithm result", "result carries no payload"));
            }
        };

        Ok(Self { channel: ChannelId::new(wire.pipeline), timestamp: wire.timestamp, payload })
    }
}
