//! Tagged messages pushed by the driver.
//!
//! Each frame payload is one JSON object whose `t` field selects the variant:
//!
//! ```text
//! {"t": "d", "frame": [[1.0, 2.0], [3.0, 4.0]], "timestamp": [100.0]}
//! {"t": "e", "message": "device disconnected"}
//! ```
//!
//! `frame` and `timestamp` may be a bare number or a nested array of any
//! depth; both decode to [`ArrayD<f64>`] whose rank is explicit.

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedMessage;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t")]
enum WireMessage {
    #[serde(rename = "d")]
    Data { frame: Value, timestamp: Value },
    #[serde(rename = "e")]
    Event { message: String },
}

/// Readings for one sample, or a chunk of samples, plus clock values.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub frame: ArrayD<f64>,
    pub timestamp: ArrayD<f64>,
}

impl DataMessage {
    /// Rank of the frame as sent by the driver.
    pub fn rank(&self) -> usize {
        self.frame.ndim()
    }

    /// Number of samples the message carries, see [`DataMessage::into_samples`].
    pub fn sample_count(&self) -> usize {
        if self.is_chunk() {
            self.frame.len_of(Axis(0))
        } else {
            1
        }
    }

    /// Split the message into `(sample, clock value)` pairs.
    ///
    /// A message is a chunk of `k` samples when its timestamp has rank 2 or
    /// more and both timestamp and frame have `k` rows; each frame row is a
    /// sample stamped with the first element of the matching timestamp row.
    /// Any other message is a single sample stamped with the first element
    /// of its timestamp. Returns `None` if a clock value is missing.
    pub fn into_samples(self) -> Option<Vec<(ArrayD<f64>, f64)>> {
        if !self.is_chunk() {
            let clock = self.timestamp.iter().next().copied()?;
            return Some(vec![(self.frame, clock)]);
        }

        self.frame
            .outer_iter()
            .zip(self.timestamp.outer_iter())
            .map(|(row, stamp)| Some((row.to_owned(), stamp.iter().next().copied()?)))
            .collect()
    }

    fn is_chunk(&self) -> bool {
        self.timestamp.ndim() >= 2
            && self.frame.ndim() >= 1
            && self.frame.len_of(Axis(0)) == self.timestamp.len_of(Axis(0))
    }
}

/// Out-of-band text from the driver (end of stream or fault).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub text: String,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Data(DataMessage),
    Event(EventMessage),
}

impl InboundMessage {
    /// Build a data message.
    pub fn data(frame: ArrayD<f64>, timestamp: ArrayD<f64>) -> Self {
        Self::Data(DataMessage { frame, timestamp })
    }

    /// Build an event message.
    pub fn event(text: impl Into<String>) -> Self {
        Self::Event(EventMessage { text: text.into() })
    }

    /// Decode a frame payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, MalformedMessage> {
        match serde_json::from_slice::<WireMessage>(payload)? {
            WireMessage::Data { frame, timestamp } => Ok(Self::Data(DataMessage {
                frame: array_from_json(&frame)?,
                timestamp: array_from_json(&timestamp)?,
            })),
            WireMessage::Event { message } => Ok(Self::Event(EventMessage { text: message })),
        }
    }

    /// Encode as a frame payload.
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        let wire = match self {
            Self::Data(data) => WireMessage::Data {
                frame: array_to_json(data.frame.view()),
                timestamp: array_to_json(data.timestamp.view()),
            },
            Self::Event(event) => WireMessage::Event {
                message: event.text.clone(),
            },
        };
        serde_json::to_vec(&wire)
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }
}

/// Convert a number or nested JSON array into an n-dimensional array.
///
/// The shape is taken from the first element at every depth, and every
/// sibling must match it. Storage grows with the numbers actually present,
/// never with the guessed shape.
pub fn array_from_json(value: &Value) -> Result<ArrayD<f64>, MalformedMessage> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut values = Vec::new();
    flatten(value, 0, &shape, &mut values)?;

    ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|err| MalformedMessage::Shape(err.to_string()))
}

fn flatten(
    value: &Value,
    depth: usize,
    shape: &[usize],
    out: &mut Vec<f64>,
) -> Result<(), MalformedMessage> {
    if depth == shape.len() {
        return match value.as_f64() {
            Some(number) => {
                out.push(number);
                Ok(())
            }
            None => Err(MalformedMessage::Shape(format!(
                "expected a number at depth {depth}, got {value}"
            ))),
        };
    }

    match value {
        Value::Array(items) if items.len() == shape[depth] => {
            for item in items {
                flatten(item, depth + 1, shape, out)?;
            }
            Ok(())
        }
        Value::Array(items) => Err(MalformedMessage::Shape(format!(
            "ragged array: expected {} elements at depth {depth}, got {}",
            shape[depth],
            items.len()
        ))),
        other => Err(MalformedMessage::Shape(format!(
            "expected an array at depth {depth}, got {other}"
        ))),
    }
}

/// Convert an n-dimensional array back into nested JSON.
pub fn array_to_json(array: ArrayViewD<'_, f64>) -> Value {
    if array.ndim() == 0 {
        return array.iter().next().map_or(Value::Null, |x| serde_json::json!(x));
    }
    Value::Array(array.outer_iter().map(array_to_json).collect())
}
