use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use crate::endpoint::MessageSource;
use crate::message::InboundMessage;
use crate::shape;

/// Everything collected by one drain cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
    /// Normally (channel, time). Degenerate driver output keeps its stacked
    /// rank, see [`crate::shape`].
    pub data: ArrayD<f64>,
    /// One clock value per sample, in arrival order.
    pub timestamps: Vec<f64>,
    /// Event texts received in this cycle, in arrival order.
    pub messages: Vec<String>,
}

impl FrameBatch {
    /// A batch with no samples; `data` is (channel_count, 0).
    pub fn empty(channel_count: usize, messages: Vec<String>) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(&[channel_count, 0])),
            timestamps: Vec::new(),
            messages,
        }
    }

    /// Number of samples (N) in the batch.
    pub fn sample_count(&self) -> usize {
        self.timestamps.len()
    }

    /// Channel count when the batch has the (channel, time) layout.
    pub fn channel_count(&self) -> Option<usize> {
        (self.data.ndim() == 2).then(|| self.data.shape()[0])
    }

    pub fn rank(&self) -> usize {
        self.data.ndim()
    }

    /// True when no data frame arrived in the cycle.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Split into `(matrix, timestamps, messages)`.
    pub fn into_parts(self) -> (ArrayD<f64>, Vec<f64>, Vec<String>) {
        (self.data, self.timestamps, self.messages)
    }
}

/// Drains a [`MessageSource`] into [`FrameBatch`]es.
#[derive(Debug)]
pub struct FrameBatcher {
    channel_count: usize,
    dropped: u64,
}

impl FrameBatcher {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count,
            dropped: 0,
        }
    }

    /// Sweep everything currently available from `source`.
    ///
    /// Returns the batch and whether the cycle was terminal, i.e. at least
    /// one event message arrived. Never blocks: the sweep ends at the first
    /// empty receive.
    pub fn drain<S: MessageSource + ?Sized>(&mut self, source: &mut S) -> (FrameBatch, bool) {
        let mut frames: Vec<ArrayD<f64>> = Vec::new();
        let mut timestamps = Vec::new();
        let mut messages = Vec::new();
        let mut terminal = false;

        loop {
            match source.try_receive() {
                Ok(None) => break,
                Ok(Some(InboundMessage::Event(event))) => {
                    debug!(message = %event.text, "driver event");
                    messages.push(event.text);
                    terminal = true;
                }
                Ok(Some(InboundMessage::Data(data))) => {
                    let Some(samples) = data.into_samples() else {
                        self.drop_message(format_args!("missing timestamp value"));
                        continue;
                    };
                    // Stacking needs one sample shape per cycle; the first sample sets it.
                    let expected = frames.first().map(|f| f.shape().to_vec());
                    if let (Some(expected), Some((sample, _))) = (expected, samples.first()) {
                        if expected != sample.shape() {
                            self.drop_message(format_args!(
                                "sample shape {:?} differs from {:?}",
                                sample.shape(),
                                expected
                            ));
                            continue;
                        }
                    }
                    for (sample, clock) in samples {
                        frames.push(sample);
                        timestamps.push(clock);
                    }
                }
                Err(err) => self.drop_message(format_args!("{err}")),
            }
        }

        if frames.is_empty() {
            return (FrameBatch::empty(self.channel_count, messages), terminal);
        }

        let data = match shape::stack(&frames) {
            Ok(stacked) => shape::normalize(stacked),
            Err(err) => {
                // Unreachable while every frame shares the first frame's shape.
                for _ in 0..frames.len() {
                    self.drop_message(format_args!("stacking failed: {err}"));
                }
                return (FrameBatch::empty(self.channel_count, messages), terminal);
            }
        };

        debug!(
            samples = timestamps.len(),
            shape = ?data.shape(),
            terminal,
            "drained batch"
        );

        (
            FrameBatch {
                data,
                timestamps,
                messages,
            },
            terminal,
        )
    }

    /// Total messages dropped as malformed since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn drop_message(&mut self, reason: std::fmt::Arguments<'_>) {
        self.dropped = self.dropped.saturating_add(1);
        debug!(%reason, dropped = self.dropped, "dropping malformed message");
    }
}
