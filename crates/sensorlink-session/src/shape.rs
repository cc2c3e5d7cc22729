//! Shape normalization for stacked frames.
//!
//! Frames collected in one drain are stacked along a new leading time axis
//! and then normalized by the rank of the stacked array:
//!
//! | stacked rank | axes                  | result                         |
//! |--------------|-----------------------|--------------------------------|
//! | 3            | (time, channel, lead) | lead 0 only, as (channel, time)|
//! | 2            | (time, channel)       | (channel, time)                |
//! | other        | any                   | unchanged                      |

use ndarray::{ArrayD, Axis, IxDyn, ShapeError};

/// Maps a stacked array of one rank to the (channel, time) layout.
pub type Normalizer = fn(ArrayD<f64>) -> ArrayD<f64>;

const NORMALIZERS: &[(usize, Normalizer)] = &[
    (2, channels_first as Normalizer),
    (3, first_lead_channels_first as Normalizer),
];

/// Look up the normalizer for a stacked rank.
pub fn normalizer_for(rank: usize) -> Option<Normalizer> {
    NORMALIZERS
        .iter()
        .find(|(r, _)| *r == rank)
        .map(|(_, normalizer)| *normalizer)
}

/// Normalize a stacked array through the rank-dispatch table.
pub fn normalize(stacked: ArrayD<f64>) -> ArrayD<f64> {
    match normalizer_for(stacked.ndim()) {
        Some(normalizer) => normalizer(stacked),
        None => stacked,
    }
}

/// Stack equally-shaped frames along a new leading time axis.
pub fn stack(frames: &[ArrayD<f64>]) -> Result<ArrayD<f64>, ShapeError> {
    let frame_shape = frames.first().map(|f| f.shape().to_vec()).unwrap_or_default();

    let mut shape = Vec::with_capacity(frame_shape.len() + 1);
    shape.push(frames.len());
    shape.extend_from_slice(&frame_shape);

    let values: Vec<f64> = frames.iter().flat_map(|f| f.iter().copied()).collect();
    ArrayD::from_shape_vec(IxDyn(&shape), values)
}

/// (time, channel) -> (channel, time)
fn channels_first(stacked: ArrayD<f64>) -> ArrayD<f64> {
    stacked.reversed_axes().as_standard_layout().into_owned()
}

/// (time, channel, lead) -> (channel, time) using lead 0.
fn first_lead_channels_first(stacked: ArrayD<f64>) -> ArrayD<f64> {
    if stacked.len_of(Axis(2)) == 0 {
        return stacked;
    }
    stacked
        .index_axis(Axis(2), 0)
        .reversed_axes()
        .as_standard_layout()
        .into_owned()
}
