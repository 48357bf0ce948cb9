//! Lossy 8-bit quantization of embedding vectors.
//!
//! Each component maps to `round((x - min) * 255 / (max - min))`. Decoding
//! reverses the affine map, so the per-component reconstruction error is at
//! most `(max - min) / 255`. A constant vector (`max == min`) quantizes to
//! all zeros and decodes back to the constant exactly. The range is taken
//! in `f64` so bounds near `f32::MAX` do not overflow.

use kgrag_core::{CodecError, QuantizedEmbedding};

const LEVELS: f64 = 255.0;

/// Quantize a vector to one byte per component.
#[must_use]
pub fn encode(vector: &[f32]) -> QuantizedEmbedding {
    let (min, max) = bounds(vector);
    let values = if max > min {
        let scale = LEVELS / (f64::from(max) - f64::from(min));
        vector
            .iter()
            .map(|&x| {
                ((f64::from(x) - f64::from(min)) * scale)
                    .round()
                    .clamp(0.0, LEVELS) as u8
            })
            .collect()
    } else {
        vec![0; vector.len()]
    };

    QuantizedEmbedding {
        values,
        min,
        max,
        shape: vec![vector.len()],
    }
}

/// Reconstruct a vector from its quantized bytes and bounds.
#[must_use]
pub fn decode(values: &[u8], min: f32, max: f32) -> Vec<f32> {
    if max <= min {
        return vec![min; values.len()];
    }
    let step = (f64::from(max) - f64::from(min)) / LEVELS;
    values
        .iter()
        .map(|&q| (f64::from(q) * step + f64::from(min)) as f32)
        .collect()
}

/// Decode a stored embedding after checking it is well formed and has the
/// expected dimension.
///
/// # Errors
///
/// Returns [`CodecError`] when the shape does not describe the stored
/// bytes, the dimension differs from `expected_dim`, or the bounds are not
/// finite.
pub fn decode_checked(
    embedding: &QuantizedEmbedding,
    expected_dim: usize,
) -> Result<Vec<f32>, CodecError> {
    let len = embedding.values.len();
    if embedding.shape.iter().product::<usize>() != len {
        return Err(CodecError::ShapeMismatch {
            shape: embedding.shape.clone(),
            len,
        });
    }
    if len != expected_dim {
        return Err(CodecError::DimensionMismatch {
            expected: expected_dim,
            actual: len,
        });
    }
    if !embedding.min.is_finite() || !embedding.max.is_finite() {
        return Err(CodecError::NonFiniteBounds {
            min: embedding.min,
            max: embedding.max,
        });
    }
    Ok(decode(&embedding.values, embedding.min, embedding.max))
}

fn bounds(vector: &[f32]) -> (f32, f32) {
    let finite = vector.iter().copied().filter(|x| x.is_finite());
    let (min, max) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), x| {
        (lo.min(x), hi.max(x))
    });
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}
