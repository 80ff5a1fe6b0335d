//! Chunk and buffer shape selection under byte budgets.
//!
//! A chunk is the unit the storage backend compresses and addresses; a buffer
//! is the in-memory block read from a source in one go and always spans whole
//! chunks. All functions here are pure.

use serde::{Deserialize, Serialize};

/// Default byte budget of a single chunk (~1 MB).
pub const DEFAULT_CHUNK_BYTE_BUDGET: u64 = 1_000_000;

/// Default byte budget of a single in-memory buffer (~1 GB).
pub const DEFAULT_BUFFER_BYTE_BUDGET: u64 = 1_000_000_000;

/// Default channel cap of [`ChunkShapePolicy::ChannelCapped`].
pub const DEFAULT_MAX_CHUNK_CHANNELS: u64 = 64;

/// How default chunk shapes are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChunkShapePolicy {
    /// Keep the aspect ratio of the full shape, see [`default_chunk_shape`].
    #[default]
    AspectRatio,
    /// Time-by-channel series: cap the channel axis and fill the budget along
    /// the time axis, see [`channel_capped_chunk_shape`].
    ///
    /// Arrays that are not two-dimensional fall back to [`ChunkShapePolicy::AspectRatio`].
    ChannelCapped { max_channels: u64 },
}

impl ChunkShapePolicy {
    pub fn channel_capped() -> Self {
        Self::ChannelCapped {
            max_channels: DEFAULT_MAX_CHUNK_CHANNELS,
        }
    }

    /// Compute a chunk shape for an array of `full_shape` under this policy.
    pub fn chunk_shape(
        &self,
        full_shape: &[u64],
        itemsize: u64,
        chunk_byte_budget: u64,
    ) -> crate::Result<Vec<u64>> {
        match self {
            ChunkShapePolicy::ChannelCapped { max_channels } if full_shape.len() == 2 => {
                channel_capped_chunk_shape(full_shape, itemsize, chunk_byte_budget, *max_channels)
            }
            _ => default_chunk_shape(full_shape, itemsize, chunk_byte_budget),
        }
    }
}

fn product(shape: &[u64]) -> u128 {
    shape
        .iter()
        .fold(1u128, |acc, &n| acc.saturating_mul(u128::from(n)))
}

/// Number of bytes occupied by an array of `shape`.
pub fn shape_bytes(shape: &[u64], itemsize: u64) -> u128 {
    product(shape).saturating_mul(u128::from(itemsize))
}

/// Largest `k` with `k^n <= value`.
fn integer_nth_root(value: u128, n: u32) -> u64 {
    if value == 0 {
        return 0;
    }
    let pow = |k: u128| k.checked_pow(n).unwrap_or(u128::MAX);
    let mut k = (value as f64).powf(1.0 / f64::from(n)).floor() as u128;
    while k > 0 && pow(k) > value {
        k -= 1;
    }
    while pow(k + 1) <= value {
        k += 1;
    }
    u64::try_from(k).unwrap_or(u64::MAX)
}

fn check_budget(what: &str, budget: u64) -> crate::Result<()> {
    if budget == 0 {
        return Err(crate::Error::configuration(format!(
            "{what} byte budget must be positive"
        )));
    }
    Ok(())
}

fn check_shape(what: &str, shape: &[u64]) -> crate::Result<()> {
    if shape.is_empty() {
        return Err(crate::Error::configuration(format!(
            "{what} shape must have at least one axis"
        )));
    }
    if let Some(axis) = shape.iter().position(|&n| n == 0) {
        return Err(crate::Error::configuration(format!(
            "{what} shape {shape:?} has a non-positive length on axis {axis}"
        )));
    }
    Ok(())
}

fn check_itemsize(itemsize: u64, chunk_byte_budget: u64) -> crate::Result<()> {
    if itemsize == 0 {
        return Err(crate::Error::configuration("element size must be positive"));
    }
    if itemsize > chunk_byte_budget {
        return Err(crate::Error::configuration(format!(
            "a single {itemsize} byte element exceeds the chunk byte budget of {chunk_byte_budget}"
        )));
    }
    Ok(())
}

/// Check the invariants tying a chunk shape and a buffer shape to a full shape.
///
/// Ranks must agree and every length must be positive. Per axis,
/// `chunk <= buffer <= full`, and the chunk length must divide the buffer
/// length unless the buffer already spans the full axis.
pub fn validate_shapes(full_shape: &[u64], chunk_shape: &[u64], buffer_shape: &[u64]) -> crate::Result<()> {
    check_shape("full", full_shape)?;
    check_shape("chunk", chunk_shape)?;
    check_shape("buffer", buffer_shape)?;
    if chunk_shape.len() != full_shape.len() || buffer_shape.len() != full_shape.len() {
        return Err(crate::Error::configuration(format!(
            "rank mismatch: full shape {full_shape:?}, chunk shape {chunk_shape:?}, buffer shape {buffer_shape:?}"
        )));
    }
    for (axis, ((&full, &chunk), &buffer)) in full_shape
        .iter()
        .zip(chunk_shape)
        .zip(buffer_shape)
        .enumerate()
    {
        if chunk > buffer {
            return Err(crate::Error::configuration(format!(
                "chunk length {chunk} exceeds buffer length {buffer} on axis {axis}"
            )));
        }
        if buffer > full {
            return Err(crate::Error::configuration(format!(
                "buffer length {buffer} exceeds full length {full} on axis {axis}"
            )));
        }
        if buffer != full && buffer % chunk != 0 {
            return Err(crate::Error::configuration(format!(
                "chunk length {chunk} does not evenly divide buffer length {buffer} on axis {axis}"
            )));
        }
    }
    Ok(())
}

/// Default chunk shape preserving the aspect ratio of `full_shape`.
///
/// Axis lengths are expressed as multiples of the smallest axis. While the
/// projected chunk is over budget, the axes with the largest ratio are
/// divided down, until the chunk fits or every ratio is one. The ratio is then
/// scaled up uniformly as far as the budget allows and clipped to the full shape.
///
/// The result satisfies `product(chunk) * itemsize <= chunk_byte_budget`.
pub fn default_chunk_shape(
    full_shape: &[u64],
    itemsize: u64,
    chunk_byte_budget: u64,
) -> crate::Result<Vec<u64>> {
    check_budget("chunk", chunk_byte_budget)?;
    check_shape("full", full_shape)?;
    check_itemsize(itemsize, chunk_byte_budget)?;

    let budget = u128::from(chunk_byte_budget);
    let itemsize_wide = u128::from(itemsize);
    let min_axis = full_shape.iter().copied().min().unwrap_or(1);
    let mut ratio: Vec<u64> = full_shape.iter().map(|&n| n / min_axis).collect();
    let mut ratio_product = product(&ratio);
    while ratio_product.saturating_mul(itemsize_wide) > budget && ratio_product != 1 {
        let Some(non_unit_min) = ratio.iter().copied().filter(|&r| r != 1).min() else {
            break;
        };
        for r in &mut ratio {
            if *r != 1 {
                *r /= non_unit_min;
            }
        }
        ratio_product = product(&ratio);
    }

    let scale = integer_nth_root(
        budget / ratio_product.saturating_mul(itemsize_wide),
        full_shape.len() as u32,
    )
    .max(1);
    let chunk_shape: Vec<u64> = ratio
        .iter()
        .zip(full_shape)
        .map(|(&r, &full)| r.saturating_mul(scale).min(full))
        .collect();
    log::debug!(
        "chunk shape {chunk_shape:?} for full shape {full_shape:?} ({itemsize} byte elements, budget {chunk_byte_budget} B)"
    );
    Ok(chunk_shape)
}

/// Chunk shape for a two-dimensional `(time, channel)` array.
///
/// Takes at most `max_channels` channels per chunk and as many time samples as
/// the budget allows.
pub fn channel_capped_chunk_shape(
    full_shape: &[u64],
    itemsize: u64,
    chunk_byte_budget: u64,
    max_channels: u64,
) -> crate::Result<Vec<u64>> {
    check_budget("chunk", chunk_byte_budget)?;
    check_shape("full", full_shape)?;
    check_itemsize(itemsize, chunk_byte_budget)?;
    let &[frames, channels] = full_shape else {
        return Err(crate::Error::configuration(format!(
            "channel-capped chunking needs a two-dimensional shape, got {full_shape:?}"
        )));
    };
    if max_channels == 0 {
        return Err(crate::Error::configuration("channel cap must be positive"));
    }
    let chunk_channels = channels
        .min(max_channels)
        .min(chunk_byte_budget / itemsize);
    let chunk_frames = frames.min(chunk_byte_budget / (itemsize * chunk_channels));
    let chunk_shape = vec![chunk_frames, chunk_channels];
    log::debug!("channel-capped chunk shape {chunk_shape:?} for full shape {full_shape:?}");
    Ok(chunk_shape)
}

fn check_buffer_inputs(
    full_shape: &[u64],
    chunk_shape: &[u64],
    itemsize: u64,
    buffer_byte_budget: u64,
) -> crate::Result<()> {
    check_budget("buffer", buffer_byte_budget)?;
    check_shape("full", full_shape)?;
    check_shape("chunk", chunk_shape)?;
    if chunk_shape.len() != full_shape.len() {
        return Err(crate::Error::configuration(format!(
            "rank mismatch: full shape {full_shape:?}, chunk shape {chunk_shape:?}"
        )));
    }
    if let Some(axis) = (0..full_shape.len()).find(|&i| chunk_shape[i] > full_shape[i]) {
        return Err(crate::Error::configuration(format!(
            "chunk length {} exceeds full length {} on axis {axis}",
            chunk_shape[axis], full_shape[axis]
        )));
    }
    if itemsize == 0 {
        return Err(crate::Error::configuration("element size must be positive"));
    }
    let chunk_bytes = shape_bytes(chunk_shape, itemsize);
    if chunk_bytes > u128::from(buffer_byte_budget) {
        return Err(crate::Error::configuration(format!(
            "chunk of {chunk_bytes} B exceeds the buffer byte budget of {buffer_byte_budget} B"
        )));
    }
    Ok(())
}

/// Default buffer shape spanning whole chunks.
///
/// An array that fits the budget is buffered whole. Otherwise axes are
/// absorbed in increasing order of chunk length: each axis is taken at full
/// length while the running buffer size times the axis' chunk count stays in
/// budget, and the first axis that does not fit is taken for as many chunks as
/// remain affordable. If the smallest axis alone cannot be absorbed, the buffer
/// grows near-evenly along the two smallest chunk axes instead.
///
/// Every axis of the result is a multiple of the chunk length or equal to the
/// full length.
pub fn default_buffer_shape(
    full_shape: &[u64],
    chunk_shape: &[u64],
    itemsize: u64,
    buffer_byte_budget: u64,
) -> crate::Result<Vec<u64>> {
    check_buffer_inputs(full_shape, chunk_shape, itemsize, buffer_byte_budget)?;
    let budget = u128::from(buffer_byte_budget);
    if shape_bytes(full_shape, itemsize) <= budget {
        return Ok(full_shape.to_vec());
    }

    let chunk_bytes = shape_bytes(chunk_shape, itemsize);
    let blocks: Vec<u64> = full_shape
        .iter()
        .zip(chunk_shape)
        .map(|(&full, &chunk)| full.div_ceil(chunk))
        .collect();
    let mut order: Vec<usize> = (0..full_shape.len()).collect();
    order.sort_by_key(|&axis| chunk_shape[axis]);

    let mut buffer_shape = chunk_shape.to_vec();
    let smallest = order[0];
    let smallest_fill = chunk_bytes.saturating_mul(u128::from(blocks[smallest]));
    if order.len() > 1 && smallest_fill > budget {
        let scale = integer_nth_root(budget / chunk_bytes, 2).max(1);
        for &axis in &order[..2] {
            buffer_shape[axis] = chunk_shape[axis]
                .saturating_mul(scale)
                .min(full_shape[axis]);
        }
    } else {
        let mut buffer_bytes = chunk_bytes;
        for &axis in &order {
            let absorbed = buffer_bytes.saturating_mul(u128::from(blocks[axis]));
            if absorbed <= budget {
                buffer_bytes = absorbed;
                buffer_shape[axis] = full_shape[axis];
            } else {
                let scale = u64::try_from(budget / buffer_bytes).unwrap_or(u64::MAX);
                buffer_shape[axis] = chunk_shape[axis].saturating_mul(scale).min(full_shape[axis]);
                break;
            }
        }
    }
    log::debug!(
        "buffer shape {buffer_shape:?} for chunk shape {chunk_shape:?} in full shape {full_shape:?} (budget {buffer_byte_budget} B)"
    );
    Ok(buffer_shape)
}

/// Legacy buffer shape: scale every chunk axis by the same factor.
///
/// Each axis becomes `chunk * floor((budget / chunk_bytes)^(1/rank))`, clipped to
/// the full length. Preserves the chunk's aspect ratio but usually leaves more of
/// the budget unused than [`default_buffer_shape`].
pub fn legacy_buffer_shape(
    full_shape: &[u64],
    chunk_shape: &[u64],
    itemsize: u64,
    buffer_byte_budget: u64,
) -> crate::Result<Vec<u64>> {
    check_buffer_inputs(full_shape, chunk_shape, itemsize, buffer_byte_budget)?;
    let budget = u128::from(buffer_byte_budget);
    if shape_bytes(full_shape, itemsize) <= budget {
        return Ok(full_shape.to_vec());
    }
    let chunk_bytes = shape_bytes(chunk_shape, itemsize);
    let scale = integer_nth_root(budget / chunk_bytes, full_shape.len() as u32).max(1);
    Ok(chunk_shape
        .iter()
        .zip(full_shape)
        .map(|(&chunk, &full)| chunk.saturating_mul(scale).clamp(chunk, full))
        .collect())
}
