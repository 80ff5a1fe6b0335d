//! Bounded-memory iteration over an [`ArraySource`].

use std::iter::FusedIterator;

use crate::data_type::ElementType;
use crate::shape::{
    ChunkShapePolicy, DEFAULT_BUFFER_BYTE_BUDGET, DEFAULT_CHUNK_BYTE_BUDGET, default_buffer_shape,
    validate_shapes,
};
use crate::source::{ArraySource, Window};

/// One materialised buffer and the window of the full array it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk<V> {
    window: Window,
    values: V,
}

impl<V> DataChunk<V> {
    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn values(&self) -> &V {
        &self.values
    }

    pub fn into_parts(self) -> (Window, V) {
        (self.window, self.values)
    }
}

#[derive(Debug, Clone)]
enum Sizing {
    Budget(u64),
    Shape(Vec<u64>),
}

fn exactly_one(
    what: &str,
    budget: Option<u64>,
    shape: Option<Vec<u64>>,
    default_budget: u64,
) -> crate::Result<Sizing> {
    match (budget, shape) {
        (Some(_), Some(_)) => Err(crate::Error::configuration(format!(
            "only one of {what} byte budget and {what} shape may be given"
        ))),
        (Some(budget), None) => Ok(Sizing::Budget(budget)),
        (None, Some(shape)) => Ok(Sizing::Shape(shape)),
        (None, None) => Ok(Sizing::Budget(default_budget)),
    }
}

/// Builder for a [`ChunkedArrayIterator`].
///
/// The buffer is sized by either a byte budget or an explicit shape, and so is
/// the chunk; setting both forms of the same one fails at [`build`](Self::build).
/// Unset sizes fall back to [`DEFAULT_BUFFER_BYTE_BUDGET`] and
/// [`DEFAULT_CHUNK_BYTE_BUDGET`].
#[derive(Debug, Clone)]
pub struct ChunkedArrayIteratorBuilder<S> {
    source: S,
    buffer_byte_budget: Option<u64>,
    buffer_shape: Option<Vec<u64>>,
    chunk_byte_budget: Option<u64>,
    chunk_shape: Option<Vec<u64>>,
    chunk_shape_policy: ChunkShapePolicy,
}

impl<S: ArraySource> ChunkedArrayIteratorBuilder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer_byte_budget: None,
            buffer_shape: None,
            chunk_byte_budget: None,
            chunk_shape: None,
            chunk_shape_policy: ChunkShapePolicy::default(),
        }
    }

    #[must_use]
    pub fn buffer_byte_budget(mut self, bytes: u64) -> Self {
        self.buffer_byte_budget = Some(bytes);
        self
    }

    #[must_use]
    pub fn buffer_shape(mut self, shape: impl Into<Vec<u64>>) -> Self {
        self.buffer_shape = Some(shape.into());
        self
    }

    #[must_use]
    pub fn chunk_byte_budget(mut self, bytes: u64) -> Self {
        self.chunk_byte_budget = Some(bytes);
        self
    }

    #[must_use]
    pub fn chunk_shape(mut self, shape: impl Into<Vec<u64>>) -> Self {
        self.chunk_shape = Some(shape.into());
        self
    }

    /// Algorithm used when the chunk shape is derived from a byte budget.
    #[must_use]
    pub fn chunk_shape_policy(mut self, policy: ChunkShapePolicy) -> Self {
        self.chunk_shape_policy = policy;
        self
    }

    pub fn build(self) -> crate::Result<ChunkedArrayIterator<S>> {
        let buffer_sizing = exactly_one(
            "buffer",
            self.buffer_byte_budget,
            self.buffer_shape,
            DEFAULT_BUFFER_BYTE_BUDGET,
        )?;
        let chunk_sizing = exactly_one(
            "chunk",
            self.chunk_byte_budget,
            self.chunk_shape,
            DEFAULT_CHUNK_BYTE_BUDGET,
        )?;
        if let (Sizing::Budget(chunk_budget), Sizing::Budget(buffer_budget)) =
            (&chunk_sizing, &buffer_sizing)
        {
            if chunk_budget > buffer_budget {
                return Err(crate::Error::configuration(format!(
                    "chunk byte budget {chunk_budget} exceeds buffer byte budget {buffer_budget}"
                )));
            }
        }

        let full_shape = self.source.shape()?;
        let element_type = self.source.element_type()?;
        let itemsize = element_type.itemsize();

        let chunk_shape = match chunk_sizing {
            Sizing::Shape(shape) => shape,
            Sizing::Budget(budget) => {
                self.chunk_shape_policy
                    .chunk_shape(&full_shape, itemsize, budget)?
            }
        };
        let buffer_shape = match buffer_sizing {
            Sizing::Shape(shape) => shape,
            Sizing::Budget(budget) => {
                default_buffer_shape(&full_shape, &chunk_shape, itemsize, budget)?
            }
        };
        validate_shapes(&full_shape, &chunk_shape, &buffer_shape)?;

        let windows = WindowCursor::new(&full_shape, &buffer_shape);
        log::debug!(
            "iterating {full_shape:?} ({element_type}) in {} buffers of {buffer_shape:?}, chunk shape {chunk_shape:?}",
            windows.remaining
        );
        Ok(ChunkedArrayIterator {
            source: self.source,
            full_shape,
            element_type,
            chunk_shape,
            buffer_shape,
            windows,
        })
    }
}

/// Odometer over buffer-sized windows, last axis fastest.
#[derive(Debug, Clone)]
struct WindowCursor {
    full_shape: Vec<u64>,
    buffer_shape: Vec<u64>,
    /// Buffer index per axis of the next window.
    next: Vec<u64>,
    remaining: u64,
}

impl WindowCursor {
    fn new(full_shape: &[u64], buffer_shape: &[u64]) -> Self {
        let remaining = full_shape
            .iter()
            .zip(buffer_shape)
            .map(|(&full, &buffer)| full.div_ceil(buffer))
            .product();
        Self {
            full_shape: full_shape.to_vec(),
            buffer_shape: buffer_shape.to_vec(),
            next: vec![0; full_shape.len()],
            remaining,
        }
    }

    fn exhaust(&mut self) {
        self.remaining = 0;
    }
}

impl Iterator for WindowCursor {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.remaining == 0 {
            return None;
        }
        let window = Window::new(
            self.next
                .iter()
                .zip(&self.buffer_shape)
                .zip(&self.full_shape)
                .map(|((&idx, &buffer), &full)| idx * buffer..((idx + 1) * buffer).min(full))
                .collect(),
        );
        self.remaining -= 1;
        for axis in (0..self.next.len()).rev() {
            self.next[axis] += 1;
            if self.next[axis] * self.buffer_shape[axis] < self.full_shape[axis] {
                break;
            }
            self.next[axis] = 0;
        }
        Some(window)
    }
}

/// Pulls buffer-sized windows from an [`ArraySource`] one at a time.
///
/// The windows tile the full array in C order of buffer position: the last
/// axis advances fastest and the final window on an axis is clipped to the
/// array edge. Each step fetches exactly one window, so at most one buffer is
/// materialised per call. The iterator cannot be restarted; a source error is
/// yielded once and ends the iteration.
#[derive(Debug)]
pub struct ChunkedArrayIterator<S> {
    source: S,
    full_shape: Vec<u64>,
    element_type: ElementType,
    chunk_shape: Vec<u64>,
    buffer_shape: Vec<u64>,
    windows: WindowCursor,
}

impl<S: ArraySource> ChunkedArrayIterator<S> {
    pub fn builder(source: S) -> ChunkedArrayIteratorBuilder<S> {
        ChunkedArrayIteratorBuilder::new(source)
    }

    /// Iterate `source` with the default budgets.
    pub fn new(source: S) -> crate::Result<Self> {
        Self::builder(source).build()
    }

    pub fn full_shape(&self) -> &[u64] {
        &self.full_shape
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    pub fn buffer_shape(&self) -> &[u64] {
        &self.buffer_shape
    }

    /// Number of windows not yet yielded.
    pub fn num_windows(&self) -> u64 {
        self.windows.remaining
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: ArraySource> Iterator for ChunkedArrayIterator<S> {
    type Item = crate::Result<DataChunk<S::Values>>;

    fn next(&mut self) -> Option<Self::Item> {
        let window = self.windows.next()?;
        match self.source.fetch(&window) {
            Ok(values) => Some(Ok(DataChunk { window, values })),
            Err(e) => {
                self.windows.exhaust();
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.windows.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl<S: ArraySource> FusedIterator for ChunkedArrayIterator<S> {}
