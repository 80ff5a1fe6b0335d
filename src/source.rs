use std::ops::Range;

use crate::data_type::{ElementType, NativeElement};

pub mod zarr;

/// Position of one buffer within a full array: a half-open range per axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Window(Vec<Range<u64>>);

impl Window {
    pub fn new(ranges: Vec<Range<u64>>) -> Self {
        Self(ranges)
    }

    /// Window spanning the whole of `shape`.
    pub fn full(shape: &[u64]) -> Self {
        Self(shape.iter().map(|&n| 0..n).collect())
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn start(&self) -> Vec<u64> {
        self.0.iter().map(|r| r.start).collect()
    }

    pub fn shape(&self) -> Vec<u64> {
        self.0.iter().map(|r| r.end.saturating_sub(r.start)).collect()
    }

    pub fn num_elements(&self) -> u64 {
        self.0.iter().map(|r| r.end.saturating_sub(r.start)).product()
    }

    /// Whether the window lies inside an array of `shape`.
    pub fn fits(&self, shape: &[u64]) -> bool {
        self.0.len() == shape.len()
            && self
                .0
                .iter()
                .zip(shape)
                .all(|(r, &n)| r.start <= r.end && r.end <= n)
    }
}

impl From<Vec<Range<u64>>> for Window {
    fn from(value: Vec<Range<u64>>) -> Self {
        Self(value)
    }
}

/// An array that can be read one window at a time.
///
/// `fetch` must return materialised values: the caller commits each buffer to
/// storage and drops it before asking for the next one.
pub trait ArraySource {
    /// Materialised values of one window, in C order.
    type Values;

    fn shape(&self) -> crate::Result<Vec<u64>>;

    fn element_type(&self) -> crate::Result<ElementType>;

    fn fetch(&self, window: &Window) -> crate::Result<Self::Values>;
}

impl<S: ArraySource + ?Sized> ArraySource for &S {
    type Values = S::Values;

    fn shape(&self) -> crate::Result<Vec<u64>> {
        (**self).shape()
    }

    fn element_type(&self) -> crate::Result<ElementType> {
        (**self).element_type()
    }

    fn fetch(&self, window: &Window) -> crate::Result<Self::Values> {
        (**self).fetch(window)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("window {window:?} does not fit an array of shape {shape:?}")]
pub struct WindowOutOfBoundsError {
    window: Window,
    shape: Vec<u64>,
}

#[derive(Debug, thiserror::Error)]
#[error("window of {expected} elements given {actual} values")]
pub struct WindowLengthError {
    expected: u64,
    actual: usize,
}

/// A C-ordered array held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryArray<T> {
    shape: Vec<u64>,
    data: Vec<T>,
}

impl<T: NativeElement> InMemoryArray<T> {
    pub fn new(shape: Vec<u64>, data: Vec<T>) -> crate::Result<Self> {
        let expected: u64 = shape.iter().product();
        if expected != data.len() as u64 {
            return Err(crate::Error::configuration(format!(
                "shape {shape:?} holds {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<u64>) -> Self {
        let len = shape.iter().product::<u64>() as usize;
        Self {
            shape,
            data: vec![T::default(); len],
        }
    }

    /// Build an array whose values are a function of the flat C-order index.
    pub fn from_fn(shape: Vec<u64>, f: impl FnMut(usize) -> T) -> Self {
        let len = shape.iter().product::<u64>() as usize;
        Self {
            shape,
            data: (0..len).map(f).collect(),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    fn check_window(&self, window: &Window) -> crate::Result<()> {
        if window.fits(&self.shape) {
            Ok(())
        } else {
            Err(crate::Error::source_error(WindowOutOfBoundsError {
                window: window.clone(),
                shape: self.shape.clone(),
            }))
        }
    }

    /// Copy `values`, laid out in C order over `window`, into this array.
    pub fn write_window(&mut self, window: &Window, values: &[T]) -> crate::Result<()> {
        self.check_window(window)?;
        if window.num_elements() != values.len() as u64 {
            return Err(crate::Error::source_error(WindowLengthError {
                expected: window.num_elements(),
                actual: values.len(),
            }));
        }
        for_each_run(&self.shape, window, |array_offset, window_offset, len| {
            self.data[array_offset..array_offset + len]
                .copy_from_slice(&values[window_offset..window_offset + len]);
        });
        Ok(())
    }
}

impl<T: NativeElement> ArraySource for InMemoryArray<T> {
    type Values = Vec<T>;

    fn shape(&self) -> crate::Result<Vec<u64>> {
        Ok(self.shape.clone())
    }

    fn element_type(&self) -> crate::Result<ElementType> {
        Ok(T::ELEMENT_TYPE)
    }

    fn fetch(&self, window: &Window) -> crate::Result<Vec<T>> {
        self.check_window(window)?;
        let mut out = Vec::with_capacity(window.num_elements() as usize);
        for_each_run(&self.shape, window, |array_offset, _, len| {
            out.extend_from_slice(&self.data[array_offset..array_offset + len]);
        });
        Ok(out)
    }
}

/// Visit the contiguous runs (along the last axis) of `window` within an array
/// of `shape`, in C order.
///
/// The callback receives the flat offset into the array, the flat offset into
/// the window, and the run length.
fn for_each_run(shape: &[u64], window: &Window, mut f: impl FnMut(usize, usize, usize)) {
    let window_shape = window.shape();
    let rank = shape.len();
    if rank == 0 || window_shape.iter().any(|&n| n == 0) {
        return;
    }
    let mut strides = vec![1u64; rank];
    for axis in (0..rank.saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    let run = window_shape[rank - 1] as usize;
    let start = window.start();
    // Odometer over every axis but the last.
    let mut index = vec![0u64; rank - 1];
    let mut window_offset = 0usize;
    loop {
        let array_offset: u64 = start
            .iter()
            .zip(index.iter().chain(std::iter::once(&0)))
            .zip(&strides)
            .map(|((&s, &i), &stride)| (s + i) * stride)
            .sum();
        f(array_offset as usize, window_offset, run);
        window_offset += run;

        let mut axis = rank - 1;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < window_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}
