use std::marker::PhantomData;

use zarrs::{
    array::{Array, ArraySubset, Element, ElementOwned},
    storage::{ReadableStorageTraits, ReadableWritableStorageTraits},
};

use super::{ArraySource, Window};
use crate::data_type::{ElementType, NativeElement};
use crate::iterator::ChunkedArrayIterator;

fn window_subset(window: &Window) -> ArraySubset {
    ArraySubset::new_with_ranges(window.ranges())
}

/// A zarrs array read as elements of `T`.
pub struct ZarrArraySource<TStorage: ?Sized, T> {
    array: Array<TStorage>,
    _element: PhantomData<T>,
}

impl<TStorage, T> ZarrArraySource<TStorage, T>
where
    TStorage: ?Sized + ReadableStorageTraits + 'static,
    T: NativeElement + ElementOwned,
{
    /// Wrap `array`, checking that `T` has the width of its data type.
    pub fn new(array: Array<TStorage>) -> crate::Result<Self> {
        let expected = T::ELEMENT_TYPE.itemsize() as usize;
        match array.data_type().fixed_size() {
            Some(size) if size == expected => Ok(Self {
                array,
                _element: PhantomData,
            }),
            size => Err(crate::Error::configuration(format!(
                "array elements of {size:?} bytes cannot be read as {}",
                T::ELEMENT_TYPE
            ))),
        }
    }

    pub fn array(&self) -> &Array<TStorage> {
        &self.array
    }

    pub fn into_inner(self) -> Array<TStorage> {
        self.array
    }
}

impl<TStorage, T> ArraySource for ZarrArraySource<TStorage, T>
where
    TStorage: ?Sized + ReadableStorageTraits + 'static,
    T: NativeElement + ElementOwned,
{
    type Values = Vec<T>;

    fn shape(&self) -> crate::Result<Vec<u64>> {
        Ok(self.array.shape().to_vec())
    }

    fn element_type(&self) -> crate::Result<ElementType> {
        Ok(T::ELEMENT_TYPE)
    }

    fn fetch(&self, window: &Window) -> crate::Result<Vec<T>> {
        self.array
            .retrieve_array_subset::<Vec<T>>(&window_subset(window))
            .map_err(crate::Error::source_error)
    }
}

/// Drain `chunks` into `array`, one buffer at a time.
///
/// Returns the number of buffers written. The array must have the iterator's full shape.
pub fn store_chunked<TStorage, S, T>(
    array: &Array<TStorage>,
    chunks: ChunkedArrayIterator<S>,
) -> crate::Result<u64>
where
    TStorage: ?Sized + ReadableWritableStorageTraits + 'static,
    S: ArraySource<Values = Vec<T>>,
    T: Element,
{
    if array.shape() != chunks.full_shape() {
        return Err(crate::Error::configuration(format!(
            "cannot write an array of shape {:?} into one of shape {:?}",
            chunks.full_shape(),
            array.shape()
        )));
    }
    let mut written = 0;
    for chunk in chunks {
        let (window, values) = chunk?.into_parts();
        array
            .store_array_subset(&window_subset(&window), values)
            .map_err(crate::Error::wrap)?;
        written += 1;
    }
    log::debug!("stored {written} buffers");
    Ok(written)
}
