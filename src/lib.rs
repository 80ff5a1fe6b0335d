//! Bounded-memory chunked writing of large arrays and per-dataset storage
//! configuration for container trees.
//!
//! [`shape`] picks chunk and buffer shapes under byte budgets,
//! [`ChunkedArrayIterator`] walks an [`ArraySource`] one buffer at a time, and
//! [`ContainerConfiguration`] builds, reads back and applies write parameters
//! for every dataset of a [`ContainerTree`].
pub mod configuration;
pub mod container;
pub mod data_type;
pub mod descriptor;
mod error;
pub mod iterator;
pub mod n5;
pub mod shape;
pub mod source;
pub mod tree;

pub use zarrs;

pub use configuration::{Backend, Codec, DataWriteKwargs, DatasetWriteConfiguration};
pub use container::{BuildOptions, ContainerConfiguration};
pub use data_type::{ElementType, NativeElement};
pub use descriptor::{DatasetDescriptor, discover_datasets};
pub use error::{Error, Result};
pub use iterator::{ChunkedArrayIterator, ChunkedArrayIteratorBuilder, DataChunk};
pub use source::{ArraySource, InMemoryArray, Window};
pub use tree::{ContainerTree, MemoryTree, NodeId};
