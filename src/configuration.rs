//! Per-dataset write configuration and its mapping onto backend parameters.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::DatasetDescriptor;
use crate::iterator::ChunkedArrayIterator;
use crate::shape::{ChunkShapePolicy, default_buffer_shape, shape_bytes, validate_shapes};
use crate::source::ArraySource;

/// Compressor attached to datasets unless configured otherwise.
pub const DEFAULT_COMPRESSION_METHOD: &str = "gzip";

const HDF5_COMPRESSION_METHODS: &[&str] = &["gzip", "lzf", "szip", "zstd", "blosc", "lz4", "bzip2"];
const ZARR_COMPRESSION_METHODS: &[&str] = &["gzip", "zlib", "zstd", "blosc", "lz4", "bz2", "lzma"];
const ZARR_FILTER_METHODS: &[&str] = &[
    "delta",
    "fixedscaleoffset",
    "quantize",
    "bitround",
    "shuffle",
    "bitshuffle",
    "categorize",
];

/// Storage technology a container is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Single compression filter with positional options.
    Hdf5,
    /// Compressor plus an ordered filter chain.
    Zarr,
}

impl Backend {
    pub fn available_compression_methods(&self) -> &'static [&'static str] {
        match self {
            Backend::Hdf5 => HDF5_COMPRESSION_METHODS,
            Backend::Zarr => ZARR_COMPRESSION_METHODS,
        }
    }

    /// Filters that may precede the compressor. HDF5 takes none.
    pub fn available_filter_methods(&self) -> &'static [&'static str] {
        match self {
            Backend::Hdf5 => &[],
            Backend::Zarr => ZARR_FILTER_METHODS,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Hdf5 => f.write_str("hdf5"),
            Backend::Zarr => f.write_str("zarr"),
        }
    }
}

/// A compressor or filter and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codec {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

impl Codec {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            options: None,
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = Some(options);
        self
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.method)?;
        if let Some(options) = &self.options {
            write!(f, " {}", Value::Object(options.clone()))?;
        }
        Ok(())
    }
}

/// A codec in the `{"id": ..., <parameters>}` form taken by Zarr writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZarrCodecSpec {
    pub id: String,
    #[serde(flatten)]
    pub configuration: Map<String, Value>,
}

impl From<&Codec> for ZarrCodecSpec {
    fn from(value: &Codec) -> Self {
        Self {
            id: value.method.clone(),
            configuration: value.options.clone().unwrap_or_default(),
        }
    }
}

impl From<ZarrCodecSpec> for Codec {
    fn from(value: ZarrCodecSpec) -> Self {
        Self {
            method: value.id,
            options: (!value.configuration.is_empty()).then_some(value.configuration),
        }
    }
}

/// Dataset write parameters in the shape a storage backend expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DataWriteKwargs {
    Hdf5 {
        chunks: Vec<u64>,
        compression: Option<String>,
        compression_opts: Option<Map<String, Value>>,
    },
    Zarr {
        chunks: Vec<u64>,
        compressor: Option<ZarrCodecSpec>,
        filters: Option<Vec<ZarrCodecSpec>>,
    },
}

impl DataWriteKwargs {
    pub fn backend(&self) -> Backend {
        match self {
            DataWriteKwargs::Hdf5 { .. } => Backend::Hdf5,
            DataWriteKwargs::Zarr { .. } => Backend::Zarr,
        }
    }

    pub fn chunks(&self) -> &[u64] {
        match self {
            DataWriteKwargs::Hdf5 { chunks, .. } | DataWriteKwargs::Zarr { chunks, .. } => chunks,
        }
    }
}

/// How one dataset is chunked, buffered and compressed.
///
/// Every constructor and setter checks the same invariants: chunk, buffer and
/// full shapes share a rank, `chunk <= buffer <= full` on each axis, chunks
/// tile the buffer on every axis the buffer does not span entirely, and the
/// codecs are known to the backend. A failed setter leaves the value unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedDatasetWriteConfiguration")]
pub struct DatasetWriteConfiguration {
    backend: Backend,
    descriptor: DatasetDescriptor,
    chunk_shape: Vec<u64>,
    buffer_shape: Vec<u64>,
    compression: Option<Codec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    filters: Vec<Codec>,
}

#[derive(Deserialize)]
struct UncheckedDatasetWriteConfiguration {
    backend: Backend,
    descriptor: DatasetDescriptor,
    chunk_shape: Vec<u64>,
    buffer_shape: Vec<u64>,
    compression: Option<Codec>,
    #[serde(default)]
    filters: Vec<Codec>,
}

impl TryFrom<UncheckedDatasetWriteConfiguration> for DatasetWriteConfiguration {
    type Error = crate::Error;

    fn try_from(value: UncheckedDatasetWriteConfiguration) -> Result<Self, Self::Error> {
        let out = Self {
            backend: value.backend,
            descriptor: value.descriptor,
            chunk_shape: value.chunk_shape,
            buffer_shape: value.buffer_shape,
            compression: value.compression,
            filters: value.filters,
        };
        out.validate()?;
        Ok(out)
    }
}

impl DatasetWriteConfiguration {
    pub fn new(
        backend: Backend,
        descriptor: DatasetDescriptor,
        chunk_shape: Vec<u64>,
        buffer_shape: Vec<u64>,
        compression: Option<Codec>,
    ) -> crate::Result<Self> {
        let out = Self {
            backend,
            descriptor,
            chunk_shape,
            buffer_shape,
            compression,
            filters: Vec::new(),
        };
        out.validate()?;
        Ok(out)
    }

    /// Default chunk and buffer shapes for `descriptor` under the given budgets.
    pub fn from_budgets(
        backend: Backend,
        descriptor: DatasetDescriptor,
        chunk_byte_budget: u64,
        buffer_byte_budget: u64,
        policy: ChunkShapePolicy,
        compression: Option<Codec>,
    ) -> crate::Result<Self> {
        if chunk_byte_budget > buffer_byte_budget {
            return Err(crate::Error::configuration(format!(
                "chunk byte budget {chunk_byte_budget} exceeds buffer byte budget {buffer_byte_budget}"
            )));
        }
        let itemsize = descriptor.element_type().itemsize();
        let full_shape = descriptor.full_shape();
        let chunk_shape = policy.chunk_shape(full_shape, itemsize, chunk_byte_budget)?;
        let buffer_shape =
            default_buffer_shape(full_shape, &chunk_shape, itemsize, buffer_byte_budget)?;
        Self::new(backend, descriptor, chunk_shape, buffer_shape, compression)
    }

    fn validate(&self) -> crate::Result<()> {
        validate_shapes(
            self.descriptor.full_shape(),
            &self.chunk_shape,
            &self.buffer_shape,
        )
        .map_err(|e| match e {
            crate::Error::Configuration(msg) => {
                crate::Error::configuration(format!("{}: {msg}", self.descriptor.location()))
            }
            e => e,
        })?;
        if let Some(codec) = &self.compression {
            if !self
                .backend
                .available_compression_methods()
                .contains(&codec.method.as_str())
            {
                return Err(crate::Error::configuration(format!(
                    "{}: compression method {:?} is not available for {}",
                    self.descriptor.location(),
                    codec.method,
                    self.backend
                )));
            }
        }
        for codec in &self.filters {
            if !self
                .backend
                .available_filter_methods()
                .contains(&codec.method.as_str())
            {
                return Err(crate::Error::configuration(format!(
                    "{}: filter method {:?} is not available for {}",
                    self.descriptor.location(),
                    codec.method,
                    self.backend
                )));
            }
        }
        Ok(())
    }

    fn update(&mut self, f: impl FnOnce(&mut Self)) -> crate::Result<()> {
        let mut next = self.clone();
        f(&mut next);
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    pub fn location(&self) -> &str {
        self.descriptor.location()
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    pub fn buffer_shape(&self) -> &[u64] {
        &self.buffer_shape
    }

    pub fn compression(&self) -> Option<&Codec> {
        self.compression.as_ref()
    }

    pub fn compression_method(&self) -> Option<&str> {
        self.compression.as_ref().map(|c| c.method.as_str())
    }

    pub fn compression_options(&self) -> Option<&Map<String, Value>> {
        self.compression.as_ref().and_then(|c| c.options.as_ref())
    }

    pub fn filters(&self) -> &[Codec] {
        &self.filters
    }

    pub fn set_chunk_shape(&mut self, chunk_shape: Vec<u64>) -> crate::Result<()> {
        self.update(|c| c.chunk_shape = chunk_shape)
    }

    pub fn set_buffer_shape(&mut self, buffer_shape: Vec<u64>) -> crate::Result<()> {
        self.update(|c| c.buffer_shape = buffer_shape)
    }

    /// Replace both shapes at once, for changes that are only valid together.
    pub fn set_shapes(&mut self, chunk_shape: Vec<u64>, buffer_shape: Vec<u64>) -> crate::Result<()> {
        self.update(|c| {
            c.chunk_shape = chunk_shape;
            c.buffer_shape = buffer_shape;
        })
    }

    pub fn set_compression(&mut self, compression: Option<Codec>) -> crate::Result<()> {
        self.update(|c| c.compression = compression)
    }

    pub fn set_filters(&mut self, filters: Vec<Codec>) -> crate::Result<()> {
        self.update(|c| c.filters = filters)
    }

    /// Parameters to hand to the backend when the dataset is created.
    pub fn get_data_write_kwargs(&self) -> DataWriteKwargs {
        match self.backend {
            Backend::Hdf5 => DataWriteKwargs::Hdf5 {
                chunks: self.chunk_shape.clone(),
                compression: self.compression.as_ref().map(|c| c.method.clone()),
                compression_opts: self.compression.as_ref().and_then(|c| c.options.clone()),
            },
            Backend::Zarr => DataWriteKwargs::Zarr {
                chunks: self.chunk_shape.clone(),
                compressor: self.compression.as_ref().map(ZarrCodecSpec::from),
                filters: (!self.filters.is_empty())
                    .then(|| self.filters.iter().map(ZarrCodecSpec::from).collect()),
            },
        }
    }

    /// Iterate `source` in this configuration's buffer and chunk shapes.
    pub fn iterator<S: ArraySource>(&self, source: S) -> crate::Result<ChunkedArrayIterator<S>> {
        let shape = source.shape()?;
        if shape != self.descriptor.full_shape() {
            return Err(crate::Error::configuration(format!(
                "{}: source shape {shape:?} differs from dataset shape {:?}",
                self.location(),
                self.descriptor.full_shape()
            )));
        }
        let element_type = source.element_type()?;
        if &element_type != self.descriptor.element_type() {
            return Err(crate::Error::configuration(format!(
                "{}: source elements are {element_type}, dataset elements are {}",
                self.location(),
                self.descriptor.element_type()
            )));
        }
        ChunkedArrayIterator::builder(source)
            .chunk_shape(self.chunk_shape.clone())
            .buffer_shape(self.buffer_shape.clone())
            .build()
    }
}

fn human_bytes(bytes: u128) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

impl fmt::Display for DatasetWriteConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location();
        let itemsize = self.descriptor.element_type().itemsize();
        let full_shape = self.descriptor.full_shape();
        writeln!(f, "{location}")?;
        writeln!(f, "{}", "-".repeat(location.len()))?;
        writeln!(f, "  dtype: {}", self.descriptor.element_type())?;
        writeln!(
            f,
            "  full shape: {full_shape:?} ({})",
            human_bytes(shape_bytes(full_shape, itemsize))
        )?;
        writeln!(
            f,
            "  buffer shape: {:?} ({})",
            self.buffer_shape,
            human_bytes(shape_bytes(&self.buffer_shape, itemsize))
        )?;
        writeln!(
            f,
            "  chunk shape: {:?} ({})",
            self.chunk_shape,
            human_bytes(shape_bytes(&self.chunk_shape, itemsize))
        )?;
        match &self.compression {
            Some(codec) => writeln!(f, "  compression: {codec}")?,
            None => writeln!(f, "  compression: none")?,
        }
        for codec in &self.filters {
            writeln!(f, "  filter: {codec}")?;
        }
        Ok(())
    }
}
