//! N5 hierarchies as container trees.
//!
//! Every node of an N5 hierarchy is a directory holding an `attributes.json`
//! document; arrays are the nodes whose document carries `dimensions`,
//! `blockSize`, `dataType` and `compression`. N5 lists dimensions in F order,
//! so shapes are reversed when crossing into this crate.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, StorageError, StoreKey, StorePrefix,
    WritableStorageTraits,
};

use crate::configuration::{Backend, Codec, DataWriteKwargs, ZarrCodecSpec};
use crate::data_type::ElementType;
use crate::tree::{ArrayInfo, ContainerTree, Node, NodeId, NodeKind};

const ATTRIBUTES_JSON: &str = "attributes.json";

/// Contents of an `attributes.json` document, either an array or a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum N5Metadata {
    Array(N5ArrayMetadata),
    Group(N5GroupMetadata),
}

impl From<N5ArrayMetadata> for N5Metadata {
    fn from(value: N5ArrayMetadata) -> Self {
        Self::Array(value)
    }
}

impl From<N5GroupMetadata> for N5Metadata {
    fn from(value: N5GroupMetadata) -> Self {
        Self::Group(value)
    }
}

impl N5Metadata {
    pub fn as_array(&self) -> Option<&N5ArrayMetadata> {
        match self {
            N5Metadata::Array(m) => Some(m),
            N5Metadata::Group(_) => None,
        }
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        match self {
            N5Metadata::Array(m) => &m.attributes,
            N5Metadata::Group(m) => &m.attributes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct N5GroupMetadata {
    /// N5 version; present if this is a hierarchy root.
    #[serde(rename = "n5", default, skip_serializing_if = "Option::is_none")]
    pub n5_version: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct N5ArrayMetadata {
    #[serde(rename = "n5", default, skip_serializing_if = "Option::is_none")]
    pub n5_version: Option<String>,
    /// Array shape in F order.
    pub dimensions: Vec<u64>,
    /// Chunk shape in F order.
    pub block_size: Vec<u64>,
    pub data_type: String,
    #[serde(default)]
    pub compression: N5Compression,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl N5ArrayMetadata {
    /// Array shape in C order.
    pub fn shape(&self) -> Vec<u64> {
        self.dimensions.iter().rev().copied().collect()
    }

    /// Chunk shape in C order.
    pub fn chunk_shape(&self) -> Vec<u64> {
        self.block_size.iter().rev().copied().collect()
    }
}

/// N5 chunk compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum N5Compression {
    #[default]
    Raw,
    Bzip2 {
        #[serde(rename = "blockSize", default = "default_bzip2_block_size")]
        block_size: u8,
    },
    Gzip {
        /// -1 means the implementation default, 6.
        #[serde(default = "default_gzip_level")]
        level: i8,
    },
    Lz4 {
        #[serde(rename = "blockSize", default = "default_lz4_block_size")]
        block_size: u64,
    },
    Xz {
        #[serde(default = "default_xz_preset")]
        preset: u32,
    },
    /// Any compression this crate cannot express, such as blosc or zstd.
    #[serde(other)]
    Unsupported,
}

fn default_bzip2_block_size() -> u8 {
    9
}

fn default_gzip_level() -> i8 {
    -1
}

fn default_lz4_block_size() -> u64 {
    65536
}

fn default_xz_preset() -> u32 {
    6
}

fn int_option<T: TryFrom<i64>>(spec: &ZarrCodecSpec, key: &str, default: T) -> crate::Result<T> {
    let Some(value) = spec.configuration.get(key) else {
        return Ok(default);
    };
    value
        .as_i64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| {
            crate::Error::configuration(format!("invalid {} {key} {value}", spec.id))
        })
}

impl N5Compression {
    /// The equivalent codec, or `None` for raw blocks.
    pub fn to_codec(&self) -> crate::Result<Option<Codec>> {
        let codec = match self {
            N5Compression::Raw => return Ok(None),
            N5Compression::Bzip2 { block_size } => Codec::new("bz2").with_option("level", *block_size),
            N5Compression::Gzip { level } => {
                Codec::new("gzip").with_option("level", if *level == -1 { 6 } else { *level })
            }
            N5Compression::Lz4 { block_size } => {
                Codec::new("lz4").with_option("block_size", *block_size)
            }
            N5Compression::Xz { preset } => Codec::new("lzma").with_option("preset", *preset),
            N5Compression::Unsupported => {
                return Err(crate::Error::invalid_tree("unsupported N5 compression"));
            }
        };
        Ok(Some(codec))
    }

    /// Compression equivalent to a Zarr compressor.
    pub fn from_codec_spec(spec: Option<&ZarrCodecSpec>) -> crate::Result<Self> {
        let Some(spec) = spec else {
            return Ok(N5Compression::Raw);
        };
        let out = match spec.id.as_str() {
            "gzip" => match int_option(spec, "level", -1i8)? {
                level @ -1..=9 => N5Compression::Gzip { level },
                n => {
                    return Err(crate::Error::configuration(format!(
                        "invalid gzip compression level {n}"
                    )));
                }
            },
            "bz2" => match int_option(spec, "level", 9u8)? {
                block_size @ 1..=9 => N5Compression::Bzip2 { block_size },
                n => {
                    return Err(crate::Error::configuration(format!(
                        "invalid bz2 block size {n}"
                    )));
                }
            },
            "lz4" => match int_option(spec, "block_size", default_lz4_block_size())? {
                0 => return Err(crate::Error::configuration("lz4 block size must be positive")),
                block_size => N5Compression::Lz4 { block_size },
            },
            "lzma" => N5Compression::Xz {
                preset: int_option(spec, "preset", default_xz_preset())?,
            },
            id => {
                return Err(crate::Error::configuration(format!(
                    "compressor {id:?} cannot be stored in N5"
                )));
            }
        };
        Ok(out)
    }
}

fn attributes_key(prefix: &StorePrefix) -> crate::Result<StoreKey> {
    StoreKey::new(format!("{}{ATTRIBUTES_JSON}", prefix.as_str()))
        .map_err(|e| StorageError::from(e).into())
}

fn read_metadata<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    prefix: &StorePrefix,
) -> crate::Result<Option<N5Metadata>> {
    let key = attributes_key(prefix)?;
    let Some(bytes) = storage.get(&key)? else {
        return Ok(None);
    };
    let metadata = serde_json::from_reader(bytes.reader()).map_err(|e| {
        StorageError::InvalidMetadata(key.clone(), format!("could not parse N5 metadata: {e}"))
    })?;
    Ok(Some(metadata))
}

#[derive(Debug, Clone)]
struct N5Node {
    name: String,
    prefix: StorePrefix,
    metadata: N5Metadata,
    /// Whether an array already has blocks stored under its prefix.
    has_blocks: bool,
    children: Vec<NodeId>,
    pending: Option<N5ArrayMetadata>,
}

impl N5Node {
    fn load<TStorage>(storage: &TStorage, name: String, prefix: StorePrefix) -> crate::Result<Self>
    where
        TStorage: ?Sized + ReadableStorageTraits + ListableStorageTraits,
    {
        // A directory without attributes.json is an implicit group.
        let metadata = read_metadata(storage, &prefix)?
            .unwrap_or_else(|| N5GroupMetadata::default().into());
        let mut has_blocks = false;
        if let N5Metadata::Array(array) = &metadata {
            if let Err(e) = ElementType::from_n5_name(&array.data_type) {
                log::warn!("{:?}: {e}, skipping the array", prefix.as_str());
            }
            if array.compression == N5Compression::Unsupported {
                log::warn!(
                    "{:?}: unsupported N5 compression, treating the array as read-only",
                    prefix.as_str()
                );
            }
            let attributes = attributes_key(&prefix)?;
            let listing = storage.list_dir(&prefix)?;
            has_blocks = !listing.prefixes().is_empty()
                || listing.keys().iter().any(|key| key != &attributes);
            if has_blocks {
                log::debug!(
                    "{:?} already holds blocks, treating the array as read-only",
                    prefix.as_str()
                );
            }
        }
        Ok(Self {
            name,
            prefix,
            metadata,
            has_blocks,
            children: Vec::new(),
            pending: None,
        })
    }
}

/// An N5 hierarchy read from a zarrs store.
///
/// The hierarchy is read once, at [`open`](Self::open). Write parameters given
/// through [`ContainerTree::set_write_parameters`] are held as pending array
/// metadata until [`store_metadata`](Self::store_metadata) is called.
pub struct N5Tree<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    nodes: Vec<N5Node>,
}

impl<TStorage> N5Tree<TStorage>
where
    TStorage: ?Sized + ReadableStorageTraits + ListableStorageTraits,
{
    pub fn open(storage: Arc<TStorage>) -> crate::Result<Self> {
        let mut nodes = vec![N5Node::load(&*storage, String::new(), StorePrefix::root())?];
        let mut idx = 0;
        while idx < nodes.len() {
            if matches!(nodes[idx].metadata, N5Metadata::Group(_)) {
                let mut prefixes = storage.list_dir(&nodes[idx].prefix)?.prefixes().clone();
                prefixes.sort();
                for prefix in prefixes {
                    let name = prefix
                        .as_str()
                        .trim_end_matches('/')
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_owned();
                    let id = NodeId::new(nodes.len() as u64);
                    nodes.push(N5Node::load(&*storage, name, prefix)?);
                    nodes[idx].children.push(id);
                }
            }
            idx += 1;
        }
        log::debug!("opened N5 hierarchy with {} nodes", nodes.len());
        Ok(Self { storage, nodes })
    }
}

impl<TStorage: ?Sized> N5Tree<TStorage> {
    fn get(&self, id: NodeId) -> crate::Result<&N5Node> {
        usize::try_from(id.get())
            .ok()
            .and_then(|idx| self.nodes.get(idx))
            .ok_or_else(|| crate::Error::invalid_tree(format!("unknown node {id:?}")))
    }

    pub fn storage(&self) -> &Arc<TStorage> {
        &self.storage
    }

    /// Look up a node by its `/`-separated path from the root.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for name in path.split('/').filter(|s| !s.is_empty()) {
            current = *self
                .get(current)
                .ok()?
                .children
                .iter()
                .find(|&&c| self.get(c).is_ok_and(|n| n.name == name))?;
        }
        Some(current)
    }

    /// Committed metadata of a node.
    pub fn metadata(&self, node: NodeId) -> Option<&N5Metadata> {
        self.get(node).ok().map(|n| &n.metadata)
    }

    /// Array metadata the node will be stored with, if it has new write parameters.
    pub fn pending_metadata(&self, node: NodeId) -> Option<&N5ArrayMetadata> {
        self.get(node).ok()?.pending.as_ref()
    }

    fn resolve_write_parameters(
        &self,
        node: NodeId,
        kwargs: &DataWriteKwargs,
    ) -> crate::Result<N5ArrayMetadata> {
        let n5_node = self.get(node)?;
        let N5Metadata::Array(array) = &n5_node.metadata else {
            return Err(crate::Error::invalid_tree(format!(
                "{} is not an array",
                n5_node.prefix.as_str()
            )));
        };
        ElementType::from_n5_name(&array.data_type)?;
        if n5_node.has_blocks {
            return Err(crate::Error::configuration(format!(
                "{:?} already holds blocks stored with its current layout",
                n5_node.prefix.as_str()
            )));
        }
        let DataWriteKwargs::Zarr {
            chunks,
            compressor,
            filters,
        } = kwargs
        else {
            return Err(crate::Error::configuration(format!(
                "{} write parameters given to an N5 hierarchy",
                kwargs.backend()
            )));
        };
        if filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(crate::Error::configuration("N5 arrays do not support filters"));
        }
        if chunks.len() != array.dimensions.len() || chunks.contains(&0) {
            return Err(crate::Error::configuration(format!(
                "invalid chunk shape {chunks:?} for array of shape {:?}",
                array.shape()
            )));
        }
        Ok(N5ArrayMetadata {
            block_size: chunks.iter().rev().copied().collect(),
            compression: N5Compression::from_codec_spec(compressor.as_ref())?,
            ..array.clone()
        })
    }
}

impl<TStorage: ?Sized + WritableStorageTraits> N5Tree<TStorage> {
    /// Write the pending metadata of every node that has some.
    ///
    /// Returns the number of documents written.
    pub fn store_metadata(&mut self) -> crate::Result<usize> {
        let mut written = 0;
        for node in &mut self.nodes {
            let Some(pending) = node.pending.take() else {
                continue;
            };
            let key = attributes_key(&node.prefix)?;
            let metadata = N5Metadata::Array(pending);
            self.storage
                .set(&key, Bytes::from(serde_json::to_vec(&metadata)?))?;
            node.metadata = metadata;
            written += 1;
        }
        log::info!("stored {written} N5 array metadata documents");
        Ok(written)
    }
}

impl<TStorage: ?Sized> ContainerTree for N5Tree<TStorage> {
    fn backend(&self) -> Backend {
        Backend::Zarr
    }

    fn root(&self) -> NodeId {
        NodeId::new(0)
    }

    fn children(&self, node: NodeId) -> crate::Result<Vec<NodeId>> {
        Ok(self.get(node)?.children.clone())
    }

    /// Reports committed metadata; pending parameters are not reflected.
    ///
    /// Arrays that already hold blocks are read-only, since new write
    /// parameters would not re-encode them.
    fn node(&self, node: NodeId) -> crate::Result<Node> {
        let n5_node = self.get(node)?;
        let kind = match &n5_node.metadata {
            N5Metadata::Group(_) => NodeKind::Group,
            N5Metadata::Array(array) => match ElementType::from_n5_name(&array.data_type) {
                Ok(element_type) => {
                    let mut info = ArrayInfo::new(array.shape(), element_type)
                        .with_chunk_shape(array.chunk_shape());
                    info = match array.compression.to_codec() {
                        Ok(Some(codec)) => info.with_compression(codec),
                        Ok(None) => info,
                        Err(_) => info.read_only(),
                    };
                    if n5_node.has_blocks {
                        info = info.read_only();
                    }
                    NodeKind::Array(info)
                }
                Err(e) => NodeKind::Unsupported(e.to_string()),
            },
        };
        Ok(Node {
            name: n5_node.name.clone(),
            kind,
        })
    }

    fn check_write_parameters(&self, node: NodeId, kwargs: &DataWriteKwargs) -> crate::Result<()> {
        self.resolve_write_parameters(node, kwargs).map(|_| ())
    }

    fn set_write_parameters(&mut self, node: NodeId, kwargs: DataWriteKwargs) -> crate::Result<()> {
        let pending = self.resolve_write_parameters(node, &kwargs)?;
        let idx = usize::try_from(node.get()).map_err(crate::Error::wrap)?;
        self.nodes[idx].pending = Some(pending);
        Ok(())
    }
}
