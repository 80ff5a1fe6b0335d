//! Hierarchical containers of groups and array datasets.

use serde::{Deserialize, Serialize};

use crate::configuration::{Backend, Codec, DataWriteKwargs};
use crate::data_type::ElementType;

/// Handle of a node within one tree instance.
///
/// Handles are only meaningful for the tree that issued them; two trees read
/// from the same file hand out unrelated handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Metadata of an array dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo {
    pub shape: Vec<u64>,
    pub element_type: ElementType,
    /// Whether new write parameters can be given to this dataset.
    pub writable: bool,
    /// Whether the data lives in a file outside the container.
    pub external: bool,
    /// Committed chunk shape, if the dataset is chunked.
    pub chunk_shape: Option<Vec<u64>>,
    /// Committed compressor, if any.
    pub compression: Option<Codec>,
    pub filters: Vec<Codec>,
}

impl ArrayInfo {
    /// A writable, uncompressed and unchunked dataset.
    pub fn new(shape: Vec<u64>, element_type: ElementType) -> Self {
        Self {
            shape,
            element_type,
            writable: true,
            external: false,
            chunk_shape: None,
            compression: None,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_chunk_shape(mut self, chunk_shape: Vec<u64>) -> Self {
        self.chunk_shape = Some(chunk_shape);
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: Codec) -> Self {
        self.compression = Some(compression);
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Vec<Codec>) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    #[must_use]
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Array(ArrayInfo),
    /// A dataset this crate cannot describe, such as one of variable-length strings.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

/// A container of nested groups and array datasets.
pub trait ContainerTree {
    /// Storage technology the tree is written with.
    fn backend(&self) -> Backend;

    fn root(&self) -> NodeId;

    /// Children of a group, in a stable order.
    fn children(&self, node: NodeId) -> crate::Result<Vec<NodeId>>;

    fn node(&self, node: NodeId) -> crate::Result<Node>;

    /// Check that `kwargs` could be given to `node` without changing anything.
    fn check_write_parameters(&self, _node: NodeId, _kwargs: &DataWriteKwargs) -> crate::Result<()> {
        Ok(())
    }

    /// Replace the parameters `node` will be written with.
    ///
    /// Takes effect when the tree is next written; performs no I/O.
    fn set_write_parameters(&mut self, node: NodeId, kwargs: DataWriteKwargs) -> crate::Result<()>;
}

#[derive(Debug, Clone)]
struct MemoryNode {
    node: Node,
    children: Vec<NodeId>,
    write_parameters: Option<DataWriteKwargs>,
}

/// A container tree assembled in memory, ahead of being written.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    backend: Backend,
    nodes: Vec<MemoryNode>,
}

impl MemoryTree {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            nodes: vec![MemoryNode {
                node: Node {
                    name: String::new(),
                    kind: NodeKind::Group,
                },
                children: Vec::new(),
                write_parameters: None,
            }],
        }
    }

    fn get(&self, id: NodeId) -> crate::Result<&MemoryNode> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| crate::Error::invalid_tree(format!("unknown node {id:?}")))
    }

    fn add(&mut self, parent: NodeId, node: Node) -> crate::Result<NodeId> {
        if node.name.is_empty() || node.name.contains('/') {
            return Err(crate::Error::invalid_tree(format!(
                "invalid node name {:?}",
                node.name
            )));
        }
        let parent_node = self.get(parent)?;
        if !matches!(parent_node.node.kind, NodeKind::Group) {
            return Err(crate::Error::invalid_tree(format!(
                "cannot add {:?} under array {:?}",
                node.name, parent_node.node.name
            )));
        }
        if parent_node
            .children
            .iter()
            .any(|&c| self.nodes[c.index()].node.name == node.name)
        {
            return Err(crate::Error::invalid_tree(format!(
                "{:?} already has a child named {:?}",
                parent_node.node.name, node.name
            )));
        }
        let id = NodeId::new(self.nodes.len() as u64);
        self.nodes.push(MemoryNode {
            node,
            children: Vec::new(),
            write_parameters: None,
        });
        self.nodes[parent.index()].children.push(id);
        Ok(id)
    }

    pub fn add_group(&mut self, parent: NodeId, name: impl Into<String>) -> crate::Result<NodeId> {
        self.add(
            parent,
            Node {
                name: name.into(),
                kind: NodeKind::Group,
            },
        )
    }

    pub fn add_array(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        info: ArrayInfo,
    ) -> crate::Result<NodeId> {
        self.add(
            parent,
            Node {
                name: name.into(),
                kind: NodeKind::Array(info),
            },
        )
    }

    /// Look up a node by its `/`-separated path from the root.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for name in path.split('/').filter(|s| !s.is_empty()) {
            current = *self.nodes[current.index()]
                .children
                .iter()
                .find(|&&c| self.nodes[c.index()].node.name == name)?;
        }
        Some(current)
    }

    /// Parameters last given to `node`, if any.
    pub fn write_parameters(&self, node: NodeId) -> Option<&DataWriteKwargs> {
        self.nodes.get(node.index())?.write_parameters.as_ref()
    }
}

impl ContainerTree for MemoryTree {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn root(&self) -> NodeId {
        NodeId::new(0)
    }

    fn children(&self, node: NodeId) -> crate::Result<Vec<NodeId>> {
        Ok(self.get(node)?.children.clone())
    }

    fn node(&self, node: NodeId) -> crate::Result<Node> {
        Ok(self.get(node)?.node.clone())
    }

    fn check_write_parameters(&self, node: NodeId, kwargs: &DataWriteKwargs) -> crate::Result<()> {
        let NodeKind::Array(info) = &self.get(node)?.node.kind else {
            return Err(crate::Error::invalid_tree(format!("{node:?} is not an array")));
        };
        if kwargs.chunks().len() != info.shape.len() {
            return Err(crate::Error::configuration(format!(
                "chunk shape {:?} does not match array shape {:?}",
                kwargs.chunks(),
                info.shape
            )));
        }
        if kwargs.backend() != self.backend {
            return Err(crate::Error::configuration(format!(
                "{} write parameters given to a {} tree",
                kwargs.backend(),
                self.backend
            )));
        }
        Ok(())
    }

    fn set_write_parameters(&mut self, node: NodeId, kwargs: DataWriteKwargs) -> crate::Result<()> {
        self.check_write_parameters(node, &kwargs)?;
        self.nodes[node.index()].write_parameters = Some(kwargs);
        Ok(())
    }
}
