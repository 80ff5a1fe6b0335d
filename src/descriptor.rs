//! Discovery of the array datasets in a container tree that can take write parameters.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::data_type::ElementType;
use crate::tree::{ArrayInfo, ContainerTree, NodeId, NodeKind};

/// Identity, location and layout of one array dataset.
///
/// The `id` is only meaningful for the tree the descriptor was discovered in;
/// use [`location`](Self::location) to match datasets across trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    id: NodeId,
    location: String,
    full_shape: Vec<u64>,
    element_type: ElementType,
}

impl DatasetDescriptor {
    pub fn new(
        id: NodeId,
        location: impl Into<String>,
        full_shape: Vec<u64>,
        element_type: ElementType,
    ) -> Self {
        Self {
            id,
            location: location.into(),
            full_shape,
            element_type,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// `/`-separated path from the tree root, without a leading slash.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn full_shape(&self) -> &[u64] {
        &self.full_shape
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }
}

fn skip_reason(info: &ArrayInfo) -> Option<&'static str> {
    if !info.writable {
        Some("not writable")
    } else if info.shape.is_empty() {
        Some("scalar")
    } else if info.shape.contains(&0) {
        Some("zero-length axis")
    } else if info.external {
        Some("stored in an external file")
    } else if info.element_type.is_compound() {
        Some("compound element type")
    } else {
        None
    }
}

/// Breadth-first discovery returning the array metadata alongside each descriptor.
pub(crate) fn discover_arrays<T: ContainerTree + ?Sized>(
    tree: &T,
) -> crate::Result<Vec<(DatasetDescriptor, ArrayInfo)>> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([(tree.root(), String::new())]);
    while let Some((id, location)) = queue.pop_front() {
        let node = tree.node(id)?;
        match node.kind {
            NodeKind::Group => {
                for child in tree.children(id)? {
                    let name = tree.node(child)?.name;
                    let child_location = if location.is_empty() {
                        name
                    } else {
                        format!("{location}/{name}")
                    };
                    queue.push_back((child, child_location));
                }
            }
            NodeKind::Array(info) => {
                if let Some(reason) = skip_reason(&info) {
                    log::debug!("skipping dataset {location:?}: {reason}");
                    continue;
                }
                let descriptor = DatasetDescriptor::new(
                    id,
                    location,
                    info.shape.clone(),
                    info.element_type.clone(),
                );
                out.push((descriptor, info));
            }
            NodeKind::Unsupported(reason) => {
                log::debug!("skipping dataset {location:?}: {reason}");
            }
        }
    }
    Ok(out)
}

/// Descriptors of every dataset in `tree` that can take new write parameters.
///
/// The walk is breadth-first, so shallower datasets always precede deeper
/// ones. A root that is itself an array is reported with an empty location.
/// Arrays that are read-only, scalar, have a zero-length axis, live in an
/// external file or have a compound or unsupported element type are left out.
pub fn discover_datasets<T: ContainerTree + ?Sized>(
    tree: &T,
) -> crate::Result<Vec<DatasetDescriptor>> {
    Ok(discover_arrays(tree)?
        .into_iter()
        .map(|(descriptor, _)| descriptor)
        .collect())
}
