//! Write configurations for every dataset of a container tree.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::configuration::{Backend, Codec, DEFAULT_COMPRESSION_METHOD, DataWriteKwargs, DatasetWriteConfiguration};
use crate::descriptor::{discover_arrays, discover_datasets};
use crate::shape::{
    ChunkShapePolicy, DEFAULT_BUFFER_BYTE_BUDGET, DEFAULT_CHUNK_BYTE_BUDGET, default_buffer_shape,
    shape_bytes,
};
use crate::tree::{ContainerTree, NodeId};

/// Budgets, chunk policy and compressor used by [`ContainerConfiguration::build_default_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub chunk_byte_budget: u64,
    pub buffer_byte_budget: u64,
    pub chunk_shape_policy: ChunkShapePolicy,
    /// Compressor attached to every dataset. `None` leaves datasets uncompressed.
    pub compression: Option<Codec>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk_byte_budget: DEFAULT_CHUNK_BYTE_BUDGET,
            buffer_byte_budget: DEFAULT_BUFFER_BYTE_BUDGET,
            chunk_shape_policy: ChunkShapePolicy::default(),
            compression: Some(Codec::new(DEFAULT_COMPRESSION_METHOD)),
        }
    }
}

/// Write configurations of a container, one per dataset location.
///
/// Configurations are kept in discovery order: breadth-first, so shallower
/// datasets come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedContainerConfiguration")]
pub struct ContainerConfiguration {
    backend: Backend,
    dataset_configurations: Vec<DatasetWriteConfiguration>,
}

#[derive(Deserialize)]
struct UncheckedContainerConfiguration {
    backend: Backend,
    dataset_configurations: Vec<DatasetWriteConfiguration>,
}

impl TryFrom<UncheckedContainerConfiguration> for ContainerConfiguration {
    type Error = crate::Error;

    fn try_from(value: UncheckedContainerConfiguration) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        for config in &value.dataset_configurations {
            let location = config.location();
            if !seen.insert(location) {
                return Err(crate::Error::configuration(format!(
                    "more than one configuration for {location:?}"
                )));
            }
            if config.backend() != value.backend {
                return Err(crate::Error::configuration(format!(
                    "{location}: {} configuration in a {} container",
                    config.backend(),
                    value.backend
                )));
            }
        }
        Ok(Self {
            backend: value.backend,
            dataset_configurations: value.dataset_configurations,
        })
    }
}

impl ContainerConfiguration {
    /// Default configurations for every writable dataset in `tree`.
    pub fn build_default<T: ContainerTree + ?Sized>(tree: &T, backend: Backend) -> crate::Result<Self> {
        Self::build_default_with(tree, backend, &BuildOptions::default())
    }

    pub fn build_default_with<T: ContainerTree + ?Sized>(
        tree: &T,
        backend: Backend,
        options: &BuildOptions,
    ) -> crate::Result<Self> {
        let mut dataset_configurations = Vec::new();
        for descriptor in discover_datasets(tree)? {
            let config = DatasetWriteConfiguration::from_budgets(
                backend,
                descriptor,
                options.chunk_byte_budget,
                options.buffer_byte_budget,
                options.chunk_shape_policy,
                options.compression.clone(),
            )?;
            insert_unique(&mut dataset_configurations, config)?;
        }
        log::info!(
            "built default {backend} configuration for {} datasets",
            dataset_configurations.len()
        );
        Ok(Self {
            backend,
            dataset_configurations,
        })
    }

    /// Configurations matching what `tree` has already committed.
    ///
    /// Chunked datasets keep their chunk shape (clipped to the array) and codecs,
    /// with a buffer sized by the default buffer budget or one chunk, whichever is
    /// larger. Unchunked datasets are buffered whole and uncompressed.
    pub fn read_existing<T: ContainerTree + ?Sized>(tree: &T) -> crate::Result<Self> {
        let backend = tree.backend();
        let mut dataset_configurations = Vec::new();
        for (descriptor, info) in discover_arrays(tree)? {
            let full_shape = descriptor.full_shape().to_vec();
            let config = match info.chunk_shape {
                Some(chunk_shape) => {
                    if chunk_shape.len() != full_shape.len() {
                        return Err(crate::Error::invalid_tree(format!(
                            "{}: chunk shape {chunk_shape:?} does not match shape {full_shape:?}",
                            descriptor.location()
                        )));
                    }
                    let chunk_shape: Vec<u64> = chunk_shape
                        .iter()
                        .zip(&full_shape)
                        .map(|(&chunk, &full)| chunk.min(full))
                        .collect();
                    let itemsize = descriptor.element_type().itemsize();
                    let chunk_bytes =
                        u64::try_from(shape_bytes(&chunk_shape, itemsize)).unwrap_or(u64::MAX);
                    let buffer_shape = default_buffer_shape(
                        &full_shape,
                        &chunk_shape,
                        itemsize,
                        DEFAULT_BUFFER_BYTE_BUDGET.max(chunk_bytes),
                    )?;
                    let mut config = DatasetWriteConfiguration::new(
                        backend,
                        descriptor,
                        chunk_shape,
                        buffer_shape,
                        info.compression,
                    )?;
                    config.set_filters(info.filters)?;
                    config
                }
                None => DatasetWriteConfiguration::new(
                    backend,
                    descriptor,
                    full_shape.clone(),
                    full_shape,
                    None,
                )?,
            };
            insert_unique(&mut dataset_configurations, config)?;
        }
        log::info!(
            "read existing {backend} configuration for {} datasets",
            dataset_configurations.len()
        );
        Ok(Self {
            backend,
            dataset_configurations,
        })
    }

    /// Give every configured dataset of `tree` its write parameters.
    ///
    /// Datasets are matched by location. All entries are resolved and checked
    /// against `tree` before any of them is set, so a failure leaves `tree`
    /// untouched. Nothing is written to storage.
    pub fn apply<T: ContainerTree + ?Sized>(&self, tree: &mut T) -> crate::Result<()> {
        if tree.backend() != self.backend {
            return Err(crate::Error::structural_mismatch(format!(
                "{} configuration cannot be applied to a {} container",
                self.backend,
                tree.backend()
            )));
        }
        let live: HashMap<String, (NodeId, Vec<u64>)> = discover_datasets(tree)?
            .into_iter()
            .map(|d| (d.location().to_owned(), (d.id(), d.full_shape().to_vec())))
            .collect();
        if live.len() != self.dataset_configurations.len() {
            return Err(crate::Error::structural_mismatch(format!(
                "container has {} writable datasets but the configuration has {}",
                live.len(),
                self.dataset_configurations.len()
            )));
        }

        let mut resolved: Vec<(NodeId, DataWriteKwargs)> = Vec::with_capacity(live.len());
        for config in &self.dataset_configurations {
            let location = config.location();
            let Some((id, shape)) = live.get(location) else {
                return Err(crate::Error::structural_mismatch(format!(
                    "dataset {location} is not in the container"
                )));
            };
            if shape.as_slice() != config.descriptor().full_shape() {
                return Err(crate::Error::structural_mismatch(format!(
                    "dataset {location} has shape {shape:?}, configured for {:?}",
                    config.descriptor().full_shape()
                )));
            }
            let kwargs = config.get_data_write_kwargs();
            tree.check_write_parameters(*id, &kwargs)?;
            resolved.push((*id, kwargs));
        }

        for (id, kwargs) in resolved {
            tree.set_write_parameters(id, kwargs)?;
        }
        log::info!(
            "applied {} configuration to {} datasets",
            self.backend,
            self.dataset_configurations.len()
        );
        Ok(())
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Every configuration, in discovery order.
    pub fn dataset_configurations(&self) -> &[DatasetWriteConfiguration] {
        &self.dataset_configurations
    }

    pub fn get(&self, location: &str) -> Option<&DatasetWriteConfiguration> {
        self.dataset_configurations
            .iter()
            .find(|config| config.location() == location)
    }

    /// Mutable access for adjusting one dataset; setters revalidate.
    pub fn get_mut(&mut self, location: &str) -> Option<&mut DatasetWriteConfiguration> {
        self.dataset_configurations
            .iter_mut()
            .find(|config| config.location() == location)
    }

    pub fn len(&self) -> usize {
        self.dataset_configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset_configurations.is_empty()
    }
}

fn insert_unique(
    configs: &mut Vec<DatasetWriteConfiguration>,
    config: DatasetWriteConfiguration,
) -> crate::Result<()> {
    if configs.iter().any(|c| c.location() == config.location()) {
        return Err(crate::Error::invalid_tree(format!(
            "more than one dataset at {}",
            config.location()
        )));
    }
    configs.push(config);
    Ok(())
}

impl fmt::Display for ContainerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} configuration of {} datasets",
            self.backend,
            self.dataset_configurations.len()
        )?;
        for config in &self.dataset_configurations {
            writeln!(f)?;
            write!(f, "{config}")?;
        }
        Ok(())
    }
}
