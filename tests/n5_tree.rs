use std::sync::Arc;

use serde_json::{Value, json};
use zarrs::storage::store::MemoryStore;
use zarrs::storage::{ReadableStorageTraits, StoreKey, WritableStorageTraits};
use zarrs_chunked_io::n5::{N5Compression, N5Metadata, N5Tree};
use zarrs_chunked_io::tree::NodeKind;
use zarrs_chunked_io::{
    Backend, Codec, ContainerConfiguration, ContainerTree, DataWriteKwargs, Error,
};

fn put(store: &MemoryStore, key: &str, value: Value) {
    store
        .set(
            &StoreKey::new(key).expect("valid key"),
            serde_json::to_vec(&value).expect("serialize").into(),
        )
        .expect("set");
}

/// An N5 hierarchy with two empty arrays and an implicit group.
fn n5_store() -> Arc<MemoryStore> {
    env_logger::try_init().ok();
    let store = MemoryStore::new();
    put(&store, "attributes.json", json!({"n5": "4.0.0"}));
    put(
        &store,
        "volumes/raw/attributes.json",
        json!({
            "dimensions": [256, 512, 40],
            "blockSize": [64, 64, 10],
            "dataType": "uint8",
            "compression": {"type": "gzip", "level": -1},
            "resolution": [4, 4, 40],
        }),
    );
    put(
        &store,
        "labels/attributes.json",
        json!({
            "dimensions": [1000],
            "blockSize": [2000],
            "dataType": "uint64",
            "compression": {"type": "raw"},
        }),
    );
    Arc::new(store)
}

#[test]
fn test_open_hierarchy() {
    let tree = N5Tree::open(n5_store()).expect("open");
    assert_eq!(tree.backend(), Backend::Zarr);

    let volumes = tree.find("volumes").expect("implicit group");
    assert!(matches!(tree.node(volumes).expect("node").kind, NodeKind::Group));

    let labels = tree.find("labels").expect("array");
    assert!(tree.children(labels).expect("children").is_empty());

    let raw = tree.find("volumes/raw").expect("array");
    let NodeKind::Array(info) = tree.node(raw).expect("node").kind else {
        panic!("expected an array");
    };
    assert_eq!(info.shape, vec![40, 512, 256]);
    assert_eq!(info.chunk_shape, Some(vec![10, 64, 64]));
    assert_eq!(
        info.compression,
        Some(Codec::new("gzip").with_option("level", 6))
    );
}

#[test]
fn test_read_existing() {
    let tree = N5Tree::open(n5_store()).expect("open");
    let config = ContainerConfiguration::read_existing(&tree).expect("read");
    assert_eq!(config.len(), 2);

    let raw = config.get("volumes/raw").expect("configured");
    assert_eq!(raw.chunk_shape(), &[10, 64, 64]);
    // 5 MB fits the default buffer budget whole.
    assert_eq!(raw.buffer_shape(), &[40, 512, 256]);
    assert_eq!(raw.compression_method(), Some("gzip"));

    let labels = config.get("labels").expect("configured");
    assert_eq!(labels.chunk_shape(), &[1000], "block size clipped to the array");
    assert_eq!(labels.compression(), None);
}

#[test]
fn test_apply_and_store_metadata() {
    let store = n5_store();
    let mut tree = N5Tree::open(store.clone()).expect("open");
    let mut config = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    config
        .get_mut("volumes/raw")
        .expect("configured")
        .set_compression(Some(Codec::new("bz2").with_option("level", 5)))
        .expect("bz2 is a zarr compressor");
    let raw_chunks = config
        .get("volumes/raw")
        .expect("configured")
        .chunk_shape()
        .to_vec();

    config.apply(&mut tree).expect("apply");
    let raw = tree.find("volumes/raw").expect("array");
    let pending = tree.pending_metadata(raw).expect("pending");
    assert_eq!(pending.compression, N5Compression::Bzip2 { block_size: 5 });
    assert_eq!(pending.chunk_shape(), raw_chunks);
    assert_eq!(pending.attributes["resolution"], json!([4, 4, 40]));

    // Nothing is written until the tree is stored.
    let committed = tree.metadata(raw).and_then(N5Metadata::as_array).expect("array");
    assert_eq!(committed.block_size, vec![64, 64, 10]);

    assert_eq!(tree.store_metadata().expect("store"), 2);
    assert!(tree.pending_metadata(raw).is_none());

    let bytes = store
        .get(&StoreKey::new("volumes/raw/attributes.json").expect("valid key"))
        .expect("get")
        .expect("present");
    let written: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(written["compression"], json!({"type": "bzip2", "blockSize": 5}));
    assert_eq!(written["dataType"], json!("uint8"));

    let reopened = N5Tree::open(store).expect("reopen");
    let reread = ContainerConfiguration::read_existing(&reopened).expect("read");
    assert_eq!(
        reread.get("volumes/raw").expect("configured").chunk_shape(),
        raw_chunks.as_slice()
    );
}

#[test]
fn test_rejected_write_parameters() {
    let mut tree = N5Tree::open(n5_store()).expect("open");
    let labels = tree.find("labels").expect("array");

    let hdf5 = DataWriteKwargs::Hdf5 {
        chunks: vec![100],
        compression: None,
        compression_opts: None,
    };
    assert!(tree.set_write_parameters(labels, hdf5).is_err());

    let with_filters = DataWriteKwargs::Zarr {
        chunks: vec![100],
        compressor: None,
        filters: Some(vec![(&Codec::new("delta")).into()]),
    };
    assert!(tree.set_write_parameters(labels, with_filters).is_err());

    let zstd = DataWriteKwargs::Zarr {
        chunks: vec![100],
        compressor: Some((&Codec::new("zstd")).into()),
        filters: None,
    };
    assert!(matches!(
        tree.check_write_parameters(labels, &zstd),
        Err(Error::Configuration(_))
    ));
    assert!(tree.pending_metadata(labels).is_none());

    let volumes = tree.find("volumes").expect("group");
    let plain = DataWriteKwargs::Zarr {
        chunks: vec![100],
        compressor: None,
        filters: None,
    };
    assert!(tree.set_write_parameters(volumes, plain).is_err());
}

#[test]
fn test_unsupported_compression_is_read_only() {
    let store = n5_store();
    put(
        &store,
        "volumes/blosc/attributes.json",
        json!({
            "dimensions": [10],
            "blockSize": [5],
            "dataType": "float32",
            "compression": {"type": "blosc", "cname": "lz4", "clevel": 5},
        }),
    );
    let tree = N5Tree::open(store).expect("open");
    let config = ContainerConfiguration::read_existing(&tree).expect("read");
    assert_eq!(config.len(), 2);
    assert!(config.get("volumes/blosc").is_none());
}

fn put_block(store: &MemoryStore, key: &str) {
    store
        .set(&StoreKey::new(key).expect("valid key"), vec![0u8; 16].into())
        .expect("set");
}

#[test]
fn test_arrays_with_blocks_are_read_only() {
    let store = n5_store();
    put(
        &store,
        "filled/attributes.json",
        json!({
            "dimensions": [4],
            "blockSize": [2],
            "dataType": "uint8",
            "compression": {"type": "raw"},
        }),
    );
    put_block(&store, "filled/0");
    put_block(&store, "filled/1");
    let before = store
        .get(&StoreKey::new("filled/attributes.json").expect("valid key"))
        .expect("get")
        .expect("present");

    let mut tree = N5Tree::open(store.clone()).expect("open");
    let filled = tree.find("filled").expect("array");
    let NodeKind::Array(info) = tree.node(filled).expect("node").kind else {
        panic!("expected an array");
    };
    assert!(!info.writable);

    let config = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    assert_eq!(config.len(), 2);
    assert!(config.get("filled").is_none());

    let kwargs = DataWriteKwargs::Zarr {
        chunks: vec![4],
        compressor: Some((&Codec::new("gzip")).into()),
        filters: None,
    };
    assert!(matches!(
        tree.set_write_parameters(filled, kwargs),
        Err(Error::Configuration(_))
    ));
    config.apply(&mut tree).expect("apply to the empty arrays");
    assert_eq!(tree.store_metadata().expect("store"), 2);

    let after = store
        .get(&StoreKey::new("filled/attributes.json").expect("valid key"))
        .expect("get")
        .expect("present");
    assert_eq!(before, after, "metadata of a filled array is left alone");
}

#[test]
fn test_nested_block_directories_count_as_blocks() {
    let store = n5_store();
    put(
        &store,
        "grid/attributes.json",
        json!({
            "dimensions": [4, 4],
            "blockSize": [2, 2],
            "dataType": "int16",
            "compression": {"type": "gzip"},
        }),
    );
    put_block(&store, "grid/1/0");

    let tree = N5Tree::open(store).expect("open");
    let config = ContainerConfiguration::read_existing(&tree).expect("read");
    assert!(config.get("grid").is_none());
    assert!(config.get("labels").is_some());
}

#[test]
fn test_root_array() {
    env_logger::try_init().ok();
    let store = MemoryStore::new();
    put(
        &store,
        "attributes.json",
        json!({
            "n5": "4.0.0",
            "dimensions": [100],
            "blockSize": [10],
            "dataType": "uint8",
            "compression": {"type": "raw"},
        }),
    );
    let mut tree = N5Tree::open(Arc::new(store)).expect("open");
    assert!(matches!(
        tree.node(tree.root()).expect("node").kind,
        NodeKind::Array(_)
    ));

    let descriptors = zarrs_chunked_io::discover_datasets(&tree).expect("discover");
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].location(), "");
    assert_eq!(descriptors[0].full_shape(), &[100]);

    let config = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    assert_eq!(config.len(), 1);
    assert_eq!(config.get("").expect("root configured").chunk_shape(), &[100]);

    config.apply(&mut tree).expect("apply");
    let pending = tree.pending_metadata(tree.root()).expect("pending");
    assert_eq!(pending.chunk_shape(), vec![100]);
    assert_eq!(pending.n5_version.as_deref(), Some("4.0.0"));
}

#[test]
fn test_unsupported_data_type_is_skipped() {
    let store = n5_store();
    put(
        &store,
        "volumes/strings/attributes.json",
        json!({
            "dimensions": [10],
            "blockSize": [5],
            "dataType": "object",
            "compression": {"type": "raw"},
        }),
    );
    let mut tree = N5Tree::open(store).expect("open");
    let strings = tree.find("volumes/strings").expect("dataset");
    assert!(matches!(
        tree.node(strings).expect("node").kind,
        NodeKind::Unsupported(_)
    ));

    let built = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    assert_eq!(built.len(), 2);
    assert!(built.get("volumes/strings").is_none());
    let read = ContainerConfiguration::read_existing(&tree).expect("read");
    assert_eq!(read.len(), 2);

    let kwargs = DataWriteKwargs::Zarr {
        chunks: vec![5],
        compressor: None,
        filters: None,
    };
    assert!(tree.set_write_parameters(strings, kwargs).is_err());
    built.apply(&mut tree).expect("apply");
}
