use zarrs_chunked_io::tree::ArrayInfo;
use zarrs_chunked_io::{
    Backend, Codec, ContainerConfiguration, ContainerTree, ElementType, Error, MemoryTree,
    discover_datasets,
};

fn init_logger() {
    env_logger::try_init().ok();
}

/// A small recording session: one electrical series, its timestamps and some
/// datasets that cannot take write parameters.
fn session(extra_channels: usize) -> MemoryTree {
    let mut tree = MemoryTree::new(Backend::Hdf5);
    let root = tree.root();
    let acquisition = tree.add_group(root, "acquisition").expect("add group");
    let series = tree
        .add_group(acquisition, "ElectricalSeries")
        .expect("add group");
    tree.add_array(
        series,
        "data",
        ArrayInfo::new(vec![30_000, 384], ElementType::Int16),
    )
    .expect("add array");
    tree.add_array(
        series,
        "timestamps",
        ArrayInfo::new(vec![30_000], ElementType::Float64),
    )
    .expect("add array");
    tree.add_array(
        root,
        "electrodes",
        ArrayInfo::new(
            vec![384],
            ElementType::Compound(vec![
                ("x".to_owned(), ElementType::Float32),
                ("group".to_owned(), ElementType::Int32),
            ]),
        ),
    )
    .expect("add array");
    tree.add_array(
        root,
        "file_create_date",
        ArrayInfo::new(vec![1], ElementType::UInt64).read_only(),
    )
    .expect("add array");
    let processing = tree.add_group(root, "processing").expect("add group");
    for idx in 0..extra_channels {
        tree.add_array(
            processing,
            format!("channel_{idx}"),
            ArrayInfo::new(vec![500, 3], ElementType::Float32),
        )
        .expect("add array");
    }
    tree
}

#[test]
fn test_build_default_is_idempotent() {
    init_logger();
    let tree = session(2);
    let first = ContainerConfiguration::build_default(&tree, Backend::Hdf5).expect("build");
    let second = ContainerConfiguration::build_default(&tree, Backend::Hdf5).expect("build");
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
    for config in first.dataset_configurations() {
        let other = second.get(config.location()).expect("same locations");
        assert_eq!(config.chunk_shape(), other.chunk_shape());
        assert_eq!(config.buffer_shape(), other.buffer_shape());
    }
}

#[test]
fn test_zero_length_dataset_is_excluded() {
    init_logger();
    let mut tree = MemoryTree::new(Backend::Zarr);
    tree.add_array(
        tree.root(),
        "empty",
        ArrayInfo::new(vec![12, 0], ElementType::Float32),
    )
    .expect("add array");
    assert!(discover_datasets(&tree).expect("discover").is_empty());
    let config = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    assert!(config.is_empty());
}

#[test]
fn test_tiny_dataset_is_a_single_chunk() {
    init_logger();
    let mut tree = MemoryTree::new(Backend::Zarr);
    tree.add_array(tree.root(), "tiny", ArrayInfo::new(vec![2, 2], ElementType::UInt8))
        .expect("add array");
    let config = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    let tiny = config.get("tiny").expect("configured");
    assert_eq!(tiny.chunk_shape(), &[2, 2]);
    assert_eq!(tiny.buffer_shape(), &[2, 2]);
}

#[test]
fn test_apply_rejects_count_mismatch_both_ways() {
    init_logger();
    let config = ContainerConfiguration::build_default(&session(1), Backend::Hdf5).expect("build");

    let mut fewer = session(0);
    let err = config.apply(&mut fewer).expect_err("one dataset too few");
    assert!(matches!(err, Error::StructuralMismatch(_)), "{err}");

    let mut more = session(2);
    let err = config.apply(&mut more).expect_err("one dataset too many");
    assert!(matches!(err, Error::StructuralMismatch(_)), "{err}");

    let mut same = session(1);
    config.apply(&mut same).expect("apply");
}

#[test]
fn test_apply_joins_on_location_across_trees() {
    init_logger();
    let source = session(1);
    let mut config = ContainerConfiguration::build_default(&source, Backend::Hdf5).expect("build");
    config
        .get_mut("processing/channel_0")
        .expect("configured")
        .set_compression(Some(Codec::new("lzf")))
        .expect("lzf is an hdf5 filter");

    // Same structure, built in another order so node ids differ.
    let mut destination = MemoryTree::new(Backend::Hdf5);
    let root = destination.root();
    let processing = destination.add_group(root, "processing").expect("add group");
    destination
        .add_array(
            processing,
            "channel_0",
            ArrayInfo::new(vec![500, 3], ElementType::Float32),
        )
        .expect("add array");
    let acquisition = destination.add_group(root, "acquisition").expect("add group");
    let series = destination
        .add_group(acquisition, "ElectricalSeries")
        .expect("add group");
    destination
        .add_array(
            series,
            "timestamps",
            ArrayInfo::new(vec![30_000], ElementType::Float64),
        )
        .expect("add array");
    destination
        .add_array(
            series,
            "data",
            ArrayInfo::new(vec![30_000, 384], ElementType::Int16),
        )
        .expect("add array");
    assert_ne!(
        source.find("processing/channel_0"),
        destination.find("processing/channel_0")
    );

    config.apply(&mut destination).expect("apply");
    let id = destination.find("processing/channel_0").expect("exists");
    let kwargs = destination.write_parameters(id).expect("parameters set");
    let expected = config
        .get("processing/channel_0")
        .expect("configured")
        .get_data_write_kwargs();
    assert_eq!(kwargs, &expected);
}

#[test]
fn test_apply_has_no_partial_effect() {
    init_logger();
    let config = ContainerConfiguration::build_default(&session(1), Backend::Hdf5).expect("build");

    // Same count, but one location differs.
    let mut tree = session(0);
    let root = tree.root();
    tree.add_array(root, "renamed", ArrayInfo::new(vec![500, 3], ElementType::Float32))
        .expect("add array");
    let err = config.apply(&mut tree).expect_err("location missing");
    assert!(matches!(err, Error::StructuralMismatch(_)), "{err}");

    for location in [
        "acquisition/ElectricalSeries/data",
        "acquisition/ElectricalSeries/timestamps",
        "renamed",
    ] {
        let id = tree.find(location).expect("exists");
        assert!(tree.write_parameters(id).is_none(), "{location} was modified");
    }
}

#[test]
fn test_apply_rejects_shape_mismatch() {
    init_logger();
    let config = ContainerConfiguration::build_default(&session(0), Backend::Hdf5).expect("build");
    let mut tree = MemoryTree::new(Backend::Hdf5);
    let acquisition = tree.add_group(tree.root(), "acquisition").expect("add group");
    let series = tree
        .add_group(acquisition, "ElectricalSeries")
        .expect("add group");
    tree.add_array(series, "data", ArrayInfo::new(vec![20_000, 384], ElementType::Int16))
        .expect("add array");
    tree.add_array(series, "timestamps", ArrayInfo::new(vec![30_000], ElementType::Float64))
        .expect("add array");
    assert!(matches!(
        config.apply(&mut tree),
        Err(Error::StructuralMismatch(_))
    ));
}

#[test]
fn test_serde_round_trip_and_validation() {
    init_logger();
    let config = ContainerConfiguration::build_default(&session(1), Backend::Zarr).expect("build");
    let json = serde_json::to_value(&config).expect("serialize");
    let back: ContainerConfiguration = serde_json::from_value(json.clone()).expect("deserialize");
    assert_eq!(back, config);

    let mut broken = json;
    let channel = broken["dataset_configurations"]
        .as_array_mut()
        .expect("configurations are a list")
        .iter_mut()
        .find(|entry| entry["descriptor"]["location"] == "processing/channel_0")
        .expect("channel configured");
    channel["chunk_shape"] = serde_json::json!([501, 3]);
    assert!(serde_json::from_value::<ContainerConfiguration>(broken).is_err());
}

#[test]
fn test_configurations_follow_discovery_order() {
    init_logger();
    let tree = session(1);
    let config = ContainerConfiguration::build_default(&tree, Backend::Zarr).expect("build");
    let configured: Vec<&str> = config
        .dataset_configurations()
        .iter()
        .map(|c| c.location())
        .collect();
    let discovered: Vec<String> = discover_datasets(&tree)
        .expect("discover")
        .into_iter()
        .map(|d| d.location().to_owned())
        .collect();
    assert_eq!(configured, discovered);
    assert_eq!(
        configured,
        vec![
            "processing/channel_0",
            "acquisition/ElectricalSeries/data",
            "acquisition/ElectricalSeries/timestamps",
        ]
    );

    let json = serde_json::to_value(&config).expect("serialize");
    let back: ContainerConfiguration = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back.dataset_configurations(), config.dataset_configurations());
}
