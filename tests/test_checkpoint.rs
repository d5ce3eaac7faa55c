//! Tests for saving and restoring trained networks
//!
//! This file tests:
//! - In-memory rebuild from get_init_params
//! - JSON file round trips through tempfile
//! - Identical test outputs after restore
//! - Rejection of corrupt or truncated checkpoints

use layernet::architecture::LayerSpec;
use layernet::checkpoint::Checkpoint;
use layernet::compile::Dataset;
use layernet::config::TrainingParams;
use layernet::network::Network;
use layernet::utils::SimpleRng;
use layernet::Tensor;
use serde_json::json;

fn specs() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new("ElasticLayer", json!({"img_sz": 6, "magnitude": 0.5, "translation": 1.0})),
        LayerSpec::new("ConvLayer", json!({"num_maps": 2, "filter_sz": 3, "l2_reg": 0.001})),
        LayerSpec::new("PoolLayer", json!({"pool_sz": 2})),
        LayerSpec::new("DropOutLayer", json!({"pdrop": 0.25})),
        LayerSpec::new("HiddenLayer", json!({"n_out": 5, "actvn": "sigmoid"})),
        LayerSpec::new("SoftmaxLayer", json!({"n_out": 3})),
    ]
}

fn data(n: usize) -> Dataset {
    let mut rng = SimpleRng::new(17);
    let x = Tensor::from_fn(vec![n, 36], || rng.next_f32());
    Dataset::new(x, (0..n).map(|i| i % 3).collect()).unwrap()
}

/// Trains a fresh network for a few steps so its weights differ from the seed.
fn trained() -> Network {
    let net = Network::new(specs(), TrainingParams::new(8, 3, 0.2, 2.0), None).unwrap();
    let train = net.compile_train(data(9)).unwrap();
    for i in 0..train.num_batches() {
        train.call(i).unwrap();
    }
    net
}

fn assert_same_test_outputs(a: &Network, b: &Network) {
    let test_a = a.compile_test(data(9), true).unwrap();
    let test_b = b.compile_test(data(9), true).unwrap();
    for i in 0..test_a.num_batches() {
        let sa = test_a.call(i).unwrap();
        let sb = test_b.call(i).unwrap();
        assert_eq!(sa.predictions, sb.predictions);
        assert_eq!(sa.errors, sb.errors);
        assert_eq!(sa.features, sb.features);
    }
}

// ============================================================================
// Round Trip Tests
// ============================================================================

#[test]
fn test_in_memory_round_trip() {
    let net = trained();
    let restored = Network::from_checkpoint(net.get_init_params()).unwrap();
    assert_eq!(restored.weights(), net.weights());
    assert_eq!(restored.layer_specs(), net.layer_specs());
    assert_same_test_outputs(&net, &restored);
}

#[test]
fn test_file_round_trip() {
    let net = trained();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trained.json");

    net.get_init_params().save(&path).unwrap();
    let loaded = Checkpoint::load(&path).unwrap();
    assert_eq!(loaded, net.get_init_params());

    let restored = Network::from_checkpoint(loaded).unwrap();
    assert_same_test_outputs(&net, &restored);
}

#[test]
fn test_checkpoint_json_layout() {
    let net = trained();
    let value = serde_json::to_value(net.get_init_params()).unwrap();
    assert_eq!(value["layers"][0]["type_tag"], "ElasticLayer");
    assert_eq!(value["training_params"]["BATCH_SZ"], 3);
    assert_eq!(value["allwts"].as_array().unwrap().len(), 6);
    assert!(value["allwts"][2].as_array().unwrap().is_empty());
}

#[test]
fn test_corrupt_file_is_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"layers\": [").unwrap();
    assert!(matches!(
        Checkpoint::load(&path),
        Err(layernet::NetError::Json(_))
    ));
}

#[test]
fn test_truncated_tensor_is_rejected() {
    let net = trained();
    let mut value = serde_json::to_value(net.get_init_params()).unwrap();
    let data = value["allwts"][1][0]["data"].as_array_mut().unwrap();
    assert_eq!(data.len(), 2 * 3 * 3);
    data.truncate(16);
    assert!(serde_json::from_value::<Checkpoint>(value.clone()).is_err());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.json");
    std::fs::write(&path, value.to_string()).unwrap();
    assert!(matches!(
        Checkpoint::load(&path),
        Err(layernet::NetError::Json(_))
    ));
}
