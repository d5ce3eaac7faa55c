//! Tests for network assembly
//!
//! This file tests Network::new including:
//! - Parallel train/test chains
//! - Seeded and supplied weights
//! - Auxiliary-input resolution
//! - Structural errors (first layer, dropout placement, weight groups)

use layernet::architecture::LayerSpec;
use layernet::config::TrainingParams;
use layernet::network::Network;
use layernet::{NetError, Tensor};
use serde_json::json;

fn params(seed: u64) -> TrainingParams {
    TrainingParams::new(seed, 4, 0.1, 2.0)
}

fn conv_specs() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new("InputLayer", json!({"img_sz": 8})),
        LayerSpec::new("ConvLayer", json!({"num_maps": 3, "filter_sz": 3, "actvn": "relu"})),
        LayerSpec::new("PoolLayer", json!({"pool_sz": 2})),
        LayerSpec::new("DropOutLayer", json!({"pdrop": 0.2})),
        LayerSpec::new("HiddenLayer", json!({"n_out": 10, "actvn": "tanh"})),
        LayerSpec::new("SoftmaxLayer", json!({"n_out": 3})),
    ]
}

// ============================================================================
// Chain Assembly Tests
// ============================================================================

mod chain_tests {
    use super::*;

    #[test]
    fn test_train_and_test_chains_have_equal_length() {
        let net = Network::new(conv_specs(), params(7), None).unwrap();
        assert_eq!(net.graph().train().len(), 6);
        assert_eq!(net.graph().test().len(), 6);
        assert_eq!(net.weights().len(), 6);
    }

    #[test]
    fn test_chains_share_tags_position_by_position() {
        let net = Network::new(conv_specs(), params(7), None).unwrap();
        for (train, test) in net.graph().train().iter().zip(net.graph().test()) {
            assert_eq!(train.layer().tag(), test.layer().tag());
            assert_eq!(train.flattens_input(), test.flattens_input());
        }
    }

    #[test]
    fn test_weight_shapes_follow_wiring() {
        let net = Network::new(conv_specs(), params(7), None).unwrap();
        let weights = net.weights();
        // 8x8 input, 3x3 valid conv -> 6x6, pool 2 -> 3x3
        assert_eq!(weights[1][0].shape(), &[3, 1, 3, 3]);
        assert!(weights[2].is_empty());
        assert!(weights[3].is_empty());
        assert_eq!(weights[4][0].shape(), &[27, 10]);
        assert_eq!(weights[5][0].shape(), &[10, 3]);
    }

    #[test]
    fn test_flat_layers_flatten_their_input() {
        let net = Network::new(conv_specs(), params(7), None).unwrap();
        let flags: Vec<bool> = net
            .graph()
            .train()
            .iter()
            .map(|node| node.flattens_input())
            .collect();
        assert_eq!(flags, vec![false, false, false, false, true, true]);
    }

    #[test]
    fn test_mean_pool_after_dropout_uses_map_shape() {
        let specs = vec![
            LayerSpec::new("ElasticLayer", json!({"img_sz": 10, "magnitude": 1.0})),
            LayerSpec::new("ConvLayer", json!({"num_maps": 2, "filter_sz": 3})),
            LayerSpec::new("DropOutLayer", json!({"pdrop": 0.5})),
            LayerSpec::new("MeanLayer", json!({"pool_sz": 2})),
            LayerSpec::new("SVMLayer", json!({"n_out": 4})),
        ];
        let net = Network::new(specs, params(3), None).unwrap();
        assert_eq!(net.weights()[4][0].shape(), &[2 * 4 * 4, 4]);
    }
}

// ============================================================================
// Weight Initialization Tests
// ============================================================================

mod weight_tests {
    use super::*;

    #[test]
    fn test_same_seed_gives_identical_weights() {
        let a = Network::new(conv_specs(), params(11), None).unwrap();
        let b = Network::new(conv_specs(), params(11), None).unwrap();
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn test_different_seed_gives_different_weights() {
        let a = Network::new(conv_specs(), params(11), None).unwrap();
        let b = Network::new(conv_specs(), params(12), None).unwrap();
        assert_ne!(a.weights(), b.weights());
    }

    #[test]
    fn test_supplied_weights_are_used_verbatim() {
        let source = Network::new(conv_specs(), params(5), None).unwrap();
        let mut allwts = source.weights();
        for w in allwts[4][0].data_mut() {
            *w *= 0.5;
        }
        let net = Network::new(conv_specs(), params(99), Some(allwts.clone())).unwrap();

        let restored = net.weights();
        for (group, expected) in restored.iter().zip(&allwts) {
            for (w, e) in group.iter().zip(expected) {
                assert_eq!(w.shape(), e.shape());
                let bits: Vec<u32> = w.data().iter().map(|v| v.to_bits()).collect();
                let expected_bits: Vec<u32> = e.data().iter().map(|v| v.to_bits()).collect();
                assert_eq!(bits, expected_bits);
            }
        }
    }

    #[test]
    fn test_weight_set_with_missing_group_is_malformed() {
        let mut allwts = Network::new(conv_specs(), params(5), None).unwrap().weights();
        allwts.pop();
        let result = Network::new(conv_specs(), params(5), Some(allwts));
        assert!(matches!(result, Err(NetError::MalformedWeights { .. })));
    }

    #[test]
    fn test_weight_with_wrong_shape_is_malformed() {
        let mut allwts = Network::new(conv_specs(), params(5), None).unwrap().weights();
        allwts[5][0] = Tensor::zeros(vec![9, 3]);
        let result = Network::new(conv_specs(), params(5), Some(allwts));
        assert!(matches!(
            result,
            Err(NetError::MalformedWeights { layer: 5, .. })
        ));
    }

    #[test]
    fn test_centered_group_must_have_four_tensors() {
        let specs = vec![
            LayerSpec::new("InputLayer", json!({"img_sz": 3})),
            LayerSpec::new(
                "CenteredOutLayer",
                json!({"n_features": 4, "n_classes": 2}),
            ),
        ];
        let mut allwts = Network::new(specs.clone(), params(5), None).unwrap().weights();
        assert_eq!(allwts[1].len(), 4);
        allwts[1].truncate(2);
        let result = Network::new(specs, params(5), Some(allwts));
        assert!(matches!(
            result,
            Err(NetError::MalformedWeights { layer: 1, .. })
        ));
    }

    #[test]
    fn test_centered_norms_shape_is_checked() {
        let specs = vec![
            LayerSpec::new("InputLayer", json!({"img_sz": 3})),
            LayerSpec::new(
                "CenteredOutLayer",
                json!({"n_features": 4, "n_classes": 2}),
            ),
        ];
        let mut allwts = Network::new(specs.clone(), params(5), None).unwrap().weights();
        assert_eq!(allwts[1][2].shape(), &[2]);
        allwts[1][2] = Tensor::zeros(vec![5]);
        let result = Network::new(specs, params(5), Some(allwts));
        assert!(matches!(
            result,
            Err(NetError::MalformedWeights { layer: 1, .. })
        ));
    }
}

// ============================================================================
// Structural Error Tests
// ============================================================================

mod structure_tests {
    use super::*;

    #[test]
    fn test_hidden_first_is_configuration_error() {
        let specs = vec![
            LayerSpec::new("HiddenLayer", json!({"n_out": 4})),
            LayerSpec::new("SoftmaxLayer", json!({"n_out": 2})),
        ];
        let result = Network::new(specs, params(1), None);
        assert!(matches!(result, Err(NetError::Configuration(_))));
    }

    #[test]
    fn test_softmax_first_is_configuration_error() {
        let specs = vec![LayerSpec::new("SoftmaxLayer", json!({"n_out": 2}))];
        let result = Network::new(specs, params(1), None);
        assert!(matches!(result, Err(NetError::Configuration(_))));
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let specs = vec![
            LayerSpec::new("InputLayer", json!({"img_sz": 4})),
            LayerSpec::new("LstmLayer", json!({})),
        ];
        match Network::new(specs, params(1), None) {
            Err(NetError::UnsupportedLayer(tag)) => assert_eq!(tag, "LstmLayer"),
            other => panic!("expected UnsupportedLayer, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_consecutive_dropout_rejected() {
        let specs = vec![
            LayerSpec::new("InputLayer", json!({"img_sz": 4})),
            LayerSpec::new("HiddenLayer", json!({"n_out": 6})),
            LayerSpec::new("DropOutLayer", json!({"pdrop": 0.2})),
            LayerSpec::new("DropOutLayer", json!({"pdrop": 0.2})),
            LayerSpec::new("SoftmaxLayer", json!({"n_out": 2})),
        ];
        let result = Network::new(specs, params(1), None);
        assert!(matches!(
            result,
            Err(NetError::ConsecutiveDropout { layer: 2 })
        ));
    }

    #[test]
    fn test_two_aux_layers_rejected_in_either_order() {
        let orders = [
            ("AuxConcatLayer", "SoftAuxLayer"),
            ("SoftAuxLayer", "AuxConcatLayer"),
        ];
        for (first, second) in orders {
            let mut specs = vec![LayerSpec::new("InputLayer", json!({"img_sz": 2}))];
            for tag in [first, second] {
                specs.push(match tag {
                    "AuxConcatLayer" => LayerSpec::new(tag, json!({"n_aux": 3})),
                    _ => LayerSpec::new(tag, json!({"n_out": 4, "n_aux": 2})),
                });
            }
            specs.push(LayerSpec::new("SoftmaxLayer", json!({"n_out": 2})));
            let result = Network::new(specs, params(1), None);
            assert!(
                matches!(
                    result,
                    Err(NetError::MultipleAuxiliaryInput {
                        first: 1,
                        second: 2
                    })
                ),
                "order {} then {}",
                first,
                second
            );
        }
    }

    #[test]
    fn test_single_aux_layer_is_recorded() {
        let specs = vec![
            LayerSpec::new("InputLayer", json!({"img_sz": 2})),
            LayerSpec::new("HiddenLayer", json!({"n_out": 5})),
            LayerSpec::new("SoftAuxLayer", json!({"n_out": 3, "n_aux": 2})),
        ];
        let net = Network::new(specs, params(1), None).unwrap();
        let handles = net.aux_handles().unwrap();
        assert_eq!(handles.train.layer, 2);
        assert_eq!(handles.test.layer, 2);
        assert_eq!(handles.train.width, 2);
        assert!(net.takes_aux());
    }

    #[test]
    fn test_no_network_without_valid_params() {
        let mut bad = params(1);
        bad.batch_sz = 0;
        let result = Network::new(conv_specs(), bad, None);
        assert!(matches!(result, Err(NetError::InvalidParams(_))));
    }

    #[test]
    fn test_layer_order_checked_before_params() {
        let specs = vec![
            LayerSpec::new("HiddenLayer", json!({"n_out": 4})),
            LayerSpec::new("SoftmaxLayer", json!({"n_out": 2})),
        ];
        let mut bad = params(1);
        bad.batch_sz = 0;
        let result = Network::new(specs, bad, None);
        assert!(matches!(result, Err(NetError::Configuration(_))));
    }
}
