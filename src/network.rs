//! Network assembly
//!
//! [`Network::new`] turns an ordered list of layer specs into two parallel chains of
//! layer instances, one for training and one for evaluation, backed by a single
//! weight store. Wiring rules per layer type:
//!
//! * map consumers (`ConvLayer`, `PoolLayer`, `MeanLayer`) read map count and size from
//!   the previous layer, or from the one before it when the previous layer is a dropout
//! * flat consumers (hidden, aux-concat and output layers) read the previous layer's
//!   flattened width and get their input flattened to `[batch, features]`
//! * at most one layer may take the auxiliary input

use crate::architecture::{LayerKind, LayerSpec};
use crate::checkpoint::Checkpoint;
use crate::config::TrainingParams;
use crate::error::{NetError, Result};
use crate::layers::{
    AuxConcatLayer, CenteredOutLayer, ConvLayer, DropoutLayer, ElasticLayer, HiddenLayer,
    InputLayer, Layer, LayerShape, LinearOutputLayer, PoolLayer, PoolMode, WeightInit,
};
use crate::tensor::Tensor;
use crate::utils::lr_scheduler::{InverseTimeDecay, LRScheduler, SharedRate};
use crate::utils::SimpleRng;
use crate::weights::{SharedWeights, WeightSet, WeightStore};
use std::rc::Rc;
use tracing::{debug, info};

/// One layer instance of a chain.
pub struct Node {
    pub(crate) layer: Box<dyn Layer>,
    pub(crate) flatten_input: bool,
}

impl Node {
    pub fn layer(&self) -> &dyn Layer {
        self.layer.as_ref()
    }

    /// Whether the chain flattens this layer's input to 2 dimensions.
    pub fn flattens_input(&self) -> bool {
        self.flatten_input
    }
}

/// Where the auxiliary input enters a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxInput {
    /// Layer position that consumes the auxiliary tensor.
    pub layer: usize,
    /// Values per sample the layer expects.
    pub width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxHandles {
    pub train: AuxInput,
    pub test: AuxInput,
}

/// Assembled train and test chains. Immutable once built.
pub struct Graph {
    train: Vec<Node>,
    test: Vec<Node>,
    aux: Option<AuxHandles>,
}

impl Graph {
    pub fn train(&self) -> &[Node] {
        &self.train
    }

    pub fn test(&self) -> &[Node] {
        &self.test
    }

    pub fn aux(&self) -> Option<AuxHandles> {
        self.aux
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }
}

/// A layered feed-forward network with its weights, hyperparameters and
/// learning-rate schedule.
///
/// # Example
///
/// ```
/// use layernet::architecture::LayerSpec;
/// use layernet::config::TrainingParams;
/// use layernet::network::Network;
/// use serde_json::json;
///
/// let layers = vec![
///     LayerSpec::new("InputLayer", json!({"img_sz": 4})),
///     LayerSpec::new("HiddenLayer", json!({"n_out": 8})),
///     LayerSpec::new("SoftmaxLayer", json!({"n_out": 3})),
/// ];
/// let net = Network::new(layers, TrainingParams::new(1, 5, 0.1, 4.0), None).unwrap();
/// assert_eq!(net.num_layers(), 3);
/// assert_eq!(net.graph().test().len(), 3);
/// ```
pub struct Network {
    layers: Vec<LayerSpec>,
    training_params: TrainingParams,
    graph: Rc<Graph>,
    weights: SharedWeights,
    learning_rate: SharedRate,
}

impl Network {
    /// Assembles a network.
    ///
    /// Without `allwts` every weight is drawn from a generator seeded with `SEED`;
    /// with it, each layer takes its group verbatim.
    ///
    /// # Errors
    ///
    /// Any structural problem with the layer list, the options, the weight set or
    /// the training parameters. No network is returned on failure.
    pub fn new(
        layers: Vec<LayerSpec>,
        training_params: TrainingParams,
        allwts: Option<WeightSet>,
    ) -> Result<Self> {
        let kinds = parse_kinds(&layers)?;
        training_params.validate()?;
        let restored = allwts.is_some();
        let (graph, store) = assemble(&kinds, &training_params, allwts)?;

        let schedule = schedule_of(&training_params);
        let learning_rate = SharedRate::new(schedule.rate_at(training_params.cur_epoch));

        info!(
            layers = graph.len(),
            weights = store.count(),
            aux = graph.aux.is_some(),
            restored,
            "Network assembled"
        );

        Ok(Self {
            layers,
            training_params,
            graph: Rc::new(graph),
            weights: store.shared(),
            learning_rate,
        })
    }

    /// Rebuilds a network, learned weights included, from a checkpoint.
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Result<Self> {
        Self::new(
            checkpoint.layers,
            checkpoint.training_params,
            Some(checkpoint.allwts),
        )
    }

    /// Everything needed to rebuild this network.
    pub fn get_init_params(&self) -> Checkpoint {
        Checkpoint {
            layers: self.layers.clone(),
            training_params: self.training_params.clone(),
            allwts: self.weights(),
        }
    }

    /// Recomputes the learning rate from `CUR_EPOCH`.
    pub fn set_rate(&self) {
        let rate = schedule_of(&self.training_params).rate_at(self.training_params.cur_epoch);
        self.learning_rate.set(rate);
    }

    /// Counts one completed epoch and updates the learning rate.
    pub fn advance_epoch(&mut self) {
        self.training_params.cur_epoch += 1;
        self.set_rate();
        debug!(
            epoch = self.training_params.cur_epoch,
            rate = self.learning_rate.get(),
            "Learning rate updated"
        );
    }

    pub fn epoch(&self) -> usize {
        self.training_params.cur_epoch
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate.get()
    }

    pub fn takes_aux(&self) -> bool {
        self.graph.aux.is_some()
    }

    pub fn aux_handles(&self) -> Option<AuxHandles> {
        self.graph.aux
    }

    pub fn num_layers(&self) -> usize {
        self.graph.len()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn layer_specs(&self) -> &[LayerSpec] {
        &self.layers
    }

    pub fn training_params(&self) -> &TrainingParams {
        &self.training_params
    }

    /// Copy of the current weights.
    pub fn weights(&self) -> WeightSet {
        self.weights.borrow().snapshot()
    }

    pub(crate) fn graph_handle(&self) -> Rc<Graph> {
        Rc::clone(&self.graph)
    }

    pub(crate) fn weights_handle(&self) -> SharedWeights {
        Rc::clone(&self.weights)
    }

    pub(crate) fn rate_handle(&self) -> SharedRate {
        self.learning_rate.clone()
    }
}

fn schedule_of(params: &TrainingParams) -> InverseTimeDecay {
    InverseTimeDecay::new(params.init_learning_rate, params.epochs_to_half_rate)
}

fn parse_kinds(layers: &[LayerSpec]) -> Result<Vec<LayerKind>> {
    let first = layers
        .first()
        .ok_or_else(|| NetError::Configuration("the layer list is empty".to_string()))?;
    if !matches!(first.type_tag.as_str(), "InputLayer" | "ElasticLayer") {
        return Err(NetError::Configuration(format!(
            "the first layer must be InputLayer or ElasticLayer, got '{}'",
            first.type_tag
        )));
    }
    layers
        .iter()
        .enumerate()
        .map(|(index, spec)| LayerKind::from_spec(spec, index))
        .collect()
}

fn assemble(
    kinds: &[LayerKind],
    params: &TrainingParams,
    allwts: Option<WeightSet>,
) -> Result<(Graph, WeightStore)> {
    if let Some(groups) = &allwts {
        if groups.len() != kinds.len() {
            return Err(NetError::MalformedWeights {
                layer: groups.len().min(kinds.len()),
                reason: format!(
                    "weight set has {} groups for {} layers",
                    groups.len(),
                    kinds.len()
                ),
            });
        }
    }

    // The init generator only exists for fresh networks.
    let mut rng = match allwts {
        None => Some(SimpleRng::new(params.seed)),
        Some(_) => None,
    };
    let mut presets = allwts.map(Vec::into_iter);

    let mut train: Vec<Node> = Vec::with_capacity(kinds.len());
    let mut test: Vec<Node> = Vec::with_capacity(kinds.len());
    let mut groups: WeightSet = Vec::with_capacity(kinds.len());

    for (position, kind) in kinds.iter().enumerate() {
        let preset = presets.as_mut().and_then(Iterator::next);
        let init = WeightInit::new(position, preset, rng.as_mut());
        let (layer, weights) = build_layer(kinds, position, &train, params, init)?;
        debug!(
            position,
            tag = layer.tag(),
            tensors = weights.len(),
            "{}",
            layer.describe()
        );

        let flatten_input = kind.flattens_input();
        test.push(Node {
            layer: layer.test_version(),
            flatten_input,
        });
        train.push(Node {
            layer,
            flatten_input,
        });
        groups.push(weights);
    }

    let aux = resolve_aux(&train, &test)?;
    Ok((Graph { train, test, aux }, WeightStore::new(groups)))
}

type Built = (Box<dyn Layer>, Vec<Tensor>);

fn boxed<L: Layer + 'static>((layer, weights): (L, Vec<Tensor>)) -> Built {
    (Box::new(layer), weights)
}

/// Pairs a weight-free layer with its (checked) empty group.
fn parameter_free<L: Layer + 'static>(layer: L, init: WeightInit) -> Result<Built> {
    Ok((Box::new(layer), init.none()?))
}

fn build_layer(
    kinds: &[LayerKind],
    position: usize,
    built: &[Node],
    params: &TrainingParams,
    init: WeightInit,
) -> Result<Built> {
    let kind = &kinds[position];
    let stream = || SimpleRng::for_layer(params.seed, position);

    let layer: Built = match kind {
        LayerKind::Input(o) if position == 0 => parameter_free(InputLayer::new(position, o), init)?,
        LayerKind::Elastic(o) if position == 0 => {
            parameter_free(ElasticLayer::new(position, o, stream()), init)?
        }
        LayerKind::Input(_) | LayerKind::Elastic(_) => {
            return Err(NetError::UnsupportedLayer(kind.tag().to_string()))
        }
        LayerKind::Conv(o) => {
            let (maps, sz) = map_source(kinds, built, position)?;
            boxed(ConvLayer::new(position, o, maps, sz, params.batch_sz, init)?)
        }
        LayerKind::Pool(o) => {
            let (maps, sz) = map_source(kinds, built, position)?;
            parameter_free(PoolLayer::new(position, PoolMode::Max, o, maps, sz)?, init)?
        }
        LayerKind::Mean(o) => {
            let (maps, sz) = map_source(kinds, built, position)?;
            parameter_free(PoolLayer::new(position, PoolMode::Mean, o, maps, sz)?, init)?
        }
        LayerKind::Dropout(o) => {
            if kinds[position - 1].is_dropout() {
                return Err(NetError::ConsecutiveDropout {
                    layer: position - 1,
                });
            }
            let shape = previous_shape(built, position)?;
            parameter_free(DropoutLayer::new(position, o, shape, stream()), init)?
        }
        LayerKind::Hidden(o) => {
            let n_in = previous_shape(built, position)?.n_out();
            boxed(HiddenLayer::new(position, o, n_in, init)?)
        }
        LayerKind::AuxConcat(o) => {
            let n_in = previous_shape(built, position)?.n_out();
            parameter_free(AuxConcatLayer::new(position, o, n_in), init)?
        }
        LayerKind::Softmax(o) => {
            let n_in = previous_shape(built, position)?.n_out();
            boxed(LinearOutputLayer::softmax(position, o, n_in, init)?)
        }
        LayerKind::SoftAux(o) => {
            let n_in = previous_shape(built, position)?.n_out();
            boxed(LinearOutputLayer::soft_aux(position, o, n_in, init)?)
        }
        LayerKind::Svm(o) => {
            let n_in = previous_shape(built, position)?.n_out();
            boxed(LinearOutputLayer::svm(position, o, n_in, init)?)
        }
        LayerKind::CenteredOut(o) => {
            let n_in = previous_shape(built, position)?.n_out();
            boxed(CenteredOutLayer::new(position, o, n_in, init)?)
        }
    };
    Ok(layer)
}

fn previous_shape(built: &[Node], position: usize) -> Result<LayerShape> {
    built
        .last()
        .map(|node| node.layer.shape())
        .ok_or_else(|| NetError::Configuration(format!("layer {} has no predecessor", position)))
}

/// `(num_maps, out_sz)` for a map consumer, looking past one dropout layer.
fn map_source(kinds: &[LayerKind], built: &[Node], position: usize) -> Result<(usize, usize)> {
    let prev = position - 1;
    let source = if kinds[prev].is_dropout() && prev > 0 {
        prev - 1
    } else {
        prev
    };
    let shape = built[source].layer.shape();
    shape.maps().ok_or_else(|| NetError::ShapeMismatch {
        layer: position,
        reason: format!(
            "{} needs feature maps but layer {} ({}) produces a flat vector of {}",
            kinds[position].tag(),
            source,
            kinds[source].tag(),
            shape.n_out()
        ),
    })
}

/// Finds the single auxiliary-input layer, if any.
fn resolve_aux(train: &[Node], test: &[Node]) -> Result<Option<AuxHandles>> {
    let mut found: Option<AuxHandles> = None;
    for (position, (tr, te)) in train.iter().zip(test).enumerate() {
        let Some(width) = tr.layer.aux_width() else {
            continue;
        };
        if let Some(existing) = found {
            return Err(NetError::MultipleAuxiliaryInput {
                first: existing.train.layer,
                second: position,
            });
        }
        found = Some(AuxHandles {
            train: AuxInput {
                layer: position,
                width,
            },
            test: AuxInput {
                layer: position,
                width: te.layer.aux_width().unwrap_or(width),
            },
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> TrainingParams {
        TrainingParams::new(7, 4, 0.2, 2.0)
    }

    fn specs(tags: &[(&str, serde_json::Value)]) -> Vec<LayerSpec> {
        tags.iter()
            .map(|(tag, opts)| LayerSpec::new(tag, opts.clone()))
            .collect()
    }

    #[test]
    fn test_empty_layer_list_is_configuration_error() {
        assert!(matches!(
            Network::new(Vec::new(), params(), None),
            Err(NetError::Configuration(_))
        ));
    }

    #[test]
    fn test_conv_after_dropout_reads_maps_before_dropout() {
        let layers = specs(&[
            ("InputLayer", json!({"img_sz": 8, "num_maps": 2})),
            ("DropOutLayer", json!({"pdrop": 0.2})),
            ("ConvLayer", json!({"num_maps": 3, "filter_sz": 3})),
            ("SoftmaxLayer", json!({"n_out": 2})),
        ]);
        let net = Network::new(layers, params(), None).unwrap();
        let weights = net.weights();
        assert_eq!(weights[2][0].shape(), &[3, 2, 3, 3]);
        assert_eq!(weights[3][0].shape(), &[3 * 6 * 6, 2]);
    }

    #[test]
    fn test_conv_after_flat_layer_is_shape_mismatch() {
        let layers = specs(&[
            ("InputLayer", json!({"img_sz": 4})),
            ("HiddenLayer", json!({"n_out": 16})),
            ("ConvLayer", json!({"num_maps": 1, "filter_sz": 2})),
            ("SoftmaxLayer", json!({"n_out": 2})),
        ]);
        assert!(matches!(
            Network::new(layers, params(), None),
            Err(NetError::ShapeMismatch { layer: 2, .. })
        ));
    }

    #[test]
    fn test_input_layer_after_first_is_unsupported() {
        let layers = specs(&[
            ("InputLayer", json!({"img_sz": 4})),
            ("InputLayer", json!({"img_sz": 4})),
        ]);
        assert!(matches!(
            Network::new(layers, params(), None),
            Err(NetError::UnsupportedLayer(_))
        ));
    }

    #[test]
    fn test_aux_handles_recorded() {
        let layers = specs(&[
            ("InputLayer", json!({"img_sz": 2})),
            ("HiddenLayer", json!({"n_out": 3})),
            ("AuxConcatLayer", json!({"n_aux": 2})),
            ("SoftmaxLayer", json!({"n_out": 2})),
        ]);
        let net = Network::new(layers, params(), None).unwrap();
        let handles = net.aux_handles().unwrap();
        assert_eq!(handles.train, AuxInput { layer: 2, width: 2 });
        assert_eq!(handles.test, handles.train);
        assert_eq!(net.weights()[3][0].shape(), &[5, 2]);
    }

    #[test]
    fn test_weight_set_with_wrong_group_count() {
        let layers = specs(&[
            ("InputLayer", json!({"img_sz": 2})),
            ("SoftmaxLayer", json!({"n_out": 2})),
        ]);
        let result = Network::new(layers, params(), Some(vec![Vec::new()]));
        assert!(matches!(result, Err(NetError::MalformedWeights { .. })));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let layers = specs(&[
            ("InputLayer", json!({"img_sz": 2})),
            ("SoftmaxLayer", json!({"n_out": 2})),
        ]);
        let bad = TrainingParams::new(1, 0, 0.1, 1.0);
        assert!(matches!(
            Network::new(layers, bad, None),
            Err(NetError::InvalidParams(_))
        ));
    }
}
