//! Function compilation
//!
//! A network yields three executable functions, each bound to the network's shared
//! graph, weights and learning rate:
//!
//! * [`TrainFn`]: one SGD step on batch `i` of a training dataset
//! * [`TestFn`]: error metrics on batch `i` of a test dataset
//! * [`InferenceFn`]: features and predictions for raw input tensors
//!
//! Batch `i` always covers rows `[i * BATCH_SZ, (i + 1) * BATCH_SZ)`.

use crate::error::{NetError, Result};
use crate::layers::{ErrorRates, OutputLayer};
use crate::network::{AuxInput, Graph, Network, Node};
use crate::optimizers::SGD;
use crate::tensor::Tensor;
use crate::utils::lr_scheduler::SharedRate;
use crate::weights::{SharedWeights, WeightStore};
use std::rc::Rc;
use tracing::{debug, info};

/// Inputs, labels and (optionally) auxiliary inputs, row-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Tensor,
    y: Vec<usize>,
    aux: Option<Tensor>,
}

/// Rows of a [`Dataset`] bound to one function call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Tensor,
    pub y: Vec<usize>,
    pub aux: Option<Tensor>,
}

impl Dataset {
    /// `x` holds one sample per leading-axis row, `y` one label per sample.
    pub fn new(x: Tensor, y: Vec<usize>) -> Result<Self> {
        if x.rows() != y.len() {
            return Err(NetError::TensorShape(format!(
                "{} samples but {} labels",
                x.rows(),
                y.len()
            )));
        }
        Ok(Self { x, y, aux: None })
    }

    /// Attaches auxiliary inputs, one row per sample.
    pub fn with_aux(mut self, aux: Tensor) -> Result<Self> {
        if aux.rows() != self.x.rows() {
            return Err(NetError::TensorShape(format!(
                "{} samples but {} auxiliary rows",
                self.x.rows(),
                aux.rows()
            )));
        }
        self.aux = Some(aux);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn x(&self) -> &Tensor {
        &self.x
    }

    pub fn y(&self) -> &[usize] {
        &self.y
    }

    pub fn aux(&self) -> Option<&Tensor> {
        self.aux.as_ref()
    }

    /// Number of complete batches of `batch_sz` rows.
    pub fn num_batches(&self, batch_sz: usize) -> usize {
        if batch_sz == 0 {
            0
        } else {
            self.len() / batch_sz
        }
    }

    /// Rows `[index * batch_sz, (index + 1) * batch_sz)`.
    ///
    /// # Errors
    ///
    /// `BatchOutOfRange` when the window does not lie inside the dataset.
    pub fn batch(&self, index: usize, batch_sz: usize) -> Result<Batch> {
        let start = index.saturating_mul(batch_sz);
        let end = start.saturating_add(batch_sz);
        if end > self.len() {
            return Err(NetError::BatchOutOfRange {
                index,
                start,
                end,
                len: self.len(),
            });
        }
        Ok(Batch {
            x: self.x.slice_rows(start, end),
            y: self.y[start..end].to_vec(),
            aux: self.aux.as_ref().map(|a| a.slice_rows(start, end)),
        })
    }
}

/// Output of one train step, computed before the weights were updated.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainStep {
    /// Supervised loss plus every layer's regularization term.
    pub cost: f32,
    pub features: Tensor,
    pub logprob: Tensor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestStep {
    pub errors: ErrorRates,
    /// Present when the function was compiled with `preds_feats`.
    pub features: Option<Tensor>,
    pub predictions: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub features: Tensor,
    pub predictions: Vec<usize>,
    /// Every test-layer output in order; empty unless compiled in diagnostic mode.
    pub layer_outputs: Vec<Tensor>,
}

/// Inputs and outputs of every layer of one forward pass.
struct Trace {
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
}

type BoundAux<'a> = Option<(AuxInput, &'a Tensor)>;

fn aux_at<'a>(aux: BoundAux<'a>, position: usize) -> Option<&'a Tensor> {
    aux.filter(|(handle, _)| handle.layer == position)
        .map(|(_, tensor)| tensor)
}

fn run_chain(nodes: &[Node], store: &WeightStore, x: &Tensor, aux: BoundAux) -> Result<Trace> {
    let mut inputs: Vec<Tensor> = Vec::with_capacity(nodes.len());
    let mut outputs: Vec<Tensor> = Vec::with_capacity(nodes.len());

    for (position, node) in nodes.iter().enumerate() {
        let input = match outputs.last() {
            None => x.clone(),
            Some(prev) if node.flatten_input => prev.flatten2(),
            Some(prev) => prev.clone(),
        };
        let output = node
            .layer
            .forward(&input, aux_at(aux, position), store.group(position))?;
        inputs.push(input);
        outputs.push(output);
    }

    Ok(Trace { inputs, outputs })
}

fn output_head(nodes: &[Node]) -> Result<&dyn OutputLayer> {
    let last = nodes
        .last()
        .ok_or_else(|| NetError::Configuration("the network has no layers".to_string()))?;
    last.layer
        .as_output()
        .ok_or_else(|| NetError::NotAnOutputLayer(last.layer.tag().to_string()))
}

/// Checks that aux data is present and of the right width when `handle` is set.
fn check_aux(handle: Option<AuxInput>, aux: Option<&Tensor>) -> Result<()> {
    let Some(handle) = handle else {
        return Ok(());
    };
    let aux = aux.ok_or(NetError::MissingAuxiliaryData)?;
    if aux.row_len() != handle.width {
        return Err(NetError::ShapeMismatch {
            layer: handle.layer,
            reason: format!(
                "auxiliary data has {} values per sample, expected {}",
                aux.row_len(),
                handle.width
            ),
        });
    }
    Ok(())
}

fn bind<'a>(handle: Option<AuxInput>, aux: Option<&'a Tensor>) -> BoundAux<'a> {
    handle.zip(aux)
}

/// One SGD step per call.
pub struct TrainFn {
    graph: Rc<Graph>,
    weights: SharedWeights,
    rate: SharedRate,
    data: Dataset,
    batch_sz: usize,
}

impl TrainFn {
    /// Trains on batch `index` and returns cost, features and log-probabilities.
    ///
    /// The learning rate is read from the network at call time.
    pub fn call(&self, index: usize) -> Result<TrainStep> {
        let batch = self.data.batch(index, self.batch_sz)?;
        let nodes = self.graph.train();
        let aux = bind(self.graph.aux().map(|h| h.train), batch.aux.as_ref());
        let head = output_head(nodes)?;
        let last = nodes.len() - 1;

        let (step, grads) = {
            let store = self.weights.borrow();
            let trace = run_chain(nodes, &store, &batch.x, aux)?;
            let output = &trace.outputs[last];

            let (loss, mut grad) = head.cost(output, &batch.y)?;
            let reg: f32 = nodes
                .iter()
                .enumerate()
                .map(|(position, node)| node.layer.weight_cost(store.group(position)))
                .sum();
            let features = head.features(
                &trace.inputs[last],
                aux_at(aux, last),
                output,
                store.group(last),
            )?;
            let logprob = head.logprob(output);

            let mut grads: Vec<Vec<Tensor>> = vec![Vec::new(); nodes.len()];
            for position in (1..nodes.len()).rev() {
                let node = &nodes[position];
                let g = node.layer.backward(
                    &trace.inputs[position],
                    aux_at(aux, position),
                    &trace.outputs[position],
                    &grad,
                    store.group(position),
                )?;
                grads[position] = g.weights;
                grad = if node.flatten_input {
                    g.input
                        .reshape(trace.outputs[position - 1].shape().to_vec())?
                } else {
                    g.input
                };
            }

            let step = TrainStep {
                cost: loss + reg,
                features,
                logprob,
            };
            (step, grads)
        };

        let mut optimizer = SGD::new(self.rate.get());
        let mut store = self.weights.borrow_mut();
        for (position, node) in nodes.iter().enumerate() {
            if !grads[position].is_empty() {
                node.layer
                    .apply_updates(store.group_mut(position), &grads[position], &mut optimizer);
            }
        }

        debug!(index, cost = step.cost, "Train step");
        Ok(step)
    }

    pub fn num_batches(&self) -> usize {
        self.data.num_batches(self.batch_sz)
    }
}

/// Evaluation on the test chain; never touches the weights.
pub struct TestFn {
    graph: Rc<Graph>,
    weights: SharedWeights,
    data: Dataset,
    batch_sz: usize,
    preds_feats: bool,
}

impl TestFn {
    pub fn call(&self, index: usize) -> Result<TestStep> {
        let batch = self.data.batch(index, self.batch_sz)?;
        let nodes = self.graph.test();
        let aux = bind(self.graph.aux().map(|h| h.test), batch.aux.as_ref());
        let head = output_head(nodes)?;
        let last = nodes.len() - 1;

        let store = self.weights.borrow();
        let trace = run_chain(nodes, &store, &batch.x, aux)?;
        let output = &trace.outputs[last];
        let errors = head.error_rates(output, &batch.y)?;

        let (features, predictions) = if self.preds_feats {
            let features = head.features(
                &trace.inputs[last],
                aux_at(aux, last),
                output,
                store.group(last),
            )?;
            (Some(features), Some(head.predictions(output)))
        } else {
            (None, None)
        };

        Ok(TestStep {
            errors,
            features,
            predictions,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.data.num_batches(self.batch_sz)
    }
}

/// Label-free evaluation of raw tensors.
pub struct InferenceFn {
    graph: Rc<Graph>,
    weights: SharedWeights,
    diagnostic: bool,
}

impl InferenceFn {
    /// # Errors
    ///
    /// `MissingAuxiliaryData` if the network takes an auxiliary input and `aux` is `None`.
    pub fn call(&self, x: &Tensor, aux: Option<&Tensor>) -> Result<Inference> {
        let handle = self.graph.aux().map(|h| h.test);
        check_aux(handle, aux)?;
        let nodes = self.graph.test();
        let head = output_head(nodes)?;
        let last = nodes.len() - 1;
        let aux = bind(handle, aux);

        let store = self.weights.borrow();
        let trace = run_chain(nodes, &store, x, aux)?;
        let output = &trace.outputs[last];
        let features = head.features(
            &trace.inputs[last],
            aux_at(aux, last),
            output,
            store.group(last),
        )?;
        let predictions = head.predictions(output);

        Ok(Inference {
            features,
            predictions,
            layer_outputs: if self.diagnostic {
                trace.outputs
            } else {
                Vec::new()
            },
        })
    }
}

impl Network {
    /// Binds a training dataset and returns the train-step function.
    ///
    /// # Errors
    ///
    /// `MissingAuxiliaryData` when the network takes an auxiliary input and `data`
    /// carries none; `NotAnOutputLayer` when the last layer cannot produce a cost.
    pub fn compile_train(&self, data: Dataset) -> Result<TrainFn> {
        info!("Compiling training function...");
        let graph = self.graph_handle();
        output_head(graph.train())?;
        check_aux(graph.aux().map(|h| h.train), data.aux())?;
        Ok(TrainFn {
            graph,
            weights: self.weights_handle(),
            rate: self.rate_handle(),
            data,
            batch_sz: self.training_params().batch_sz,
        })
    }

    /// Binds a test dataset; with `preds_feats` each call also returns features and
    /// predicted labels.
    pub fn compile_test(&self, data: Dataset, preds_feats: bool) -> Result<TestFn> {
        info!("Compiling testing function...");
        let graph = self.graph_handle();
        output_head(graph.test())?;
        check_aux(graph.aux().map(|h| h.test), data.aux())?;
        Ok(TestFn {
            graph,
            weights: self.weights_handle(),
            data,
            batch_sz: self.training_params().batch_sz,
            preds_feats,
        })
    }

    /// Returns the full-inference function; in `diagnostic` mode it also reports
    /// every layer's output.
    pub fn compile_inference(&self, diagnostic: bool) -> Result<InferenceFn> {
        info!(diagnostic, "Compiling full inference function...");
        let graph = self.graph_handle();
        output_head(graph.test())?;
        Ok(InferenceFn {
            graph,
            weights: self.weights_handle(),
            diagnostic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Dataset {
        let x = Tensor::new(vec![n, 2], (0..2 * n).map(|v| v as f32).collect()).unwrap();
        Dataset::new(x, (0..n).map(|i| i % 2).collect()).unwrap()
    }

    #[test]
    fn test_batch_window() {
        let data = dataset(10);
        let batch = data.batch(2, 3).unwrap();
        assert_eq!(batch.y, vec![0, 1, 0]);
        assert_eq!(batch.x.row(0), &[12.0, 13.0]);
        assert_eq!(data.num_batches(3), 3);
    }

    #[test]
    fn test_batch_past_end() {
        let data = dataset(10);
        match data.batch(3, 3) {
            Err(NetError::BatchOutOfRange {
                index,
                start,
                end,
                len,
            }) => {
                assert_eq!((index, start, end, len), (3, 9, 12, 10));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_dataset_rejects_misaligned_labels() {
        let x = Tensor::zeros(vec![3, 2]);
        assert!(Dataset::new(x, vec![0, 1]).is_err());
        let aux = Tensor::zeros(vec![2, 1]);
        assert!(dataset(3).with_aux(aux).is_err());
    }

    #[test]
    fn test_check_aux() {
        let handle = Some(AuxInput { layer: 2, width: 3 });
        assert!(matches!(
            check_aux(handle, None),
            Err(NetError::MissingAuxiliaryData)
        ));
        let narrow = Tensor::zeros(vec![4, 2]);
        assert!(matches!(
            check_aux(handle, Some(&narrow)),
            Err(NetError::ShapeMismatch { layer: 2, .. })
        ));
        assert!(check_aux(None, None).is_ok());
    }
}
