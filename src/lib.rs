//! Layered Neural Networks Library
//!
//! This library assembles feed-forward networks from declarative layer specs,
//! derives train, test and inference functions from them, and saves and restores
//! trained networks.
//!
//! # Modules
//!
//! - `architecture`: Layer specs and their typed options
//! - `config`: Training hyperparameters
//! - `network`: Assembly of the train/test chains and the learning-rate schedule
//! - `compile`: Batch-indexed train, test and inference functions
//! - `layers`: Layer trait and implementations (Conv, Pool, Dropout, Hidden, outputs, etc.)
//! - `optimizers`: Optimizer trait and SGD
//! - `checkpoint`: JSON save/restore of specs, params and weights
//! - `report`: Text reports of layers, weights and params
//! - `tensor`, `weights`: Dense tensors and the shared weight store
//! - `utils`: Shared utilities (RNG, activation functions, LR scheduling)

pub mod architecture;
pub mod checkpoint;
pub mod compile;
pub mod config;
pub mod error;
pub mod layers;
pub mod network;
pub mod optimizers;
pub mod report;
pub mod tensor;
pub mod utils;
pub mod weights;

pub use architecture::LayerSpec;
pub use checkpoint::Checkpoint;
pub use compile::Dataset;
pub use config::TrainingParams;
pub use error::{NetError, Result};
pub use network::Network;
pub use tensor::Tensor;
pub use weights::WeightSet;
