//! Error type shared by assembly, compilation and invocation.

use thiserror::Error;

/// Everything that can go wrong while building or running a network.
///
/// Errors are structural: none of them are transient and none are retried.
#[derive(Debug, Error)]
pub enum NetError {
    /// The layer list cannot describe a network (empty, or the first layer is not an input).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A type-tag that no wiring rule recognizes.
    #[error("unsupported layer type '{0}'")]
    UnsupportedLayer(String),

    #[error("multiple auxiliary inputs: layers {first} and {second} both declare one")]
    MultipleAuxiliaryInput { first: usize, second: usize },

    #[error("network takes an auxiliary input but no auxiliary data was supplied")]
    MissingAuxiliaryData,

    #[error("layer {layer} ({tag}): invalid options: {reason}")]
    InvalidOptions {
        layer: usize,
        tag: String,
        reason: String,
    },

    #[error("invalid training parameters: {0}")]
    InvalidParams(String),

    #[error("layer {layer}: malformed weights: {reason}")]
    MalformedWeights { layer: usize, reason: String },

    #[error("layer {layer}: shape mismatch: {reason}")]
    ShapeMismatch { layer: usize, reason: String },

    #[error("tensor shape error: {0}")]
    TensorShape(String),

    #[error("invalid labels: {0}")]
    InvalidLabels(String),

    #[error("layers {layer} and {} are both dropout layers", .layer + 1)]
    ConsecutiveDropout { layer: usize },

    #[error("batch {index} covers rows [{start}, {end}) but the dataset has {len}")]
    BatchOutOfRange {
        index: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("final layer '{0}' does not produce class outputs")]
    NotAnOutputLayer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = NetError> = std::result::Result<T, E>;
