//! Checkpoints
//!
//! A [`Checkpoint`] is the triple a network is built from: layer specs, training
//! parameters and the full weight set. It serializes to JSON so that a trained
//! network can be saved and rebuilt later with
//! [`Network::from_checkpoint`](crate::network::Network::from_checkpoint).

use crate::architecture::LayerSpec;
use crate::config::TrainingParams;
use crate::error::Result;
use crate::weights::WeightSet;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub layers: Vec<LayerSpec>,
    pub training_params: TrainingParams,
    pub allwts: WeightSet,
}

impl Checkpoint {
    /// Writes the checkpoint as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        info!(path = %path.display(), layers = self.layers.len(), "Checkpoint saved");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        info!(path = %path.as_ref().display(), "Checkpoint loaded");
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use serde_json::json;

    #[test]
    fn test_checkpoint_file_round_trip() {
        let checkpoint = Checkpoint {
            layers: vec![
                LayerSpec::new("InputLayer", json!({"img_sz": 2})),
                LayerSpec::new("SoftmaxLayer", json!({"n_out": 2})),
            ],
            training_params: TrainingParams::new(3, 2, 0.1, 1.0),
            allwts: vec![
                Vec::new(),
                vec![
                    Tensor::new(vec![4, 2], vec![0.1, -0.2, 0.3, 0.4, 0.5, 0.6, -0.7, 0.8])
                        .unwrap(),
                    Tensor::zeros(vec![2]),
                ],
            ],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.json");
        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Checkpoint::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(crate::error::NetError::Io(_))));
    }
}
