//! Training parameters
//!
//! `TrainingParams` mirrors the upper-case key/value map a training run is
//! configured with. The four required keys are typed fields; anything else in the
//! file is kept verbatim so it survives checkpoint round trips.

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;

/// Hyperparameters of a training run.
///
/// `CUR_EPOCH` defaults to 0 when absent and is the only field that changes after
/// the network is built.
///
/// # Example
///
/// ```json
/// {
///   "SEED": 555,
///   "BATCH_SZ": 20,
///   "INIT_LEARNING_RATE": 0.1,
///   "EPOCHS_TO_HALF_RATE": 2,
///   "NUM_EPOCHS": 12
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    #[serde(rename = "SEED")]
    pub seed: u64,

    #[serde(rename = "BATCH_SZ")]
    pub batch_sz: usize,

    #[serde(rename = "INIT_LEARNING_RATE")]
    pub init_learning_rate: f32,

    #[serde(rename = "EPOCHS_TO_HALF_RATE")]
    pub epochs_to_half_rate: f32,

    #[serde(rename = "CUR_EPOCH", default)]
    pub cur_epoch: usize,

    /// Keys the network does not interpret (epoch budgets, notes, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TrainingParams {
    pub fn new(
        seed: u64,
        batch_sz: usize,
        init_learning_rate: f32,
        epochs_to_half_rate: f32,
    ) -> Self {
        Self {
            seed,
            batch_sz,
            init_learning_rate,
            epochs_to_half_rate,
            cur_epoch: 0,
            extra: BTreeMap::new(),
        }
    }

    /// Checks the ranges the scheduler and batch binding rely on.
    pub fn validate(&self) -> Result<()> {
        if self.batch_sz == 0 {
            return Err(NetError::InvalidParams(
                "BATCH_SZ must be greater than 0".to_string(),
            ));
        }
        if self.init_learning_rate.is_nan() || self.init_learning_rate <= 0.0 {
            return Err(NetError::InvalidParams(
                "INIT_LEARNING_RATE must be positive".to_string(),
            ));
        }
        if self.epochs_to_half_rate.is_nan() || self.epochs_to_half_rate <= 0.0 {
            return Err(NetError::InvalidParams(
                "EPOCHS_TO_HALF_RATE must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Every key with its value rendered as text, sorted by key.
    pub fn entries(&self) -> BTreeMap<String, String> {
        let mut entries: BTreeMap<String, String> = self
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect();
        entries.insert("SEED".to_string(), self.seed.to_string());
        entries.insert("BATCH_SZ".to_string(), self.batch_sz.to_string());
        entries.insert(
            "INIT_LEARNING_RATE".to_string(),
            self.init_learning_rate.to_string(),
        );
        entries.insert(
            "EPOCHS_TO_HALF_RATE".to_string(),
            self.epochs_to_half_rate.to_string(),
        );
        entries.insert("CUR_EPOCH".to_string(), self.cur_epoch.to_string());
        entries
    }
}

/// Loads training parameters from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use layernet::config::load_training_params;
///
/// let params = load_training_params("config/training_params.json").unwrap();
/// assert!(params.batch_sz > 0);
/// ```
pub fn load_training_params(path: &str) -> Result<TrainingParams> {
    let contents = fs::read_to_string(path)?;
    let params: TrainingParams = serde_json::from_str(&contents)?;
    params.validate()?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cur_epoch_defaults_to_zero() {
        let params: TrainingParams = serde_json::from_str(
            r#"{"SEED": 1, "BATCH_SZ": 4, "INIT_LEARNING_RATE": 0.1, "EPOCHS_TO_HALF_RATE": 3}"#,
        )
        .unwrap();
        assert_eq!(params.cur_epoch, 0);
        assert!(params.extra.is_empty());
    }

    #[test]
    fn test_extra_keys_are_kept() {
        let params: TrainingParams = serde_json::from_str(
            r#"{"SEED": 1, "BATCH_SZ": 4, "INIT_LEARNING_RATE": 0.1,
                "EPOCHS_TO_HALF_RATE": 3, "CUR_EPOCH": 5, "NUM_EPOCHS": 40}"#,
        )
        .unwrap();
        assert_eq!(params.cur_epoch, 5);
        assert_eq!(params.extra.get("NUM_EPOCHS"), Some(&Value::from(40)));

        let json = serde_json::to_string(&params).unwrap();
        let back: TrainingParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_missing_required_key_fails() {
        let result: std::result::Result<TrainingParams, _> =
            serde_json::from_str(r#"{"SEED": 1, "BATCH_SZ": 4, "INIT_LEARNING_RATE": 0.1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let params = TrainingParams::new(1, 0, 0.1, 2.0);
        assert!(matches!(params.validate(), Err(NetError::InvalidParams(_))));
    }

    #[test]
    fn test_entries_are_sorted() {
        let mut params = TrainingParams::new(9, 10, 0.5, 2.0);
        params.extra.insert("ALPHA".to_string(), Value::from(1));
        let keys: Vec<String> = params.entries().into_keys().collect();
        assert_eq!(
            keys,
            vec![
                "ALPHA",
                "BATCH_SZ",
                "CUR_EPOCH",
                "EPOCHS_TO_HALF_RATE",
                "INIT_LEARNING_RATE",
                "SEED"
            ]
        );
    }
}
