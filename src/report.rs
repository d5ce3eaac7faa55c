//! Human-readable network reports.

use crate::architecture::LayerSpec;
use crate::config::TrainingParams;
use crate::network::Network;
use crate::tensor::Tensor;
use std::fmt;

/// Each layer's tag followed by its options, one per indented line.
pub fn layers_info(layers: &[LayerSpec]) -> String {
    let mut out = String::new();
    for spec in layers {
        out.push_str(&format!("\n{} :", spec.type_tag));
        for (key, value) in &spec.options {
            out.push_str(&format!("\n\t{} : \t{}", key, value));
        }
    }
    out
}

/// Shape, dtype and size of every weight tensor, then the total count.
///
/// `detailed` appends min / mean / max of each tensor.
pub fn weights_info(groups: &[Vec<Tensor>], detailed: bool) -> String {
    let mut out = String::new();
    let mut total = 0usize;
    for (position, group) in groups.iter().enumerate() {
        out.push_str(&format!("\nLayer {}:", position));
        for w in group {
            total += w.len();
            out.push_str(&format!("\n\t {:?} {} [{}]", w.shape(), w.dtype(), w.len()));
            if detailed && !w.is_empty() {
                out.push_str(&format!(
                    " [{:.2e}, {:.2e}, {:.2e}]",
                    w.min(),
                    w.mean(),
                    w.max()
                ));
            }
        }
    }
    out.push_str(&format!("\n\nTotal Number of Weights : {}", with_thousands(total)));
    out
}

/// Every training parameter, sorted by key.
pub fn training_params_info(params: &TrainingParams) -> String {
    let mut out = String::from("Training Parameters:");
    for (key, value) in params.entries() {
        out.push_str(&format!("\n\t{} : \t{}", key, value));
    }
    out
}

/// `1234567` as `1,234,567`.
pub fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl Network {
    pub fn layers_info(&self) -> String {
        layers_info(self.layer_specs())
    }

    pub fn weights_info(&self, detailed: bool) -> String {
        weights_info(&self.weights(), detailed)
    }

    pub fn training_params_info(&self) -> String {
        training_params_info(self.training_params())
    }
}

impl fmt::Display for Network {
    /// Train layers, test layers, then the shapes of each layer's weights.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Train Layers")?;
        for node in self.graph().train() {
            writeln!(f, "\t{}", node.layer().describe())?;
        }
        writeln!(f, "Test Layers")?;
        for node in self.graph().test() {
            writeln!(f, "\t{}", node.layer().describe())?;
        }
        let params = self
            .weights()
            .iter()
            .filter(|group| !group.is_empty())
            .map(|group| {
                group
                    .iter()
                    .map(|w| format!("{:?}", w.shape()))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "Params {}", params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_thousands() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1000), "1,000");
        assert_eq!(with_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_layers_info_lists_options() {
        let info = layers_info(&[LayerSpec::new("PoolLayer", json!({"pool_sz": 2}))]);
        assert_eq!(info, "\nPoolLayer :\n\tpool_sz : \t2");
    }

    #[test]
    fn test_weights_info_total() {
        let groups = vec![
            Vec::new(),
            vec![Tensor::zeros(vec![40, 30]), Tensor::zeros(vec![30])],
        ];
        let info = weights_info(&groups, true);
        assert!(info.contains("Layer 0:"));
        assert!(info.contains("[40, 30] float32 [1200]"));
        assert!(info.ends_with("Total Number of Weights : 1,230"));
    }

    #[test]
    fn test_training_params_info_sorted() {
        let info = training_params_info(&TrainingParams::new(5, 10, 0.5, 2.0));
        let keys: Vec<&str> = info
            .lines()
            .skip(1)
            .map(|line| line.trim().split(' ').next().unwrap_or(""))
            .collect();
        assert_eq!(
            keys,
            vec!["BATCH_SZ", "CUR_EPOCH", "EPOCHS_TO_HALF_RATE", "INIT_LEARNING_RATE", "SEED"]
        );
    }
}
