//! Layer specifications
//!
//! A network is described by an ordered list of [`LayerSpec`]s: a type-tag naming the
//! layer variant plus a JSON object of construction options. The tag stays a string in
//! the persisted form; assembly parses each spec into the closed [`LayerKind`] enum and
//! dispatches on that.

use crate::error::{NetError, Result};
use crate::utils::Activation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;

/// Declarative description of one layer, before instantiation.
///
/// # Example
///
/// ```json
/// { "type_tag": "ConvLayer", "options": { "num_maps": 6, "filter_sz": 3 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub type_tag: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl LayerSpec {
    /// Builds a spec from a tag and a JSON value holding the options object.
    ///
    /// Non-object values are treated as "no options".
    pub fn new(type_tag: &str, options: Value) -> Self {
        let options = match options {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            type_tag: type_tag.to_string(),
            options,
        }
    }
}

/// Options of the plain input layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputOptions {
    pub img_sz: usize,
    #[serde(default = "one")]
    pub num_maps: usize,
}

/// Options of the elastic-distortion input layer.
///
/// `magnitude` scales a smoothed random displacement field (in pixels), `sigma` is
/// the smoothing radius and `translation` the largest random shift of the whole image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticOptions {
    pub img_sz: usize,
    #[serde(default = "one")]
    pub num_maps: usize,
    #[serde(default)]
    pub translation: f32,
    #[serde(default)]
    pub magnitude: f32,
    #[serde(default = "default_sigma")]
    pub sigma: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvOptions {
    pub num_maps: usize,
    pub filter_sz: usize,
    #[serde(default)]
    pub actvn: Activation,
    #[serde(default)]
    pub l2_reg: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolOptions {
    pub pool_sz: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropoutOptions {
    pub pdrop: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HiddenOptions {
    pub n_out: usize,
    #[serde(default)]
    pub actvn: Activation,
    #[serde(default)]
    pub l2_reg: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuxConcatOptions {
    pub n_aux: usize,
}

/// Options shared by the linear classifier heads (softmax and SVM).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputOptions {
    pub n_out: usize,
    #[serde(default)]
    pub l2_reg: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoftAuxOptions {
    pub n_out: usize,
    pub n_aux: usize,
    #[serde(default)]
    pub l2_reg: f32,
}

/// How centered-output class scores are derived from features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CenterKind {
    /// Score is the negative squared distance to each class center.
    #[default]
    Rbf,
    /// Score is the dot product with each class center.
    Logit,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CenteredOptions {
    pub n_features: usize,
    pub n_classes: usize,
    #[serde(default)]
    pub kind: CenterKind,
    #[serde(default = "default_centered_actvn")]
    pub actvn: Activation,
    #[serde(default)]
    pub l2_reg: f32,
}

fn one() -> usize {
    1
}

fn default_sigma() -> usize {
    2
}

fn default_centered_actvn() -> Activation {
    Activation::Tanh
}

/// Every supported layer variant with its typed options.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Input(InputOptions),
    Elastic(ElasticOptions),
    Conv(ConvOptions),
    Pool(PoolOptions),
    Mean(PoolOptions),
    Dropout(DropoutOptions),
    Hidden(HiddenOptions),
    AuxConcat(AuxConcatOptions),
    Softmax(OutputOptions),
    SoftAux(SoftAuxOptions),
    Svm(OutputOptions),
    CenteredOut(CenteredOptions),
}

impl LayerKind {
    /// Parses and validates the spec at position `index`.
    ///
    /// # Errors
    ///
    /// `UnsupportedLayer` for an unknown tag, `InvalidOptions` for options that do not
    /// deserialize or fall outside their valid range.
    pub fn from_spec(spec: &LayerSpec, index: usize) -> Result<Self> {
        let kind = match spec.type_tag.as_str() {
            "InputLayer" => LayerKind::Input(parse_options(spec, index)?),
            "ElasticLayer" => LayerKind::Elastic(parse_options(spec, index)?),
            "ConvLayer" => LayerKind::Conv(parse_options(spec, index)?),
            "PoolLayer" => LayerKind::Pool(parse_options(spec, index)?),
            "MeanLayer" => LayerKind::Mean(parse_options(spec, index)?),
            "DropOutLayer" => LayerKind::Dropout(parse_options(spec, index)?),
            "HiddenLayer" => LayerKind::Hidden(parse_options(spec, index)?),
            "AuxConcatLayer" => LayerKind::AuxConcat(parse_options(spec, index)?),
            "SoftmaxLayer" => LayerKind::Softmax(parse_options(spec, index)?),
            "SoftAuxLayer" => LayerKind::SoftAux(parse_options(spec, index)?),
            "SVMLayer" => LayerKind::Svm(parse_options(spec, index)?),
            "CenteredOutLayer" => LayerKind::CenteredOut(parse_options(spec, index)?),
            other => return Err(NetError::UnsupportedLayer(other.to_string())),
        };
        kind.validate(index)?;
        Ok(kind)
    }

    /// Type-tag this variant is written as.
    pub fn tag(&self) -> &'static str {
        match self {
            LayerKind::Input(_) => "InputLayer",
            LayerKind::Elastic(_) => "ElasticLayer",
            LayerKind::Conv(_) => "ConvLayer",
            LayerKind::Pool(_) => "PoolLayer",
            LayerKind::Mean(_) => "MeanLayer",
            LayerKind::Dropout(_) => "DropOutLayer",
            LayerKind::Hidden(_) => "HiddenLayer",
            LayerKind::AuxConcat(_) => "AuxConcatLayer",
            LayerKind::Softmax(_) => "SoftmaxLayer",
            LayerKind::SoftAux(_) => "SoftAuxLayer",
            LayerKind::Svm(_) => "SVMLayer",
            LayerKind::CenteredOut(_) => "CenteredOutLayer",
        }
    }

    /// Input and elastic-distortion layers; only these may start a network.
    pub fn is_input(&self) -> bool {
        matches!(self, LayerKind::Input(_) | LayerKind::Elastic(_))
    }

    pub fn is_dropout(&self) -> bool {
        matches!(self, LayerKind::Dropout(_))
    }

    /// Layers that read feature-map count and spatial size from their shape source.
    pub fn consumes_maps(&self) -> bool {
        matches!(
            self,
            LayerKind::Conv(_) | LayerKind::Pool(_) | LayerKind::Mean(_)
        )
    }

    /// Layers whose input is flattened to `[batch, features]` before use.
    pub fn flattens_input(&self) -> bool {
        matches!(
            self,
            LayerKind::Hidden(_)
                | LayerKind::AuxConcat(_)
                | LayerKind::Softmax(_)
                | LayerKind::SoftAux(_)
                | LayerKind::Svm(_)
                | LayerKind::CenteredOut(_)
        )
    }

    fn validate(&self, index: usize) -> Result<()> {
        let invalid = |reason: &str| NetError::InvalidOptions {
            layer: index,
            tag: self.tag().to_string(),
            reason: reason.to_string(),
        };

        match self {
            LayerKind::Input(o) => {
                if o.img_sz == 0 || o.num_maps == 0 {
                    return Err(invalid("img_sz and num_maps must be greater than 0"));
                }
            }
            LayerKind::Elastic(o) => {
                if o.img_sz == 0 || o.num_maps == 0 {
                    return Err(invalid("img_sz and num_maps must be greater than 0"));
                }
                if o.translation < 0.0 || o.magnitude < 0.0 {
                    return Err(invalid("translation and magnitude must be non-negative"));
                }
            }
            LayerKind::Conv(o) => {
                if o.num_maps == 0 || o.filter_sz == 0 {
                    return Err(invalid("num_maps and filter_sz must be greater than 0"));
                }
                check_l2(o.l2_reg).map_err(|r| invalid(r))?;
            }
            LayerKind::Pool(o) | LayerKind::Mean(o) => {
                if o.pool_sz == 0 {
                    return Err(invalid("pool_sz must be greater than 0"));
                }
            }
            LayerKind::Dropout(o) => {
                if !(0.0..1.0).contains(&o.pdrop) {
                    return Err(invalid("pdrop must be in range [0.0, 1.0)"));
                }
            }
            LayerKind::Hidden(o) => {
                if o.n_out == 0 {
                    return Err(invalid("n_out must be greater than 0"));
                }
                check_l2(o.l2_reg).map_err(|r| invalid(r))?;
            }
            LayerKind::AuxConcat(o) => {
                if o.n_aux == 0 {
                    return Err(invalid("n_aux must be greater than 0"));
                }
            }
            LayerKind::Softmax(o) | LayerKind::Svm(o) => {
                if o.n_out < 2 {
                    return Err(invalid("n_out must be at least 2 classes"));
                }
                check_l2(o.l2_reg).map_err(|r| invalid(r))?;
            }
            LayerKind::SoftAux(o) => {
                if o.n_out < 2 || o.n_aux == 0 {
                    return Err(invalid("n_out must be at least 2 and n_aux greater than 0"));
                }
                check_l2(o.l2_reg).map_err(|r| invalid(r))?;
            }
            LayerKind::CenteredOut(o) => {
                if o.n_classes < 2 || o.n_features == 0 {
                    return Err(invalid(
                        "n_classes must be at least 2 and n_features greater than 0",
                    ));
                }
                check_l2(o.l2_reg).map_err(|r| invalid(r))?;
            }
        }

        Ok(())
    }
}

fn check_l2(l2_reg: f32) -> std::result::Result<(), &'static str> {
    if l2_reg < 0.0 || l2_reg.is_nan() {
        Err("l2_reg must be non-negative")
    } else {
        Ok(())
    }
}

fn parse_options<T: DeserializeOwned>(spec: &LayerSpec, index: usize) -> Result<T> {
    serde_json::from_value(Value::Object(spec.options.clone())).map_err(|e| {
        NetError::InvalidOptions {
            layer: index,
            tag: spec.type_tag.clone(),
            reason: e.to_string(),
        }
    })
}

/// Loads a JSON array of layer specs and checks that every entry parses.
///
/// Whole-network rules (first layer, dropout placement, shapes) are enforced later,
/// when the network is assembled.
///
/// # Examples
///
/// ```no_run
/// use layernet::architecture::load_layer_specs;
///
/// let layers = load_layer_specs("config/layers_conv.json").unwrap();
/// assert!(!layers.is_empty());
/// ```
pub fn load_layer_specs(path: &str) -> Result<Vec<LayerSpec>> {
    let contents = fs::read_to_string(path)?;
    let specs: Vec<LayerSpec> = serde_json::from_str(&contents)?;
    for (index, spec) in specs.iter().enumerate() {
        LayerKind::from_spec(spec, index)?;
    }
    Ok(specs)
}
