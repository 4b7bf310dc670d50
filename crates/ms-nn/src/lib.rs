#![forbid(unsafe_code)]

//! Reference parameter containers.
//!
//! These modules only hold parameters; they exist so that whole-model algebra
//! has concrete, reconstructible models to operate on.

use std::fmt;

use ms_algebra::{AlgebraError, ParameterContainer, Reconstructible};
use ms_core::{DType, DenseTensor, TensorMeta, TensorMetaError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NnError {
    InvalidConfig { reason: &'static str },
    ParameterShape {
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    Tensor(TensorMetaError),
}

impl fmt::Display for NnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid module config: {reason}"),
            Self::ParameterShape {
                name,
                expected,
                actual,
            } => write!(
                f,
                "parameter '{name}' has shape {actual:?}, expected {expected:?}"
            ),
            Self::Tensor(error) => write!(f, "tensor failure: {error}"),
        }
    }
}

impl std::error::Error for NnError {}

impl From<TensorMetaError> for NnError {
    fn from(value: TensorMetaError) -> Self {
        Self::Tensor(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    pub in_features: usize,
    pub out_features: usize,
    pub bias: bool,
    pub dtype: DType,
}

impl LinearConfig {
    #[must_use]
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Self {
        Self {
            in_features,
            out_features,
            bias,
            dtype: DType::F64,
        }
    }

    fn validate(&self) -> Result<(), NnError> {
        if self.in_features == 0 {
            return Err(NnError::InvalidConfig {
                reason: "linear layer requires in_features > 0",
            });
        }
        if self.out_features == 0 {
            return Err(NnError::InvalidConfig {
                reason: "linear layer requires out_features > 0",
            });
        }
        Ok(())
    }
}

/// Fully connected layer parameters: `weight` is `[out_features, in_features]`,
/// `bias` (if enabled) is `[out_features]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    config: LinearConfig,
    weight: DenseTensor,
    bias: Option<DenseTensor>,
}

impl Linear {
    /// Uniform initialization in `[-bound, bound]`, `bound = sqrt(1 / in_features)`,
    /// drawn from a deterministic stream keyed by `seed`.
    pub fn new(config: LinearConfig, seed: u64) -> Result<Self, NnError> {
        config.validate()?;
        let bound = 1.0 / (config.in_features as f64).sqrt();
        let mut stream = SplitMix64::new(seed);

        let weight_meta =
            TensorMeta::from_shape(vec![config.out_features, config.in_features], config.dtype)?;
        let weight_len = weight_meta.numel();
        let weight = DenseTensor::from_meta(weight_meta, stream.uniform(weight_len, bound))?;
        let bias = if config.bias {
            Some(DenseTensor::new(
                stream.uniform(config.out_features, bound),
                vec![config.out_features],
                config.dtype,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// All parameters zero.
    pub fn zeros(config: LinearConfig) -> Result<Self, NnError> {
        config.validate()?;
        let weight = DenseTensor::zeros(
            vec![config.out_features, config.in_features],
            config.dtype,
        )?;
        let bias = if config.bias {
            Some(DenseTensor::zeros(vec![config.out_features], config.dtype)?)
        } else {
            None
        };
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a layer around existing tensors, checking their shapes.
    pub fn from_tensors(weight: DenseTensor, bias: Option<DenseTensor>) -> Result<Self, NnError> {
        let &[out_features, in_features] = weight.shape() else {
            return Err(NnError::ParameterShape {
                name: "weight",
                expected: vec![0, 0],
                actual: weight.shape().to_vec(),
            });
        };
        if let Some(bias) = &bias
            && bias.shape() != [out_features]
        {
            return Err(NnError::ParameterShape {
                name: "bias",
                expected: vec![out_features],
                actual: bias.shape().to_vec(),
            });
        }
        let config = LinearConfig {
            in_features,
            out_features,
            bias: bias.is_some(),
            dtype: weight.dtype(),
        };
        config.validate()?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    #[must_use]
    pub fn config(&self) -> LinearConfig {
        self.config
    }

    #[must_use]
    pub fn weight(&self) -> &DenseTensor {
        &self.weight
    }

    #[must_use]
    pub fn bias(&self) -> Option<&DenseTensor> {
        self.bias.as_ref()
    }

    #[must_use]
    pub fn in_features(&self) -> usize {
        self.config.in_features
    }

    #[must_use]
    pub fn out_features(&self) -> usize {
        self.config.out_features
    }
}

impl ParameterContainer for Linear {
    fn named_tensors(&self) -> Vec<(String, &DenseTensor)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(bias) = &self.bias {
            params.push(("bias".to_string(), bias));
        }
        params
    }

    fn tensor_slot_mut(&mut self, key: &str) -> Option<&mut DenseTensor> {
        match key {
            "weight" => Some(&mut self.weight),
            "bias" => self.bias.as_mut(),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        format!(
            "Linear(in_features={}, out_features={}, bias={})",
            self.config.in_features, self.config.out_features, self.config.bias
        )
    }
}

impl Reconstructible for Linear {
    type Architecture = LinearConfig;

    fn architecture(&self) -> LinearConfig {
        self.config
    }

    fn instantiate(architecture: &LinearConfig) -> Result<Self, AlgebraError> {
        Self::zeros(*architecture).map_err(|error| match error {
            NnError::Tensor(inner) => AlgebraError::Tensor(inner),
            other => AlgebraError::NotReconstructible {
                description: other.to_string(),
            },
        })
    }
}

/// Chain of linear layers. Parameter keys are prefixed with the layer index,
/// e.g. `"0.weight"`, `"1.bias"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequential {
    layers: Vec<Linear>,
}

impl Sequential {
    #[must_use]
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push(&mut self, layer: Linear) {
        self.layers.push(layer);
    }

    #[must_use]
    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ParameterContainer for Sequential {
    fn named_tensors(&self) -> Vec<(String, &DenseTensor)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(idx, layer)| {
                layer
                    .named_tensors()
                    .into_iter()
                    .map(move |(name, tensor)| (format!("{idx}.{name}"), tensor))
            })
            .collect()
    }

    fn tensor_slot_mut(&mut self, key: &str) -> Option<&mut DenseTensor> {
        let (idx, rest) = key.split_once('.')?;
        let idx: usize = idx.parse().ok()?;
        self.layers.get_mut(idx)?.tensor_slot_mut(rest)
    }

    fn describe(&self) -> String {
        let children: Vec<String> = self.layers.iter().map(Linear::describe).collect();
        format!("Sequential({})", children.join(", "))
    }
}

impl Reconstructible for Sequential {
    type Architecture = Vec<LinearConfig>;

    fn architecture(&self) -> Vec<LinearConfig> {
        self.layers.iter().map(Linear::config).collect()
    }

    fn instantiate(architecture: &Vec<LinearConfig>) -> Result<Self, AlgebraError> {
        let mut out = Self::new();
        for config in architecture {
            out.push(Linear::instantiate(config)?);
        }
        Ok(out)
    }
}

/// Deterministic uniform stream for parameter initialization.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn uniform(&mut self, count: usize, bound: f64) -> Vec<f64> {
        (0..count)
            .map(|_| {
                let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
                (2.0 * unit - 1.0) * bound
            })
            .collect()
    }
}
