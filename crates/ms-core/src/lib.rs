#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F64,
    F32,
}

impl DType {
    /// Round a value to the precision this dtype stores.
    #[must_use]
    pub fn round(self, value: f64) -> f64 {
        match self {
            Self::F64 => value,
            Self::F32 => f64::from(value as f32),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
        }
    }
}

/// Result dtype of a binary operation between two tensors.
#[must_use]
pub fn promote(lhs: DType, rhs: DType) -> DType {
    match (lhs, rhs) {
        (DType::F32, DType::F32) => DType::F32,
        _ => DType::F64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Strict,
    Hardened,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorMeta {
    shape: Vec<usize>,
    dtype: DType,
}

impl TensorMeta {
    #[must_use]
    pub fn scalar(dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            dtype,
        }
    }

    pub fn from_shape(shape: Vec<usize>, dtype: DType) -> Result<Self, TensorMetaError> {
        checked_numel(&shape)?;
        Ok(Self { shape, dtype })
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// True for the empty shape and for shapes like `[1]` or `[1, 1]`.
    #[must_use]
    pub fn is_single_element(&self) -> bool {
        self.numel() == 1
    }

    #[must_use]
    pub fn fingerprint64(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.shape.hash(&mut hasher);
        self.dtype.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorMetaError {
    ShapeOverflow {
        shape: Vec<usize>,
    },
    ValueCountMismatch {
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for TensorMetaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeOverflow { shape } => {
                write!(f, "element count overflows usize for shape {shape:?}")
            }
            Self::ValueCountMismatch { expected, actual } => {
                write!(
                    f,
                    "value count mismatch: shape needs {expected} values, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for TensorMetaError {}

/// Owned, row-major contiguous tensor.
///
/// Values are held as `f64` regardless of dtype; an `F32` tensor rounds every
/// stored value through `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTensor {
    meta: TensorMeta,
    values: Vec<f64>,
}

impl DenseTensor {
    pub fn new(values: Vec<f64>, shape: Vec<usize>, dtype: DType) -> Result<Self, TensorMetaError> {
        let meta = TensorMeta::from_shape(shape, dtype)?;
        Self::from_meta(meta, values)
    }

    pub fn from_meta(meta: TensorMeta, mut values: Vec<f64>) -> Result<Self, TensorMetaError> {
        let expected = meta.numel();
        if values.len() != expected {
            return Err(TensorMetaError::ValueCountMismatch {
                expected,
                actual: values.len(),
            });
        }
        if meta.dtype() == DType::F32 {
            for value in &mut values {
                *value = DType::F32.round(*value);
            }
        }
        Ok(Self { meta, values })
    }

    #[must_use]
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Self {
            meta: TensorMeta::scalar(dtype),
            values: vec![dtype.round(value)],
        }
    }

    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Result<Self, TensorMetaError> {
        let meta = TensorMeta::from_shape(shape, dtype)?;
        let values = vec![0.0; meta.numel()];
        Ok(Self { meta, values })
    }

    /// Same shape, new values and dtype.
    pub fn with_values(&self, values: Vec<f64>, dtype: DType) -> Result<Self, TensorMetaError> {
        Self::from_meta(self.meta.clone().with_dtype(dtype), values)
    }

    #[must_use]
    pub fn meta(&self) -> &TensorMeta {
        &self.meta
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.meta.shape()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.meta.dtype()
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable access for the owner of the tensor. Length stays fixed.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// The value of a rank-0 or one-element tensor.
    #[must_use]
    pub fn single_value(&self) -> Option<f64> {
        if self.meta.is_single_element() {
            self.values.first().copied()
        } else {
            None
        }
    }

    #[must_use]
    pub fn fingerprint64(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.meta.fingerprint64().hash(&mut hasher);
        for value in &self.values {
            value.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}

fn checked_numel(shape: &[usize]) -> Result<usize, TensorMetaError> {
    shape
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| TensorMetaError::ShapeOverflow {
            shape: shape.to_vec(),
        })
}
