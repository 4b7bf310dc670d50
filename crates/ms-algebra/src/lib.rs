#![forbid(unsafe_code)]

//! Whole-model vector algebra.
//!
//! [`ParamVector`] treats the named tensors of a model as one element of a
//! vector space. Every operator returns a fresh collection; operands are
//! never mutated.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use ms_core::{DenseTensor, TensorMetaError, promote};
use ms_kernel_cpu::{
    BinaryOp, KernelError, broadcast_scalar_f64, dot_contiguous_f64, elementwise_contiguous_f64,
    sum_of_squares_f64,
};

/// Parameter name to tensor, iterated in sorted key order.
pub type NamedTensors = BTreeMap<String, DenseTensor>;

#[derive(Debug, Clone, PartialEq)]
pub enum AlgebraError {
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    ShapeMismatch {
        key: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    UnsupportedOperand {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
    NotReconstructible {
        description: String,
    },
    Kernel(KernelError),
    Tensor(TensorMetaError),
}

impl fmt::Display for AlgebraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaMismatch {
                missing,
                unexpected,
            } => write!(
                f,
                "incompatible parameter keys: missing={missing:?}, unexpected={unexpected:?}"
            ),
            Self::ShapeMismatch { key, lhs, rhs } => {
                write!(
                    f,
                    "incompatible shapes for '{key}': lhs={lhs:?}, rhs={rhs:?}"
                )
            }
            Self::UnsupportedOperand { op, lhs, rhs } => {
                write!(f, "unsupported operand types for {op}: {lhs} and {rhs}")
            }
            Self::NotReconstructible { description } => {
                write!(f, "{description} has no container to reconstruct")
            }
            Self::Kernel(error) => write!(f, "kernel failure: {error}"),
            Self::Tensor(error) => write!(f, "tensor failure: {error}"),
        }
    }
}

impl std::error::Error for AlgebraError {}

impl From<KernelError> for AlgebraError {
    fn from(value: KernelError) -> Self {
        Self::Kernel(value)
    }
}

impl From<TensorMetaError> for AlgebraError {
    fn from(value: TensorMetaError) -> Self {
        Self::Tensor(value)
    }
}

/// Parameter names and their shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeSchema {
    entries: BTreeMap<String, Vec<usize>>,
}

impl ShapeSchema {
    #[must_use]
    pub fn of(tensors: &NamedTensors) -> Self {
        Self {
            entries: tensors
                .iter()
                .map(|(key, tensor)| (key.clone(), tensor.shape().to_vec()))
                .collect(),
        }
    }

    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, Vec<usize>>) -> Self {
        Self { entries }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn shape(&self, key: &str) -> Option<&[usize]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ensure_compatible(&self, other: &Self) -> Result<(), AlgebraError> {
        compare_schemas(&self.entries, &other.entries, Vec::as_slice, Vec::as_slice)
    }
}

/// Key sets first, then shapes in key order.
fn compare_schemas<A, B>(
    lhs: &BTreeMap<String, A>,
    rhs: &BTreeMap<String, B>,
    lhs_shape: impl Fn(&A) -> &[usize],
    rhs_shape: impl Fn(&B) -> &[usize],
) -> Result<(), AlgebraError> {
    let missing: Vec<String> = lhs
        .keys()
        .filter(|key| !rhs.contains_key(*key))
        .cloned()
        .collect();
    let unexpected: Vec<String> = rhs
        .keys()
        .filter(|key| !lhs.contains_key(*key))
        .cloned()
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(AlgebraError::SchemaMismatch {
            missing,
            unexpected,
        });
    }

    for (key, left) in lhs {
        if let Some(right) = rhs.get(key)
            && lhs_shape(left) != rhs_shape(right)
        {
            return Err(AlgebraError::ShapeMismatch {
                key: key.clone(),
                lhs: lhs_shape(left).to_vec(),
                rhs: rhs_shape(right).to_vec(),
            });
        }
    }
    Ok(())
}

/// A model-like value that exposes its parameters by name.
pub trait ParameterContainer {
    /// Every parameter with its fully qualified key, in a stable order.
    fn named_tensors(&self) -> Vec<(String, &DenseTensor)>;

    /// Mutable slot for one parameter, used when loading a mapping.
    fn tensor_slot_mut(&mut self, key: &str) -> Option<&mut DenseTensor>;

    /// Diagnostic description of the container.
    fn describe(&self) -> String;
}

/// A container that can build a fresh instance of its own type.
pub trait Reconstructible: ParameterContainer + Sized {
    type Architecture: Clone + fmt::Debug;

    fn architecture(&self) -> Self::Architecture;

    fn instantiate(architecture: &Self::Architecture) -> Result<Self, AlgebraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Key sets and shapes must match exactly.
    Strict,
    /// Missing and unexpected keys are reported instead of rejected.
    /// Shape disagreements are still rejected.
    Hardened,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded_keys: usize,
    pub missing_keys: Vec<String>,
    pub unexpected_keys: Vec<String>,
}

/// Copies `tensors` into `container`.
///
/// Nothing is written unless every check passes. Loaded values take the dtype
/// of the slot they land in.
pub fn load_named_tensors<C: ParameterContainer>(
    container: &mut C,
    tensors: &NamedTensors,
    mode: LoadMode,
) -> Result<LoadReport, AlgebraError> {
    let expected: BTreeMap<String, Vec<usize>> = container
        .named_tensors()
        .into_iter()
        .map(|(key, tensor)| (key, tensor.shape().to_vec()))
        .collect();

    for (key, tensor) in tensors {
        if let Some(shape) = expected.get(key)
            && shape.as_slice() != tensor.shape()
        {
            return Err(AlgebraError::ShapeMismatch {
                key: key.clone(),
                lhs: shape.clone(),
                rhs: tensor.shape().to_vec(),
            });
        }
    }

    let missing_keys: Vec<String> = expected
        .keys()
        .filter(|key| !tensors.contains_key(*key))
        .cloned()
        .collect();
    let unexpected_keys: Vec<String> = tensors
        .keys()
        .filter(|key| !expected.contains_key(*key))
        .cloned()
        .collect();
    if mode == LoadMode::Strict && (!missing_keys.is_empty() || !unexpected_keys.is_empty()) {
        return Err(AlgebraError::SchemaMismatch {
            missing: missing_keys,
            unexpected: unexpected_keys,
        });
    }

    let loadable: Vec<&String> = tensors
        .keys()
        .filter(|key| expected.contains_key(*key))
        .collect();
    let unreachable: Vec<String> = loadable
        .iter()
        .filter(|key| container.tensor_slot_mut(key.as_str()).is_none())
        .map(|key| (*key).clone())
        .collect();
    if !unreachable.is_empty() {
        return Err(AlgebraError::SchemaMismatch {
            missing: unreachable,
            unexpected: Vec::new(),
        });
    }

    for key in &loadable {
        let source = &tensors[key.as_str()];
        if let Some(slot) = container.tensor_slot_mut(key.as_str()) {
            *slot = slot.with_values(source.values().to_vec(), slot.dtype())?;
        }
    }

    Ok(LoadReport {
        loaded_keys: loadable.len(),
        missing_keys,
        unexpected_keys,
    })
}

/// Where a collection came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin<A> {
    Container(A),
    StateDictOnly,
}

/// Right-hand side of a collection operator.
pub enum Operand<'a, M: Reconstructible> {
    Scalar(f64),
    Tensor(&'a DenseTensor),
    Collection(&'a ParamVector<M>),
    Unsupported(&'static str),
}

impl<M: Reconstructible> Clone for Operand<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Reconstructible> Copy for Operand<'_, M> {}

impl<M: Reconstructible> fmt::Debug for Operand<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operand({})", self.type_name())
    }
}

impl<M: Reconstructible> Operand<'_, M> {
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Scalar(_) => "scalar".to_string(),
            Self::Tensor(tensor) => format!("DenseTensor{:?}", tensor.shape()),
            Self::Collection(_) => ParamVector::<M>::type_label(),
            Self::Unsupported(name) => (*name).to_string(),
        }
    }
}

impl<M: Reconstructible> From<f64> for Operand<'_, M> {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl<M: Reconstructible> From<f32> for Operand<'_, M> {
    fn from(value: f32) -> Self {
        Self::Scalar(f64::from(value))
    }
}

impl<M: Reconstructible> From<i32> for Operand<'_, M> {
    fn from(value: i32) -> Self {
        Self::Scalar(f64::from(value))
    }
}

impl<M: Reconstructible> From<i64> for Operand<'_, M> {
    fn from(value: i64) -> Self {
        Self::Scalar(value as f64)
    }
}

impl<'a, M: Reconstructible> From<&'a DenseTensor> for Operand<'a, M> {
    fn from(value: &'a DenseTensor) -> Self {
        Self::Tensor(value)
    }
}

impl<'a, M: Reconstructible> From<&'a ParamVector<M>> for Operand<'a, M> {
    fn from(value: &'a ParamVector<M>) -> Self {
        Self::Collection(value)
    }
}

impl<M: Reconstructible> From<&str> for Operand<'_, M> {
    fn from(_: &str) -> Self {
        Self::Unsupported("&str")
    }
}

impl<M: Reconstructible> From<&String> for Operand<'_, M> {
    fn from(_: &String) -> Self {
        Self::Unsupported("String")
    }
}

/// A model's parameters as one vector-space element.
pub struct ParamVector<M: Reconstructible> {
    tensors: NamedTensors,
    origin: Origin<M::Architecture>,
    description: String,
}

impl<M: Reconstructible> Clone for ParamVector<M> {
    fn clone(&self) -> Self {
        Self {
            tensors: self.tensors.clone(),
            origin: self.origin.clone(),
            description: self.description.clone(),
        }
    }
}

impl<M: Reconstructible> fmt::Debug for ParamVector<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamVector")
            .field("tensors", &self.tensors)
            .field("origin", &self.origin)
            .field("description", &self.description)
            .finish()
    }
}

impl<M: Reconstructible> fmt::Display for ParamVector<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl<M: Reconstructible> ParamVector<M> {
    /// Copies every tensor out of `container`.
    #[must_use]
    pub fn wrap(container: &M) -> Self {
        let tensors = container
            .named_tensors()
            .into_iter()
            .map(|(key, tensor)| (key, tensor.clone()))
            .collect();
        Self {
            tensors,
            origin: Origin::Container(container.architecture()),
            description: format!("ParamVector({})", container.describe()),
        }
    }

    /// A collection with no container behind it. It supports every operator
    /// but cannot be materialized.
    #[must_use]
    pub fn from_named_tensors(tensors: NamedTensors) -> Self {
        Self {
            tensors,
            origin: Origin::StateDictOnly,
            description: "ParamVector(state dict only)".to_string(),
        }
    }

    fn rebuild(&self, tensors: NamedTensors) -> Self {
        Self {
            tensors,
            origin: self.origin.clone(),
            description: self.description.clone(),
        }
    }

    #[must_use]
    pub fn type_label() -> String {
        format!("ParamVector<{}>", short_type_name::<M>())
    }

    #[must_use]
    pub fn tensors(&self) -> &NamedTensors {
        &self.tensors
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DenseTensor> {
        self.tensors.get(key)
    }

    #[must_use]
    pub fn schema(&self) -> ShapeSchema {
        ShapeSchema::of(&self.tensors)
    }

    #[must_use]
    pub fn origin(&self) -> &Origin<M::Architecture> {
        &self.origin
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total element count across all parameters.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.tensors.values().map(DenseTensor::numel).sum()
    }

    pub fn compatible(&self, other: &Self) -> Result<(), AlgebraError> {
        compare_schemas(
            &self.tensors,
            &other.tensors,
            DenseTensor::shape,
            DenseTensor::shape,
        )
    }

    /// Elementwise dispatch shared by every binary arithmetic operator.
    pub fn apply<'a>(
        &self,
        other: impl Into<Operand<'a, M>>,
        op: BinaryOp,
    ) -> Result<Self, AlgebraError>
    where
        M: 'a,
    {
        let other = other.into();
        match other {
            Operand::Scalar(value) => self.map_tensors(|tensor| {
                let values = broadcast_scalar_f64(tensor.values(), value, op);
                Ok(tensor.with_values(values, tensor.dtype())?)
            }),
            Operand::Tensor(rhs) => {
                let Some(value) = rhs.single_value() else {
                    return Err(self.unsupported(op.symbol(), &other));
                };
                let rhs_dtype = rhs.dtype();
                self.map_tensors(|tensor| {
                    let values = broadcast_scalar_f64(tensor.values(), value, op);
                    Ok(tensor.with_values(values, promote(tensor.dtype(), rhs_dtype))?)
                })
            }
            Operand::Collection(rhs) => {
                self.compatible(rhs)?;
                let mut tensors = NamedTensors::new();
                for (key, lhs_tensor) in &self.tensors {
                    let rhs_tensor = &rhs.tensors[key.as_str()];
                    let values =
                        elementwise_contiguous_f64(lhs_tensor.values(), rhs_tensor.values(), op)?;
                    let dtype = promote(lhs_tensor.dtype(), rhs_tensor.dtype());
                    tensors.insert(key.clone(), lhs_tensor.with_values(values, dtype)?);
                }
                Ok(self.rebuild(tensors))
            }
            Operand::Unsupported(_) => Err(self.unsupported(op.symbol(), &other)),
        }
    }

    pub fn add<'a>(&self, other: impl Into<Operand<'a, M>>) -> Result<Self, AlgebraError>
    where
        M: 'a,
    {
        self.apply(other, BinaryOp::Add)
    }

    pub fn sub<'a>(&self, other: impl Into<Operand<'a, M>>) -> Result<Self, AlgebraError>
    where
        M: 'a,
    {
        self.apply(other, BinaryOp::Sub)
    }

    pub fn mul<'a>(&self, other: impl Into<Operand<'a, M>>) -> Result<Self, AlgebraError>
    where
        M: 'a,
    {
        self.apply(other, BinaryOp::Mul)
    }

    pub fn div<'a>(&self, other: impl Into<Operand<'a, M>>) -> Result<Self, AlgebraError>
    where
        M: 'a,
    {
        self.apply(other, BinaryOp::Div)
    }

    /// Elementwise power. The exponent must be a scalar or a single-element
    /// tensor.
    pub fn pow<'a>(&self, exponent: impl Into<Operand<'a, M>>) -> Result<Self, AlgebraError>
    where
        M: 'a,
    {
        let exponent = exponent.into();
        if let Operand::Collection(_) = exponent {
            return Err(self.unsupported(BinaryOp::Pow.symbol(), &exponent));
        }
        self.apply(exponent, BinaryOp::Pow)
    }

    /// Sum over keys of the flattened dot product of matching tensors.
    pub fn inner<'a>(&self, other: impl Into<Operand<'a, M>>) -> Result<f64, AlgebraError>
    where
        M: 'a,
    {
        let other = other.into();
        let Operand::Collection(rhs) = other else {
            return Err(self.unsupported("@", &other));
        };
        self.compatible(rhs)?;
        let mut total = 0.0;
        for (key, lhs_tensor) in &self.tensors {
            total += dot_contiguous_f64(lhs_tensor.values(), rhs.tensors[key.as_str()].values())?;
        }
        Ok(total)
    }

    /// `sqrt(inner(self, self))`.
    #[must_use]
    pub fn norm(&self) -> f64 {
        let mut total = 0.0;
        for tensor in self.tensors.values() {
            total += sum_of_squares_f64(tensor.values());
        }
        total.sqrt()
    }

    pub fn neg(&self) -> Self {
        self.map_unchecked(|value| -value)
    }

    /// The additive identity for this schema.
    pub fn zeros_like(&self) -> Self {
        self.map_unchecked(|value| value * 0.0)
    }

    /// `norm(self - other)`.
    pub fn distance(&self, other: &Self) -> Result<f64, AlgebraError> {
        Ok(self.sub(other)?.norm())
    }

    pub fn cosine_similarity(&self, other: &Self) -> Result<f64, AlgebraError> {
        let dot = self.inner(other)?;
        Ok(dot / (self.norm() * other.norm()))
    }

    /// `self * (1 - t) + other * t`.
    pub fn lerp(&self, other: &Self, t: f64) -> Result<Self, AlgebraError> {
        self.compatible(other)?;
        self.mul(1.0 - t)?.add(&other.mul(t)?)
    }

    /// Elementwise mean of compatible collections.
    pub fn mean(items: &[&Self]) -> Result<Self, AlgebraError> {
        let Some((first, rest)) = items.split_first() else {
            return Err(empty_reduction("mean"));
        };
        let mut total = (*first).clone();
        for item in rest {
            total = total.add(*item)?;
        }
        total.div(items.len() as f64)
    }

    /// `Σ wᵢ · aᵢ`, e.g. a sample-weighted aggregate of client updates.
    pub fn weighted_sum(terms: &[(f64, &Self)]) -> Result<Self, AlgebraError> {
        let Some(((first_weight, first), rest)) = terms.split_first() else {
            return Err(empty_reduction("weighted_sum"));
        };
        let mut total = first.mul(*first_weight)?;
        for (weight, item) in rest {
            total = total.add(&item.mul(*weight)?)?;
        }
        Ok(total)
    }

    /// Builds a fresh container of the originating type and loads this
    /// collection into it.
    pub fn materialize(&self, mode: LoadMode) -> Result<(M, LoadReport), AlgebraError> {
        let Origin::Container(architecture) = &self.origin else {
            return Err(AlgebraError::NotReconstructible {
                description: self.description.clone(),
            });
        };
        let mut container = M::instantiate(architecture)?;
        let report = load_named_tensors(&mut container, &self.tensors, mode)?;
        Ok((container, report))
    }

    fn map_tensors<F>(&self, mut f: F) -> Result<Self, AlgebraError>
    where
        F: FnMut(&DenseTensor) -> Result<DenseTensor, AlgebraError>,
    {
        let mut tensors = NamedTensors::new();
        for (key, tensor) in &self.tensors {
            tensors.insert(key.clone(), f(tensor)?);
        }
        Ok(self.rebuild(tensors))
    }

    fn map_unchecked(&self, f: impl Fn(f64) -> f64) -> Self {
        let tensors = self
            .tensors
            .iter()
            .map(|(key, tensor)| {
                let mut out = tensor.clone();
                for value in out.values_mut() {
                    *value = f(*value);
                }
                (key.clone(), out)
            })
            .collect();
        self.rebuild(tensors)
    }

    fn unsupported(&self, op: &'static str, other: &Operand<'_, M>) -> AlgebraError {
        AlgebraError::UnsupportedOperand {
            op,
            lhs: Self::type_label(),
            rhs: other.type_name(),
        }
    }
}

fn empty_reduction(op: &'static str) -> AlgebraError {
    AlgebraError::UnsupportedOperand {
        op,
        lhs: "empty slice".to_string(),
        rhs: "nothing".to_string(),
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl<'a, M, R> Add<R> for &'a ParamVector<M>
where
    M: Reconstructible + 'a,
    R: Into<Operand<'a, M>>,
{
    type Output = Result<ParamVector<M>, AlgebraError>;

    fn add(self, rhs: R) -> Self::Output {
        self.apply(rhs, BinaryOp::Add)
    }
}

impl<'a, M, R> Sub<R> for &'a ParamVector<M>
where
    M: Reconstructible + 'a,
    R: Into<Operand<'a, M>>,
{
    type Output = Result<ParamVector<M>, AlgebraError>;

    fn sub(self, rhs: R) -> Self::Output {
        self.apply(rhs, BinaryOp::Sub)
    }
}

impl<'a, M, R> Mul<R> for &'a ParamVector<M>
where
    M: Reconstructible + 'a,
    R: Into<Operand<'a, M>>,
{
    type Output = Result<ParamVector<M>, AlgebraError>;

    fn mul(self, rhs: R) -> Self::Output {
        self.apply(rhs, BinaryOp::Mul)
    }
}

impl<'a, M, R> Div<R> for &'a ParamVector<M>
where
    M: Reconstructible + 'a,
    R: Into<Operand<'a, M>>,
{
    type Output = Result<ParamVector<M>, AlgebraError>;

    fn div(self, rhs: R) -> Self::Output {
        self.apply(rhs, BinaryOp::Div)
    }
}
