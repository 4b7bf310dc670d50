#![forbid(unsafe_code)]

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "**",
        }
    }

    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Pow => lhs.powf(rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    LengthMismatch { lhs: usize, rhs: usize },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch { lhs, rhs } => {
                write!(f, "contiguous length mismatch: lhs={lhs}, rhs={rhs}")
            }
        }
    }
}

impl std::error::Error for KernelError {}

fn ensure_same_len(lhs: &[f64], rhs: &[f64]) -> Result<(), KernelError> {
    if lhs.len() != rhs.len() {
        return Err(KernelError::LengthMismatch {
            lhs: lhs.len(),
            rhs: rhs.len(),
        });
    }
    Ok(())
}

/// Applies `op` pairwise over two buffers of equal length.
pub fn elementwise_contiguous_f64(
    lhs: &[f64],
    rhs: &[f64],
    op: BinaryOp,
) -> Result<Vec<f64>, KernelError> {
    ensure_same_len(lhs, rhs)?;
    Ok(lhs
        .iter()
        .zip(rhs.iter())
        .map(|(left, right)| op.apply(*left, *right))
        .collect())
}

/// Applies `op` between every element of `lhs` and a single value.
#[must_use]
pub fn broadcast_scalar_f64(lhs: &[f64], rhs: f64, op: BinaryOp) -> Vec<f64> {
    lhs.iter().map(|left| op.apply(*left, rhs)).collect()
}

fn dot_unchecked(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(left, right)| left * right)
        .sum()
}

/// Dot product of two flattened buffers.
pub fn dot_contiguous_f64(lhs: &[f64], rhs: &[f64]) -> Result<f64, KernelError> {
    ensure_same_len(lhs, rhs)?;
    Ok(dot_unchecked(lhs, rhs))
}

/// Dot product of a buffer with itself. Bit-identical to
/// `dot_contiguous_f64(values, values)`.
#[must_use]
pub fn sum_of_squares_f64(values: &[f64]) -> f64 {
    dot_unchecked(values, values)
}
