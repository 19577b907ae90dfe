//! Feature vectors and the centroid/distance math over them.
//!
//! An article's feature vector comes in one of two shapes: **sparse** (a map
//! from named dimension to weight, e.g. term frequencies) or **dense** (a
//! fixed-length list, e.g. an embedding). Both shapes are accepted, but every
//! set of vectors that is averaged or compared together must share one shape,
//! and dense vectors must additionally share one length.
//!
//! Callers supply vectors; Slant never generates them.
//!
//! # Complexity
//! - `average_vectors`: O(n·d), where d is the dense length or the size of the
//!   sparse key union
//! - `euclidean_distance`: O(d)

use crate::{Result, SlantError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An article's position in feature space.
///
/// Serialized untagged: a JSON object is sparse, a JSON array is dense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureVector {
    /// Named dimensions. A dimension missing from one side counts as `0.0`.
    Sparse(BTreeMap<String, f64>),
    /// Positional dimensions. Lengths must agree.
    Dense(Vec<f64>),
}

/// Which shape a [`FeatureVector`] has. Carried by [`SlantError::KindMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Sparse,
    Dense,
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorKind::Sparse => write!(f, "sparse"),
            VectorKind::Dense => write!(f, "dense"),
        }
    }
}

impl FeatureVector {
    pub fn kind(&self) -> VectorKind {
        match self {
            FeatureVector::Sparse(_) => VectorKind::Sparse,
            FeatureVector::Dense(_) => VectorKind::Dense,
        }
    }

    /// Number of dimensions carried explicitly by this vector.
    pub fn len(&self) -> usize {
        match self {
            FeatureVector::Sparse(m) => m.len(),
            FeatureVector::Dense(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(v: Vec<f64>) -> Self {
        FeatureVector::Dense(v)
    }
}

impl From<BTreeMap<String, f64>> for FeatureVector {
    fn from(m: BTreeMap<String, f64>) -> Self {
        FeatureVector::Sparse(m)
    }
}

// ---------------------------------------------------------------------------
// Centroid
// ---------------------------------------------------------------------------

/// Arithmetic mean of `vectors`.
///
/// Returns `Ok(None)` when `vectors` is empty. The first vector fixes the kind
/// (and, for dense vectors, the length) that every later vector must match.
///
/// # Errors
///
/// - [`SlantError::KindMismatch`] if sparse and dense vectors are mixed.
/// - [`SlantError::LengthMismatch`] if dense vectors differ in length.
pub fn average_vectors<'a, I>(vectors: I) -> Result<Option<FeatureVector>>
where
    I: IntoIterator<Item = &'a FeatureVector>,
{
    let mut iter = vectors.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };

    match first {
        FeatureVector::Sparse(first) => {
            let mut totals: BTreeMap<String, f64> = first.clone();
            let mut count = 1usize;
            for vec in iter {
                let FeatureVector::Sparse(m) = vec else {
                    return Err(kind_mismatch(VectorKind::Sparse, vec.kind()));
                };
                for (key, value) in m {
                    *totals.entry(key.clone()).or_insert(0.0) += value;
                }
                count += 1;
            }
            let n = count as f64;
            for value in totals.values_mut() {
                *value /= n;
            }
            Ok(Some(FeatureVector::Sparse(totals)))
        }
        FeatureVector::Dense(first) => {
            let length = first.len();
            let mut totals = first.clone();
            let mut count = 1usize;
            for vec in iter {
                let FeatureVector::Dense(v) = vec else {
                    return Err(kind_mismatch(VectorKind::Dense, vec.kind()));
                };
                if v.len() != length {
                    return Err(length_mismatch(length, v.len()));
                }
                for (total, value) in totals.iter_mut().zip(v) {
                    *total += value;
                }
                count += 1;
            }
            let n = count as f64;
            for total in totals.iter_mut() {
                *total /= n;
            }
            Ok(Some(FeatureVector::Dense(totals)))
        }
    }
}

// ---------------------------------------------------------------------------
// Distance
// ---------------------------------------------------------------------------

/// Euclidean (L2) distance between `a` and `b`.
///
/// Sparse vectors are compared over the union of their keys. Dense vectors
/// are compared positionally.
///
/// # Errors
///
/// - [`SlantError::KindMismatch`] if one side is sparse and the other dense.
/// - [`SlantError::LengthMismatch`] if two dense vectors differ in length.
pub fn euclidean_distance(a: &FeatureVector, b: &FeatureVector) -> Result<f64> {
    match (a, b) {
        (FeatureVector::Sparse(a), FeatureVector::Sparse(b)) => {
            let shared_and_left: f64 = a
                .iter()
                .map(|(k, x)| (x - b.get(k).copied().unwrap_or(0.0)).powi(2))
                .sum();
            let right_only: f64 = b
                .iter()
                .filter(|(k, _)| !a.contains_key(*k))
                .map(|(_, y)| y.powi(2))
                .sum();
            Ok((shared_and_left + right_only).sqrt())
        }
        (FeatureVector::Dense(a), FeatureVector::Dense(b)) => {
            if a.len() != b.len() {
                return Err(length_mismatch(a.len(), b.len()));
            }
            Ok(a.iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt())
        }
        (left, right) => Err(kind_mismatch(left.kind(), right.kind())),
    }
}

fn kind_mismatch(left: VectorKind, right: VectorKind) -> SlantError {
    tracing::warn!(%left, %right, "refusing to combine feature vectors of different kinds");
    SlantError::KindMismatch { left, right }
}

fn length_mismatch(expected: usize, found: usize) -> SlantError {
    tracing::warn!(expected, found, "refusing to combine dense vectors of different lengths");
    SlantError::LengthMismatch { expected, found }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
