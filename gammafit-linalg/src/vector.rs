#![allow(clippy::needless_range_loop)]
//! Dense numeric vector.
//!
//! A fixed-dimension, heap-owned vector of `f64`. The dimension never
//! changes after construction and all binary operations check it,
//! returning `DimensionMismatch` instead of coercing.
//!
//! Element access through `Index`/`IndexMut` is bounds-checked by the
//! slice in every build. With the `range-check` feature it additionally
//! reports the offending index through `LinalgError::IndexOutOfRange`
//! before panicking; `at`/`set_at` always return that error.

use std::fmt;
use std::ops::{Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, AddAssign, SubAssign};

use serde::{Deserialize, Serialize};

use crate::error::{LinalgError, Result};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    data: Vec<f64>,
}

impl Vector {
    /// Vector of `n` zeros.
    pub fn zeros(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    /// Vector of `n` copies of `value`.
    pub fn full(n: usize, value: f64) -> Self {
        Self {
            data: vec![value; n],
        }
    }

    pub fn from_slice(data: &[f64]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Unit vector `e_k` of dimension `n`.
    pub fn unit(n: usize, k: usize) -> Result<Self> {
        if k >= n {
            return Err(LinalgError::IndexOutOfRange { index: k, size: n });
        }
        let mut v = Self::zeros(n);
        v.data[k] = 1.0;
        Ok(v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.data.iter()
    }

    /// Checked element read.
    pub fn at(&self, index: usize) -> Result<f64> {
        self.data
            .get(index)
            .copied()
            .ok_or(LinalgError::IndexOutOfRange {
                index,
                size: self.data.len(),
            })
    }

    /// Checked element write.
    pub fn set_at(&mut self, index: usize, value: f64) -> Result<()> {
        let size = self.data.len();
        match self.data.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LinalgError::IndexOutOfRange { index, size }),
        }
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    fn check_dim(&self, other: &Vector) -> Result<()> {
        if self.len() != other.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.len(),
                got: other.len(),
            });
        }
        Ok(())
    }

    /// Element-wise sum.
    pub fn add(&self, other: &Vector) -> Result<Vector> {
        self.check_dim(other)?;
        Ok(self.zip_map(other, |a, b| a + b))
    }

    /// Element-wise difference.
    pub fn sub(&self, other: &Vector) -> Result<Vector> {
        self.check_dim(other)?;
        Ok(self.zip_map(other, |a, b| a - b))
    }

    /// Element-wise product.
    pub fn hadamard(&self, other: &Vector) -> Result<Vector> {
        self.check_dim(other)?;
        Ok(self.zip_map(other, |a, b| a * b))
    }

    /// In-place `self += alpha * other`.
    pub fn axpy(&mut self, alpha: f64, other: &Vector) -> Result<()> {
        self.check_dim(other)?;
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += alpha * b;
        }
        Ok(())
    }

    pub fn dot(&self, other: &Vector) -> Result<f64> {
        self.check_dim(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Cross product; defined for 3-vectors only.
    pub fn cross(&self, other: &Vector) -> Result<Vector> {
        self.check_dim(other)?;
        if self.len() != 3 {
            return Err(LinalgError::DimensionMismatch {
                expected: 3,
                got: self.len(),
            });
        }
        let (a, b) = (&self.data, &other.data);
        Ok(Vector::from(vec![
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ]))
    }

    fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Vector, f: F) -> Vector {
        Vector {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }

    /// Apply `f` to every element, returning a new vector.
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Vector {
        Vector {
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    pub fn abs(&self) -> Vector {
        self.map(f64::abs)
    }
    pub fn sqrt(&self) -> Vector {
        self.map(f64::sqrt)
    }
    pub fn exp(&self) -> Vector {
        self.map(f64::exp)
    }
    /// Natural logarithm.
    pub fn log(&self) -> Vector {
        self.map(f64::ln)
    }
    pub fn log10(&self) -> Vector {
        self.map(f64::log10)
    }
    pub fn sin(&self) -> Vector {
        self.map(f64::sin)
    }
    pub fn cos(&self) -> Vector {
        self.map(f64::cos)
    }
    pub fn tan(&self) -> Vector {
        self.map(f64::tan)
    }
    pub fn asin(&self) -> Vector {
        self.map(f64::asin)
    }
    pub fn acos(&self) -> Vector {
        self.map(f64::acos)
    }
    pub fn atan(&self) -> Vector {
        self.map(f64::atan)
    }
    pub fn sinh(&self) -> Vector {
        self.map(f64::sinh)
    }
    pub fn cosh(&self) -> Vector {
        self.map(f64::cosh)
    }
    pub fn tanh(&self) -> Vector {
        self.map(f64::tanh)
    }
    pub fn asinh(&self) -> Vector {
        self.map(f64::asinh)
    }
    pub fn acosh(&self) -> Vector {
        self.map(f64::acosh)
    }
    pub fn atanh(&self) -> Vector {
        self.map(f64::atanh)
    }
    pub fn powi(&self, n: i32) -> Vector {
        self.map(|x| x.powi(n))
    }
    pub fn powf(&self, p: f64) -> Vector {
        self.map(|x| x.powf(p))
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn min(&self) -> Result<f64> {
        if self.data.is_empty() {
            return Err(LinalgError::EmptyVector);
        }
        Ok(self.data.iter().copied().fold(f64::INFINITY, f64::min))
    }

    pub fn max(&self) -> Result<f64> {
        if self.data.is_empty() {
            return Err(LinalgError::EmptyVector);
        }
        Ok(self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    /// Euclidean norm; zero for an empty vector.
    ///
    /// Accumulated as `scale * sqrt(ssq)` so that tiny entries do not
    /// underflow and huge ones do not overflow.
    pub fn norm(&self) -> f64 {
        let mut scale = 0.0f64;
        let mut ssq = 1.0f64;
        let mut infinite = false;
        for &x in &self.data {
            if x.is_nan() {
                return f64::NAN;
            }
            if x == 0.0 {
                continue;
            }
            let a = x.abs();
            if a.is_infinite() {
                infinite = true;
                continue;
            }
            if scale < a {
                ssq = 1.0 + ssq * (scale / a) * (scale / a);
                scale = a;
            } else {
                ssq += (a / scale) * (a / scale);
            }
        }
        if infinite {
            return f64::INFINITY;
        }
        scale * ssq.sqrt()
    }

    /// Number of elements different from zero.
    pub fn non_zeros(&self) -> usize {
        self.data.iter().filter(|&&x| x != 0.0).count()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

fn check_permutation(n: usize, p: &[usize]) -> Result<()> {
    if p.len() != n {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            got: p.len(),
        });
    }
    let mut seen = vec![false; n];
    for &i in p {
        if i >= n {
            return Err(LinalgError::IndexOutOfRange { index: i, size: n });
        }
        if seen[i] {
            return Err(LinalgError::InvalidPermutation { index: i });
        }
        seen[i] = true;
    }
    Ok(())
}

/// Gather through a permutation: `r[i] = v[p[i]]`. `None` is the identity.
pub fn perm(v: &Vector, p: Option<&[usize]>) -> Result<Vector> {
    let Some(p) = p else {
        return Ok(v.clone());
    };
    check_permutation(v.len(), p)?;
    Ok(Vector {
        data: p.iter().map(|&k| v.data[k]).collect(),
    })
}

/// Scatter through a permutation: `r[p[i]] = v[i]`. `None` is the identity.
pub fn iperm(v: &Vector, p: Option<&[usize]>) -> Result<Vector> {
    let Some(p) = p else {
        return Ok(v.clone());
    };
    check_permutation(v.len(), p)?;
    let mut r = Vector::zeros(v.len());
    for (i, &k) in p.iter().enumerate() {
        r.data[k] = v.data[i];
    }
    Ok(r)
}

impl From<Vec<f64>> for Vector {
    fn from(data: Vec<f64>) -> Self {
        Self { data }
    }
}

impl From<&[f64]> for Vector {
    fn from(data: &[f64]) -> Self {
        Self::from_slice(data)
    }
}

impl FromIterator<f64> for Vector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    #[inline]
    fn index(&self, index: usize) -> &f64 {
        #[cfg(feature = "range-check")]
        if index >= self.data.len() {
            panic!(
                "{}",
                LinalgError::IndexOutOfRange {
                    index,
                    size: self.data.len()
                }
            );
        }
        &self.data[index]
    }
}

impl IndexMut<usize> for Vector {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        #[cfg(feature = "range-check")]
        if index >= self.data.len() {
            panic!(
                "{}",
                LinalgError::IndexOutOfRange {
                    index,
                    size: self.data.len()
                }
            );
        }
        &mut self.data[index]
    }
}

impl Mul<f64> for &Vector {
    type Output = Vector;
    fn mul(self, s: f64) -> Vector {
        self.map(|x| x * s)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;
    fn mul(mut self, s: f64) -> Vector {
        self *= s;
        self
    }
}

impl Mul<&Vector> for f64 {
    type Output = Vector;
    fn mul(self, v: &Vector) -> Vector {
        v * self
    }
}

impl Div<f64> for &Vector {
    type Output = Vector;
    fn div(self, s: f64) -> Vector {
        self.map(|x| x / s)
    }
}

impl Neg for &Vector {
    type Output = Vector;
    fn neg(self) -> Vector {
        self.map(|x| -x)
    }
}

impl Neg for Vector {
    type Output = Vector;
    fn neg(mut self) -> Vector {
        self.data.iter_mut().for_each(|x| *x = -*x);
        self
    }
}

impl AddAssign<f64> for Vector {
    fn add_assign(&mut self, s: f64) {
        self.data.iter_mut().for_each(|x| *x += s);
    }
}

impl SubAssign<f64> for Vector {
    fn sub_assign(&mut self, s: f64) {
        self.data.iter_mut().for_each(|x| *x -= s);
    }
}

impl MulAssign<f64> for Vector {
    fn mul_assign(&mut self, s: f64) {
        self.data.iter_mut().for_each(|x| *x *= s);
    }
}

impl DivAssign<f64> for Vector {
    fn div_assign(&mut self, s: f64) {
        self.data.iter_mut().for_each(|x| *x /= s);
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, x) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", x)?;
        }
        write!(f, ")")
    }
}
