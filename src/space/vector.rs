//! Dense vector spaces over float components.
//!
//! The kernel set is closed (L1, L2, fractional/general Lp, cosine), so
//! it is modeled as a plain enum rather than trait objects; dispatch
//! cost is negligible next to the component loop.

use crate::error::{Result, VantageError};
use crate::object::Object;
use crate::space::{parse_space_spec, Component, DistanceValue, Space};

/// Distance kernel of a [`VectorSpace`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// Manhattan distance.
    L1,
    /// Euclidean distance.
    L2,
    /// General Minkowski distance with parameter `p > 0`; `p < 1` is
    /// permitted and yields a non-metric space.
    Lp(f64),
    /// `1 - cosine_similarity`, in `[0, 2]`; zero vectors are maximally
    /// distant from everything.
    Cosine,
}

/// A dense vector space with components of type `D` (f32 or f64).
#[derive(Debug, Clone)]
pub struct VectorSpace<D> {
    kernel: Kernel,
    _marker: std::marker::PhantomData<D>,
}

impl<D: DistanceValue + Component> VectorSpace<D> {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            _marker: std::marker::PhantomData,
        }
    }

    /// Resolve a space spec such as `l2`, `l1`, `lp:p=0.5`, `cosine`.
    pub fn from_name(spec: &str) -> Result<Self> {
        let (name, params) = parse_space_spec(spec)?;
        let kernel = match name.as_str() {
            "l1" => Kernel::L1,
            "l2" => Kernel::L2,
            "cosine" => Kernel::Cosine,
            "lp" => {
                let p = params
                    .iter()
                    .find(|(k, _)| k == "p")
                    .ok_or_else(|| {
                        VantageError::InvalidParameter(
                            "lp space requires a parameter, e.g. lp:p=0.5".into(),
                        )
                    })?
                    .1
                    .parse::<f64>()
                    .map_err(|_| {
                        VantageError::InvalidParameter(format!("bad lp parameter in '{spec}'"))
                    })?;
                if !(p > 0.0) {
                    return Err(VantageError::InvalidParameter(format!(
                        "lp parameter must be positive, got {p}"
                    )));
                }
                Kernel::Lp(p)
            }
            other => {
                return Err(VantageError::InvalidParameter(format!(
                    "unknown vector space '{other}'"
                )));
            }
        };
        Ok(Self::new(kernel))
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }
}

impl<D: DistanceValue + Component> Space<D> for VectorSpace<D> {
    type Component = D;

    fn name(&self) -> String {
        match self.kernel {
            Kernel::L1 => "l1".to_string(),
            Kernel::L2 => "l2".to_string(),
            Kernel::Lp(p) => format!("lp:p={p}"),
            Kernel::Cosine => "cosine".to_string(),
        }
    }

    fn distance(&self, left: &Object, right: &Object) -> D {
        let x = left.typed::<D>();
        let y = right.typed::<D>();
        debug_assert_eq!(x.len(), y.len());

        let d = match self.kernel {
            Kernel::L1 => x
                .iter()
                .zip(y.iter())
                .map(|(&a, &b)| (a.to_f64() - b.to_f64()).abs())
                .sum(),
            Kernel::L2 => x
                .iter()
                .zip(y.iter())
                .map(|(&a, &b)| {
                    let diff = a.to_f64() - b.to_f64();
                    diff * diff
                })
                .sum::<f64>()
                .sqrt(),
            Kernel::Lp(p) => x
                .iter()
                .zip(y.iter())
                .map(|(&a, &b)| (a.to_f64() - b.to_f64()).abs().powf(p))
                .sum::<f64>()
                .powf(1.0 / p),
            Kernel::Cosine => {
                let mut dot = 0.0;
                let mut na = 0.0;
                let mut nb = 0.0;
                for (&a, &b) in x.iter().zip(y.iter()) {
                    let (a, b) = (a.to_f64(), b.to_f64());
                    dot += a * b;
                    na += a * a;
                    nb += b * b;
                }
                if na < 1e-20 || nb < 1e-20 {
                    1.0
                } else {
                    1.0 - (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
                }
            }
        };
        D::from_f64(d)
    }

    fn parse_components(&self, text: &str) -> std::result::Result<Vec<D>, String> {
        text.split_whitespace()
            .map(|tok| {
                tok.parse::<D>()
                    .map_err(|_| format!("cannot parse component '{tok}'"))
            })
            .collect()
    }

    fn unparse(&self, obj: &Object) -> String {
        let comps = obj.typed::<D>();
        let mut out = String::new();
        for (i, c) in comps.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&c.to_string());
        }
        out
    }
}
