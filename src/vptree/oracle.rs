//! The polynomial pruning oracle.
//!
//! Classic metric VP-tree search skips the far child of a node when
//! `MaxDist <= |M - d(q, pivot)|`, which the triangle inequality makes
//! safe. In non-metric (or merely hard) spaces that rule is either
//! unsound or uselessly conservative, so it is generalized to a
//! parametric polynomial test with independent coefficients per side:
//!
//! - left child only, when `MaxDist < alpha_left * (M - d)^exp_left` and `d <= M`;
//! - right child only, when `MaxDist < alpha_right * (d - M)^exp_right` and `d >= M`;
//! - both children otherwise.
//!
//! `alpha = 1, exp = 1` reduces to the stretched triangle inequality;
//! larger coefficients prune more aggressively and trade recall for
//! speed. The coefficients are exactly what the auto-tuner learns.
//!
//! # References
//!
//! - Yianilos (1993): "Data structures and algorithms for nearest
//!   neighbor search in general metric spaces"
//! - Chavez & Navarro (2003): "Probabilistic proximity search: fighting
//!   the curse of dimensionality in metric spaces"
//! - Boytsov & Naidan (NIPS 2013): "Learning to prune in metric and
//!   non-metric spaces"

use crate::error::{Result, VantageError};
use crate::space::DistanceValue;

/// Which children of an internal node the search must visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitDecision {
    Left,
    Right,
    Both,
}

impl VisitDecision {
    #[inline]
    pub fn visits_left(self) -> bool {
        matches!(self, VisitDecision::Left | VisitDecision::Both)
    }

    #[inline]
    pub fn visits_right(self) -> bool {
        matches!(self, VisitDecision::Right | VisitDecision::Both)
    }
}

/// Pruner coefficients: one `(alpha, exponent)` pair per side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrunerParams {
    pub alpha_left: f64,
    pub exp_left: u32,
    pub alpha_right: f64,
    pub exp_right: u32,
}

impl Default for PrunerParams {
    /// The stretched triangle inequality.
    fn default() -> Self {
        Self {
            alpha_left: 1.0,
            exp_left: 1,
            alpha_right: 1.0,
            exp_right: 1,
        }
    }
}

impl PrunerParams {
    pub fn new(alpha_left: f64, exp_left: u32, alpha_right: f64, exp_right: u32) -> Self {
        Self {
            alpha_left,
            exp_left,
            alpha_right,
            exp_right,
        }
    }
}

/// A state-free classifier deciding which subtrees a query must visit.
///
/// Parameters are validated at construction; `classify` itself cannot
/// fail and depends only on its three inputs and the parameters.
#[derive(Debug, Clone, Copy)]
pub struct PolynomialPruner {
    params: PrunerParams,
}

impl PolynomialPruner {
    pub fn new(params: PrunerParams) -> Result<Self> {
        if !(params.alpha_left > 0.0) || params.alpha_left.is_nan() {
            return Err(VantageError::InvalidParameter(format!(
                "alphaLeft must be positive, got {}",
                params.alpha_left
            )));
        }
        if !(params.alpha_right > 0.0) || params.alpha_right.is_nan() {
            return Err(VantageError::InvalidParameter(format!(
                "alphaRight must be positive, got {}",
                params.alpha_right
            )));
        }
        if params.exp_left == 0 || params.exp_right == 0 {
            return Err(VantageError::InvalidParameter(
                "pruner exponents must be at least 1".into(),
            ));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> PrunerParams {
        self.params
    }

    /// Decide which children to visit given the query-to-pivot distance,
    /// the current query radius, and the node median.
    ///
    /// The inequalities are strict: when `dist == median` both tests
    /// have a zero right-hand side and fail, so both subtrees are
    /// visited. Median ties are common with discrete or quantized
    /// distances and objects at exactly the median may sit in either
    /// subtree.
    #[inline]
    pub fn classify<D: DistanceValue>(
        &self,
        dist: D,
        query_radius: f64,
        median: D,
    ) -> VisitDecision {
        let d = dist.to_f64();
        let m = median.to_f64();

        if d <= m {
            let bound = self.params.alpha_left * efficient_pow(m - d, self.params.exp_left);
            if query_radius < bound {
                return VisitDecision::Left;
            }
        }
        if d >= m {
            let bound = self.params.alpha_right * efficient_pow(d - m, self.params.exp_right);
            if query_radius < bound {
                return VisitDecision::Right;
            }
        }
        VisitDecision::Both
    }
}

/// Integer power by exponentiation-by-squaring, with fast paths for the
/// exponents that actually occur.
#[inline]
pub fn efficient_pow(base: f64, exp: u32) -> f64 {
    match exp {
        0 => 1.0,
        1 => base,
        2 => base * base,
        mut e => {
            let mut acc = 1.0;
            let mut b = base;
            while e > 0 {
                if e & 1 == 1 {
                    acc *= b;
                }
                b *= b;
                e >>= 1;
            }
            acc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pruner(al: f64, el: u32, ar: f64, er: u32) -> PolynomialPruner {
        PolynomialPruner::new(PrunerParams::new(al, el, ar, er)).unwrap()
    }

    #[test]
    fn efficient_pow_matches_powi() {
        for exp in 0..12u32 {
            for &base in &[0.0, 0.5, 1.0, 1.7, 3.0] {
                let expected = f64::powi(base, exp as i32);
                assert!(
                    (efficient_pow(base, exp) - expected).abs() <= expected * 1e-12,
                    "base={base} exp={exp}"
                );
            }
        }
    }

    #[test]
    fn median_tie_visits_both() {
        let p = pruner(1.0, 1, 1.0, 1);
        assert_eq!(p.classify(5.0f64, 0.0, 5.0), VisitDecision::Both);
        // Also with a huge coefficient and a zero radius.
        let p = pruner(1e12, 1, 1e12, 1);
        assert_eq!(p.classify(7i32, 0.0, 7), VisitDecision::Both);
    }

    #[test]
    fn one_sided_pruning() {
        let p = pruner(1.0, 1, 1.0, 1);
        // Query well inside the ball, small radius: skip the right child.
        assert_eq!(p.classify(1.0f64, 0.5, 5.0), VisitDecision::Left);
        // Query well outside: skip the left child.
        assert_eq!(p.classify(9.0f64, 0.5, 5.0), VisitDecision::Right);
        // Radius too large to prune either side.
        assert_eq!(p.classify(4.0f64, 10.0, 5.0), VisitDecision::Both);
    }

    #[test]
    fn infinite_radius_never_prunes() {
        let p = pruner(100.0, 2, 100.0, 2);
        assert_eq!(
            p.classify(0.0f64, f64::INFINITY, 10.0),
            VisitDecision::Both
        );
        assert_eq!(
            p.classify(20.0f64, f64::INFINITY, 10.0),
            VisitDecision::Both
        );
    }

    #[test]
    fn higher_exponent_widens_pruning_far_from_median() {
        let linear = pruner(1.0, 1, 1.0, 1);
        let quad = pruner(1.0, 2, 1.0, 2);
        // diff = 3, radius 5: linear keeps both, quadratic prunes.
        assert_eq!(linear.classify(2.0f64, 5.0, 5.0), VisitDecision::Both);
        assert_eq!(quad.classify(2.0f64, 5.0, 5.0), VisitDecision::Left);
    }

    #[test]
    fn invalid_parameters_rejected() {
        assert!(PolynomialPruner::new(PrunerParams::new(0.0, 1, 1.0, 1)).is_err());
        assert!(PolynomialPruner::new(PrunerParams::new(-1.0, 1, 1.0, 1)).is_err());
        assert!(PolynomialPruner::new(PrunerParams::new(1.0, 0, 1.0, 1)).is_err());
        assert!(PolynomialPruner::new(PrunerParams::new(1.0, 1, 1.0, 0)).is_err());
        assert!(PolynomialPruner::new(PrunerParams::new(f64::NAN, 1, 1.0, 1)).is_err());
        assert!(PolynomialPruner::new(PrunerParams::default()).is_ok());
    }

    #[test]
    fn integer_distances_promote_without_overflow() {
        // A large integer diff raised to a power overflows i32 but not
        // the f64 pruning math.
        let p = pruner(1.0, 4, 1.0, 4);
        // diff^4 = 1e20: radii below that bound still prune to one side.
        assert_eq!(p.classify(0i32, 1e15, 100_000), VisitDecision::Left);
        assert_eq!(p.classify(0i32, 1e19, 100_000), VisitDecision::Left);
        assert_eq!(p.classify(0i32, 1e21, 100_000), VisitDecision::Both);
    }
}
