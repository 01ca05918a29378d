//! Query engines: the bounded k-NN candidate list and the range
//! accumulator.
//!
//! A query owns its distance-computation counter; every distance taken
//! on its behalf goes through [`KnnQuery::distance_to`] /
//! [`RangeQuery::distance_to`] so the counter doubles as the efficiency
//! metric and lets callers enforce budgets. Counters are per-query, so
//! parallel query threads never share state.

use std::time::Instant;

use smallvec::SmallVec;

use crate::object::Object;
use crate::space::{DistanceValue, Space};

/// Candidates held inline before spilling; k rarely exceeds this.
type Candidates<D> = SmallVec<[(D, u32); 16]>;

/// A k-nearest-neighbor query against a fixed query object.
///
/// The candidate list is kept ordered by `(distance, id)`; the last
/// element is the worst admitted candidate. `radius()` is `+inf` until
/// `k` candidates are admitted, then the worst admitted distance.
/// Admission is strict: equal-distance candidates neither evict nor are
/// admitted once the list is full.
pub struct KnnQuery<'a, D: DistanceValue> {
    query: &'a Object,
    k: usize,
    eps: f64,
    candidates: Candidates<D>,
    dist_comps: u64,
    deadline: Option<Instant>,
}

impl<'a, D: DistanceValue> KnnQuery<'a, D> {
    pub fn new(query: &'a Object, k: usize) -> Self {
        Self::with_eps(query, k, 0.0)
    }

    /// eps-approximate variant: the radius handed to the pruning oracle
    /// is shrunk by `1 + eps`, admission is unaffected.
    pub fn with_eps(query: &'a Object, k: usize, eps: f64) -> Self {
        Self {
            query,
            k,
            eps,
            candidates: Candidates::new(),
            dist_comps: 0,
            deadline: None,
        }
    }

    /// Optional wall-clock budget, checked between node visits.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn query_object(&self) -> &Object {
        self.query
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Counted distance from the query (left argument) to an object.
    #[inline]
    pub fn distance_to<S: Space<D>>(&mut self, space: &S, obj: &Object) -> D {
        self.dist_comps += 1;
        space.distance(self.query, obj)
    }

    pub fn dist_comps(&self) -> u64 {
        self.dist_comps
    }

    /// Current query radius: worst admitted distance once full, else +inf.
    pub fn radius(&self) -> D {
        if self.candidates.len() < self.k {
            D::INFINITY
        } else {
            self.candidates.last().map(|&(d, _)| d).unwrap_or(D::INFINITY)
        }
    }

    /// Radius used by the pruning oracle, with the eps relaxation
    /// applied. `+inf` while the candidate list is not yet full, for
    /// every scalar type.
    pub fn pruning_radius(&self) -> f64 {
        if self.candidates.len() < self.k {
            f64::INFINITY
        } else {
            self.radius().to_f64() / (1.0 + self.eps)
        }
    }

    /// Admit a candidate if it strictly improves on the current radius.
    pub fn check_and_add(&mut self, dist: D, id: u32) {
        if self.k == 0 {
            return;
        }
        if self.candidates.len() >= self.k {
            let worst = self.candidates.last().unwrap().0;
            if !(dist < worst) {
                return;
            }
            self.candidates.pop();
        }
        let pos = self
            .candidates
            .partition_point(|&(d, i)| d < dist || (d == dist && i < id));
        self.candidates.insert(pos, (dist, id));
    }

    /// Admitted results, ascending by distance with ties by id.
    pub fn results(&self) -> &[(D, u32)] {
        &self.candidates
    }

    /// Result ids in result order.
    pub fn result_ids(&self) -> Vec<u32> {
        self.candidates.iter().map(|&(_, id)| id).collect()
    }
}

/// A range query: every object within a fixed radius is admitted, in
/// encounter order.
pub struct RangeQuery<'a, D: DistanceValue> {
    query: &'a Object,
    radius: D,
    eps: f64,
    results: Vec<(D, u32)>,
    dist_comps: u64,
    deadline: Option<Instant>,
}

impl<'a, D: DistanceValue> RangeQuery<'a, D> {
    pub fn new(query: &'a Object, radius: D) -> Self {
        Self::with_eps(query, radius, 0.0)
    }

    pub fn with_eps(query: &'a Object, radius: D, eps: f64) -> Self {
        Self {
            query,
            radius,
            eps,
            results: Vec::new(),
            dist_comps: 0,
            deadline: None,
        }
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn query_object(&self) -> &Object {
        self.query
    }

    pub fn radius(&self) -> D {
        self.radius
    }

    pub fn pruning_radius(&self) -> f64 {
        self.radius.to_f64() / (1.0 + self.eps)
    }

    #[inline]
    pub fn distance_to<S: Space<D>>(&mut self, space: &S, obj: &Object) -> D {
        self.dist_comps += 1;
        space.distance(self.query, obj)
    }

    pub fn dist_comps(&self) -> u64 {
        self.dist_comps
    }

    pub fn check_and_add(&mut self, dist: D, id: u32) {
        if dist <= self.radius {
            self.results.push((dist, id));
        }
    }

    pub fn results(&self) -> &[(D, u32)] {
        &self.results
    }

    pub fn result_ids(&self) -> Vec<u32> {
        self.results.iter().map(|&(_, id)| id).collect()
    }
}
