//! The space abstraction: an opaque, possibly non-metric distance oracle.
//!
//! A [`Space`] knows how to measure the distance between two
//! [`Object`]s and how to create objects from typed component vectors.
//! Symmetry and the triangle inequality are *not* assumed anywhere in
//! the crate; in asymmetric spaces the query is always the left
//! argument of `distance`.
//!
//! Distances are generic over a scalar type (`i32`, `f32`, `f64`); the
//! pruning oracle promotes every scalar to `f64`, so integer distances
//! never overflow inside pruning math.

pub mod bit_hamming;
pub mod vector;

pub use bit_hamming::BitHammingSpace;
pub use vector::{Kernel, VectorSpace};

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, VantageError};
use crate::object::{DataSet, Object};

/// Line prefix that introduces an integer label in dataset text files.
pub const LABEL_PREFIX: &str = "label:";

/// A totally ordered numeric distance scalar.
pub trait DistanceValue:
    Copy + PartialOrd + Send + Sync + std::fmt::Debug + std::fmt::Display + FromStr + 'static
{
    const ZERO: Self;
    /// The "no bound yet" value: `+inf` for floats, `MAX` for integers.
    const INFINITY: Self;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

impl DistanceValue for f32 {
    const ZERO: Self = 0.0;
    const INFINITY: Self = f32::INFINITY;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl DistanceValue for f64 {
    const ZERO: Self = 0.0;
    const INFINITY: Self = f64::INFINITY;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }
}

impl DistanceValue for i32 {
    const ZERO: Self = 0;
    const INFINITY: Self = i32::MAX;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v.round() as i32
    }
}

/// Marker for types that may live inside an [`Object`] payload.
///
/// # Safety
///
/// Implementors must admit arbitrary bit patterns, contain no padding,
/// and have alignment of at most 8 bytes (the payload backing store is
/// `u64`-aligned).
pub unsafe trait Component:
    Copy + Send + Sync + FromStr + std::fmt::Display + 'static
{
}

unsafe impl Component for f32 {}
unsafe impl Component for f64 {}
unsafe impl Component for u32 {}
unsafe impl Component for i32 {}

/// An opaque distance oracle plus object construction and dataset IO.
///
/// `distance` is a pure function and may be expensive; callers count
/// invocations per query. A space never caches distances and never owns
/// objects.
pub trait Space<D: DistanceValue>: Send + Sync {
    type Component: Component;

    /// Human-readable space name (e.g. `l2`, `lp:p=0.5`).
    fn name(&self) -> String;

    /// Distance from `left` to `right`. Need not be symmetric.
    fn distance(&self, left: &Object, right: &Object) -> D;

    /// Allocate an object by copying a component vector.
    fn create_from_vec(&self, id: u32, label: i32, components: &[Self::Component]) -> Object {
        Object::from_components(id, label, components)
    }

    /// Parse the component part of a dataset line (label already
    /// stripped). Errors are plain messages; the caller attaches file
    /// and line context.
    fn parse_components(&self, text: &str) -> std::result::Result<Vec<Self::Component>, String>;

    /// Render an object's components as dataset text (no label).
    fn unparse(&self, obj: &Object) -> String;

    /// Read a whitespace-separated text dataset.
    ///
    /// One object per line; an optional `label:<int>` prefix sets the
    /// label (absent means `-1`); ids are line ordinals. All rows must
    /// have the same number of components. `max_objects == 0` means
    /// unlimited.
    fn read_dataset(&self, path: &Path, max_objects: usize) -> Result<DataSet> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| VantageError::io(display.clone(), e))?;
        let reader = BufReader::new(file);

        let mut dataset = DataSet::new();
        let mut expected = 0usize;

        for (lineno, line) in reader.lines().enumerate() {
            if max_objects != 0 && dataset.len() >= max_objects {
                break;
            }
            let line = line.map_err(|e| VantageError::io(display.clone(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            let (label, rest) = extract_label(&line).map_err(|msg| VantageError::Parse {
                file: display.clone(),
                line: lineno + 1,
                msg,
            })?;
            let components =
                self.parse_components(rest)
                    .map_err(|msg| VantageError::Parse {
                        file: display.clone(),
                        line: lineno + 1,
                        msg,
                    })?;
            if dataset.is_empty() {
                expected = components.len();
            } else if components.len() != expected {
                return Err(VantageError::DimensionMismatch {
                    file: display,
                    line: lineno + 1,
                    got: components.len(),
                    expected,
                });
            }
            dataset.push(self.create_from_vec(dataset.len() as u32, label, &components));
        }
        Ok(dataset)
    }

    /// Write a dataset in the text format accepted by `read_dataset`.
    fn write_dataset(&self, data: &DataSet, path: &Path) -> Result<()> {
        let display = path.display().to_string();
        let file = File::create(path).map_err(|e| VantageError::io(display.clone(), e))?;
        let mut out = BufWriter::new(file);

        for obj in data.iter() {
            if obj.label() >= 0 {
                write!(out, "{}{} ", LABEL_PREFIX, obj.label())
                    .map_err(|e| VantageError::io(display.clone(), e))?;
            }
            writeln!(out, "{}", self.unparse(obj))
                .map_err(|e| VantageError::io(display.clone(), e))?;
        }
        Ok(())
    }
}

/// Split an optional `label:<int>` prefix off a dataset line.
fn extract_label(line: &str) -> std::result::Result<(i32, &str), String> {
    if let Some(rest) = line.strip_prefix(LABEL_PREFIX) {
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        let label = rest[..end]
            .parse::<i32>()
            .map_err(|_| format!("cannot parse label '{}'", &rest[..end]))?;
        Ok((label, &rest[end..]))
    } else {
        Ok((Object::NO_LABEL, line))
    }
}

/// A space spec is `NAME` or `NAME:k=v,k=v,...`.
///
/// Returns the base name and the raw parameter pairs.
pub fn parse_space_spec(spec: &str) -> Result<(String, Vec<(String, String)>)> {
    let (name, params) = match spec.split_once(':') {
        Some((n, p)) => (n, p),
        None => (spec, ""),
    };
    let mut pairs = Vec::new();
    for part in params.split(',').filter(|s| !s.is_empty()) {
        let (k, v) = part.split_once('=').ok_or_else(|| {
            VantageError::InvalidParameter(format!(
                "space parameter '{part}' is not of the form key=value"
            ))
        })?;
        pairs.push((k.trim().to_string(), v.trim().to_string()));
    }
    Ok((name.trim().to_ascii_lowercase(), pairs))
}
