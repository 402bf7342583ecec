//! Slicing: hyper-rectangle specs and per-dimension axis roles.

use crate::dataset::Dataset;
use crate::lazy::LazyDataset;
use crate::{Error, Result};

/// Half-open strided range `start..stop` over one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceRange {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
}

impl SliceRange {
    #[must_use]
    pub fn new(start: usize, stop: usize, step: usize) -> Self {
        Self { start, stop, step }
    }

    /// Range covering a whole dimension.
    #[must_use]
    pub fn full(extent: usize) -> Self {
        Self::new(0, extent, 1)
    }

    /// Single index `i..i+1`. `usize::MAX` saturates and fails validation.
    #[must_use]
    pub fn index(i: usize) -> Self {
        Self::new(i, i.saturating_add(1), 1)
    }

    /// Number of selected elements.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.stop <= self.start || self.step == 0 {
            0
        } else {
            (self.stop - self.start).div_ceil(self.step)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, dimension: usize, extent: usize) -> Result<()> {
        if self.step == 0 {
            return Err(Error::Shape(format!("zero step in dimension {dimension}")));
        }
        if self.stop > extent {
            return Err(Error::OutOfRange {
                dimension,
                requested: self.stop,
                extent,
            });
        }
        if self.start > self.stop {
            return Err(Error::OutOfRange {
                dimension,
                requested: self.start,
                extent: self.stop,
            });
        }
        Ok(())
    }
}

/// One range per dimension of the sliced dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceSpec {
    ranges: Vec<SliceRange>,
}

impl SliceSpec {
    #[must_use]
    pub fn new(ranges: Vec<SliceRange>) -> Self {
        Self { ranges }
    }

    /// Spec selecting every element of `shape`.
    #[must_use]
    pub fn full(shape: &[usize]) -> Self {
        Self::new(shape.iter().map(|&e| SliceRange::full(e)).collect())
    }

    #[must_use]
    pub fn ranges(&self) -> &[SliceRange] {
        &self.ranges
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.ranges.len()
    }

    /// Shape of the materialized result.
    #[must_use]
    pub fn output_shape(&self) -> Vec<usize> {
        self.ranges.iter().map(SliceRange::len).collect()
    }

    /// Checks rank and bounds against a dataset shape.
    ///
    /// # Errors
    /// Returns `RankMismatch` or `OutOfRange` if `spec` does not fit `shape`.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        if self.ranges.len() != shape.len() {
            return Err(Error::RankMismatch {
                expected: shape.len(),
                actual: self.ranges.len(),
            });
        }
        for (dimension, (range, &extent)) in self.ranges.iter().zip(shape).enumerate() {
            range.check(dimension, extent)?;
        }
        Ok(())
    }
}

/// Role of one source dimension in a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    /// Fast output axis, taken whole.
    X,
    /// Slow output axis, taken whole.
    Y,
    /// Pinned to a single index and dropped from the output.
    Fixed(usize),
    /// Kept as a leading output axis over the given range.
    Range(SliceRange),
}

/// Per-dimension slicing instructions for an N-D source.
///
/// Exactly one dimension must be X and at most one may be Y.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDescriptor {
    roles: Vec<AxisRole>,
}

impl SliceDescriptor {
    #[must_use]
    pub fn new(roles: Vec<AxisRole>) -> Self {
        Self { roles }
    }

    /// Last dimension X, second-to-last Y, everything else `Fixed(0)`.
    #[must_use]
    pub fn default_for(shape: &[usize]) -> Self {
        let rank = shape.len();
        let roles = (0..rank)
            .map(|d| {
                if d + 1 == rank {
                    AxisRole::X
                } else if d + 2 == rank {
                    AxisRole::Y
                } else {
                    AxisRole::Fixed(0)
                }
            })
            .collect();
        Self { roles }
    }

    #[must_use]
    pub fn roles(&self) -> &[AxisRole] {
        &self.roles
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.roles.len()
    }

    /// Sets the role of `dim`. Assigning X or Y demotes any other dimension
    /// holding that role to `Fixed(0)`.
    ///
    /// # Errors
    /// Returns `RankMismatch` if `dim` is not a dimension of the descriptor.
    pub fn assign(&mut self, dim: usize, role: AxisRole) -> Result<()> {
        if dim >= self.roles.len() {
            return Err(Error::RankMismatch {
                expected: self.roles.len(),
                actual: dim + 1,
            });
        }
        if matches!(role, AxisRole::X | AxisRole::Y) {
            for (d, existing) in self.roles.iter_mut().enumerate() {
                if d != dim && *existing == role {
                    *existing = AxisRole::Fixed(0);
                }
            }
        }
        self.roles[dim] = role;
        Ok(())
    }

    /// Dimension assigned X, if any.
    #[must_use]
    pub fn x_dim(&self) -> Option<usize> {
        self.roles.iter().position(|r| *r == AxisRole::X)
    }

    /// Dimension assigned Y, if any.
    #[must_use]
    pub fn y_dim(&self) -> Option<usize> {
        self.roles.iter().position(|r| *r == AxisRole::Y)
    }

    /// Checks the descriptor against a source shape without any I/O.
    ///
    /// # Errors
    /// Returns `Shape` if no X axis is set or roles conflict, `RankMismatch`
    /// if the rank differs, `OutOfRange` for bad indices or ranges.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        let xs = self.roles.iter().filter(|r| **r == AxisRole::X).count();
        let ys = self.roles.iter().filter(|r| **r == AxisRole::Y).count();
        if xs == 0 {
            return Err(Error::Shape("no X axis assigned".to_string()));
        }
        if xs > 1 || ys > 1 {
            return Err(Error::Shape(format!(
                "conflicting axis roles: {xs} X and {ys} Y dimensions"
            )));
        }
        if self.roles.len() != shape.len() {
            return Err(Error::RankMismatch {
                expected: shape.len(),
                actual: self.roles.len(),
            });
        }
        self.to_ranges(shape)
            .iter()
            .zip(shape)
            .enumerate()
            .try_for_each(|(d, (r, &extent))| r.check(d, extent))
    }

    /// Builds the equal-rank hyper-rectangle this descriptor reads.
    ///
    /// # Errors
    /// Returns the same errors as [`SliceDescriptor::validate`].
    pub fn to_slice_spec(&self, shape: &[usize]) -> Result<SliceSpec> {
        self.validate(shape)?;
        Ok(SliceSpec::new(self.to_ranges(shape)))
    }

    /// Shape after fixed dimensions are dropped, ordered (ranges..., Y, X).
    ///
    /// # Errors
    /// Returns the same errors as [`SliceDescriptor::validate`].
    pub fn output_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let spec = self.to_slice_spec(shape)?;
        let lens = spec.output_shape();
        Ok(self.output_order().into_iter().map(|d| lens[d]).collect())
    }

    fn to_ranges(&self, shape: &[usize]) -> Vec<SliceRange> {
        self.roles
            .iter()
            .zip(shape)
            .map(|(role, &extent)| match *role {
                AxisRole::X | AxisRole::Y => SliceRange::full(extent),
                AxisRole::Fixed(i) => SliceRange::index(i),
                AxisRole::Range(r) => r,
            })
            .collect()
    }

    /// Source dimensions kept in the output, in output order.
    fn output_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .roles
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r, AxisRole::Range(_)))
            .map(|(d, _)| d)
            .collect();
        order.extend(self.y_dim());
        order.extend(self.x_dim());
        order
    }
}

/// Validates `descriptor`, loads the selected region of `lazy` and returns
/// it with fixed dimensions dropped and axes ordered (ranges..., Y, X).
///
/// # Errors
/// Returns a shape error before any load if the descriptor is invalid, or
/// the loader's error if the read fails.
pub fn slice_with(lazy: &LazyDataset, descriptor: &SliceDescriptor) -> Result<Dataset> {
    let shape = lazy.shape();
    let spec = descriptor.to_slice_spec(&shape)?;
    let sliced = lazy.get_slice(&spec)?;
    let name = sliced.name().to_string();

    let mut order = descriptor.output_order();
    let kept = order.len();
    order.extend(
        descriptor
            .roles()
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r, AxisRole::Fixed(_)))
            .map(|(d, _)| d),
    );
    let permuted = sliced.into_data().permuted(&order);
    let out_shape: Vec<usize> = permuted.shape()[..kept].to_vec();
    Ok(Dataset::new(name, permuted.into_shape(&out_shape)?))
}
