//! Materialized N-dimensional datasets.
//!
//! A [`Dataset`] is a named, owned `ndarray` buffer of one of the supported
//! element types. Lazy views produce these when a region is loaded.

use crate::slice::SliceSpec;
use crate::{Error, Result};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    Int8,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
}

impl ElementType {
    /// Short lowercase name used in messages and CLI output.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Bool => "bool",
            ElementType::Int8 => "int8",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::String => "string",
        }
    }

    /// Returns true for floating point types.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, ElementType::Float32 | ElementType::Float64)
    }

    /// Size in bytes of one element, or `None` for variable-length strings.
    #[must_use]
    pub fn size_of(self) -> Option<usize> {
        match self {
            ElementType::Bool | ElementType::Int8 => Some(1),
            ElementType::Int32 | ElementType::Float32 => Some(4),
            ElementType::Int64 | ElementType::Float64 => Some(8),
            ElementType::String => None,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed array storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Bool(ArrayD<bool>),
    Int8(ArrayD<i8>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    String(ArrayD<String>),
}

/// Applies an array-to-array expression to whichever variant is present,
/// keeping the variant.
macro_rules! map_array {
    ($data:expr, |$arr:ident| $body:expr) => {
        match $data {
            Data::Bool($arr) => Data::Bool($body),
            Data::Int8($arr) => Data::Int8($body),
            Data::Int32($arr) => Data::Int32($body),
            Data::Int64($arr) => Data::Int64($body),
            Data::Float32($arr) => Data::Float32($body),
            Data::Float64($arr) => Data::Float64($body),
            Data::String($arr) => Data::String($body),
        }
    };
}

macro_rules! impl_from_array {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<ArrayD<$ty>> for Data {
                fn from(array: ArrayD<$ty>) -> Self {
                    Data::$variant(array)
                }
            }
        )*
    };
}

impl_from_array!(
    bool => Bool,
    i8 => Int8,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
);

impl Data {
    /// Element type of the stored array.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Data::Bool(_) => ElementType::Bool,
            Data::Int8(_) => ElementType::Int8,
            Data::Int32(_) => ElementType::Int32,
            Data::Int64(_) => ElementType::Int64,
            Data::Float32(_) => ElementType::Float32,
            Data::Float64(_) => ElementType::Float64,
            Data::String(_) => ElementType::String,
        }
    }

    /// Shape of the stored array.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Data::Bool(a) => a.shape(),
            Data::Int8(a) => a.shape(),
            Data::Int32(a) => a.shape(),
            Data::Int64(a) => a.shape(),
            Data::Float32(a) => a.shape(),
            Data::Float64(a) => a.shape(),
            Data::String(a) => a.shape(),
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns true if the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out the hyper-rectangle described by `spec`.
    ///
    /// Bounds are not checked here; callers validate with
    /// [`SliceSpec::validate`] first.
    #[must_use]
    pub fn slice(&self, spec: &SliceSpec) -> Data {
        let ranges = spec.ranges();
        let pick = |ax: ndarray::AxisDescription| {
            let r = &ranges[ax.axis.index()];
            Slice::new(to_isize(r.start), Some(to_isize(r.stop)), to_isize(r.step))
        };
        map_array!(self, |a| a.slice_each_axis(pick).to_owned())
    }

    /// Reinterprets the buffer with a new shape of equal element count.
    ///
    /// # Errors
    /// Returns an error if the element counts differ.
    pub fn into_shape(self, shape: &[usize]) -> Result<Data> {
        Ok(map_array!(self, |a| a
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(shape))?))
    }

    /// Reorders axes; `axes[i]` names the source axis placed at position `i`.
    #[must_use]
    pub fn permuted(self, axes: &[usize]) -> Data {
        map_array!(self, |a| a
            .permuted_axes(IxDyn(axes))
            .as_standard_layout()
            .into_owned())
    }

    /// Stacks equal-shape arrays along a new leading axis.
    ///
    /// # Errors
    /// Returns an error if the list is empty, element types differ or shapes differ.
    pub fn stack(items: &[Data]) -> Result<Data> {
        let first = items
            .first()
            .ok_or_else(|| Error::Shape("cannot stack an empty list".to_string()))?;

        macro_rules! stack_variant {
            ($variant:ident) => {{
                let mut views: Vec<ArrayViewD<'_, _>> = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Data::$variant(a) => views.push(a.view()),
                        other => {
                            return Err(Error::TypeMismatch {
                                expected: first.element_type().name(),
                                actual: other.element_type().name(),
                            })
                        }
                    }
                }
                Data::$variant(ndarray::stack(Axis(0), &views)?)
            }};
        }

        Ok(match first {
            Data::Bool(_) => stack_variant!(Bool),
            Data::Int8(_) => stack_variant!(Int8),
            Data::Int32(_) => stack_variant!(Int32),
            Data::Int64(_) => stack_variant!(Int64),
            Data::Float32(_) => stack_variant!(Float32),
            Data::Float64(_) => stack_variant!(Float64),
            Data::String(_) => stack_variant!(String),
        })
    }
}

fn squeeze_array<T>(mut array: ArrayD<T>) -> ArrayD<T> {
    for axis in (0..array.ndim()).rev() {
        if array.shape()[axis] == 1 {
            array = array.remove_axis(Axis(axis));
        }
    }
    array
}

fn to_isize(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

/// A named, materialized array.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    data: Data,
}

impl Dataset {
    /// Creates a dataset from typed storage.
    pub fn new(name: impl Into<String>, data: impl Into<Data>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Creates a 1-D dataset from a vector.
    pub fn from_vec<T>(name: impl Into<String>, values: Vec<T>) -> Self
    where
        ArrayD<T>: Into<Data>,
    {
        Self::new(name, ndarray::Array1::from_vec(values).into_dyn())
    }

    /// Creates a dataset of the given shape from row-major values.
    ///
    /// # Errors
    /// Returns an error if `values.len()` does not match the shape.
    pub fn from_shape_vec<T>(name: impl Into<String>, shape: &[usize], values: Vec<T>) -> Result<Self>
    where
        ArrayD<T>: Into<Data>,
    {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::new(name, array))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns the dataset renamed.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn data(&self) -> &Data {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Data {
        self.data
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// Removes unit-length dimensions.
    #[must_use]
    pub fn squeeze(self) -> Self {
        if !self.shape().contains(&1) {
            return self;
        }
        Self {
            name: self.name,
            data: map_array!(self.data, |a| squeeze_array(a)),
        }
    }

    /// Element-wise logical NOT of a boolean dataset.
    ///
    /// # Errors
    /// Returns an error if the dataset is not boolean.
    pub fn logical_not(&self) -> Result<Self> {
        match &self.data {
            Data::Bool(a) => Ok(Self::new(self.name.clone(), a.mapv(|v| !v))),
            other => Err(Error::TypeMismatch {
                expected: "bool",
                actual: other.element_type().name(),
            }),
        }
    }

    /// Casts to boolean; numeric values are true when non-zero.
    ///
    /// # Errors
    /// Returns an error for string datasets.
    pub fn to_bool(&self) -> Result<Self> {
        let array = match &self.data {
            Data::Bool(a) => a.clone(),
            Data::Int8(a) => a.mapv(|v| v != 0),
            Data::Int32(a) => a.mapv(|v| v != 0),
            Data::Int64(a) => a.mapv(|v| v != 0),
            Data::Float32(a) => a.mapv(|v| v != 0.0),
            Data::Float64(a) => a.mapv(|v| v != 0.0),
            Data::String(_) => {
                return Err(Error::TypeMismatch {
                    expected: "numeric",
                    actual: "string",
                })
            }
        };
        Ok(Self::new(self.name.clone(), array))
    }

    /// Casts a boolean dataset to int8 (0/1).
    ///
    /// # Errors
    /// Returns an error if the dataset is not boolean.
    pub fn bool_to_int8(&self) -> Result<Self> {
        match &self.data {
            Data::Bool(a) => Ok(Self::new(self.name.clone(), a.mapv(i8::from))),
            other => Err(Error::TypeMismatch {
                expected: "bool",
                actual: other.element_type().name(),
            }),
        }
    }

    /// Row-major values widened to `f64`; `None` for bool and string data.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match &self.data {
            Data::Int8(a) => Some(a.iter().map(|&v| f64::from(v)).collect()),
            Data::Int32(a) => Some(a.iter().map(|&v| f64::from(v)).collect()),
            Data::Int64(a) => Some(a.iter().map(|&v| v as f64).collect()),
            Data::Float32(a) => Some(a.iter().map(|&v| f64::from(v)).collect()),
            Data::Float64(a) => Some(a.iter().copied().collect()),
            Data::Bool(_) | Data::String(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::SliceRange;

    #[test]
    fn test_slice_and_shape() {
        let ds = Dataset::from_shape_vec("d", &[2, 3], (0..6).collect::<Vec<i32>>()).unwrap();
        let spec = SliceSpec::new(vec![SliceRange::new(1, 2, 1), SliceRange::new(0, 3, 2)]);
        let sliced = ds.data().slice(&spec);
        assert_eq!(sliced.shape(), &[1, 2]);
        assert_eq!(sliced, Data::Int32(ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![3, 5]).unwrap()));
    }

    #[test]
    fn test_squeeze_drops_unit_dims() {
        let ds = Dataset::from_shape_vec("d", &[1, 4, 1], vec![1.0f64, 2.0, 3.0, 4.0]).unwrap();
        let squeezed = ds.squeeze();
        assert_eq!(squeezed.shape(), &[4]);
        assert_eq!(squeezed.name(), "d");
    }

    #[test]
    fn test_logical_not_requires_bool() {
        let mask = Dataset::from_vec("m", vec![true, false, true]);
        let inverted = mask.logical_not().unwrap();
        assert_eq!(inverted, Dataset::from_vec("m", vec![false, true, false]));

        let numbers = Dataset::from_vec("n", vec![1i32, 2]);
        assert!(matches!(numbers.logical_not(), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_stack_rejects_mixed_types() {
        let a = Dataset::from_vec("a", vec![1.0f64, 2.0]).into_data();
        let b = Dataset::from_vec("b", vec![1i32, 2]).into_data();
        assert!(Data::stack(&[a.clone(), a.clone()]).is_ok());
        assert!(matches!(Data::stack(&[a, b]), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_permuted_transposes() {
        let ds = Dataset::from_shape_vec("d", &[2, 3], (0..6).collect::<Vec<i64>>()).unwrap();
        let t = ds.into_data().permuted(&[1, 0]);
        assert_eq!(t.shape(), &[3, 2]);
        let Data::Int64(a) = t else { panic!("type changed") };
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![0, 3, 1, 4, 2, 5]);
    }
}
