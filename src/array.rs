//! Shape-described numeric arrays for typed-buffer collectives.
//!
//! [`NdArray`] wraps an [`ndarray::ArrayD`] kept in standard (row-major,
//! contiguous) layout, so its elements can go on the wire as one slice.
//! [`ArrayView`] is ndarray's dynamic-dimension view and may carry any
//! strides. Shape-aware collectives treat the sub-array along axis 0 as their
//! unit of transfer (one row of a matrix, one slice of a 3-D tensor) and
//! never transpose it.

use crate::datatype::Datatype;
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// A dynamic-dimension view over borrowed memory.
pub type ArrayView<'a, T> = ndarray::ArrayViewD<'a, T>;

/// An owned, row-major, contiguous n-dimensional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NdArray<T>(ArrayD<T>);

impl<T> NdArray<T> {
    /// Wrap `data` with `shape`; the element counts must agree.
    pub fn from_shape_vec(shape: &[usize], data: Vec<T>) -> Result<Self> {
        let actual = data.len();
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(NdArray)
            .map_err(|_| Error::BufferSizeMismatch {
                op: "from_shape_vec",
                expected: shape.iter().product(),
                actual,
            })
    }

    /// One-dimensional array over `data`.
    pub fn from_vec(data: Vec<T>) -> Self {
        NdArray(Array1::from(data).into_dyn())
    }

    /// Dimension sizes, outermost first.
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.0.ndim()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        self.0.strides().iter().map(|&s| s as usize).collect()
    }

    /// Shape of one unit along axis 0.
    pub fn unit_shape(&self) -> &[usize] {
        self.shape().get(1..).unwrap_or(&[])
    }

    /// Number of elements in one unit along axis 0.
    pub fn unit_len(&self) -> usize {
        self.unit_shape().iter().product()
    }

    /// Elements of the `index`-th unit along axis 0.
    pub fn unit(&self, index: usize) -> Option<&[T]> {
        if self.ndim() == 0 || index >= self.shape()[0] {
            return None;
        }
        self.0.index_axis(Axis(0), index).to_slice()
    }

    /// Element at a full multi-index.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.ndim() {
            return None;
        }
        self.0.get(IxDyn(index))
    }

    // Every constructor yields standard layout, so the slices always exist.

    /// Elements in row-major order.
    pub fn as_slice(&self) -> &[T] {
        self.0.as_slice().unwrap_or(&[])
    }

    /// Mutable elements in row-major order.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.0.as_slice_mut().unwrap_or(&mut [])
    }

    /// Consume the array, returning its elements.
    pub fn into_vec(self) -> Vec<T> {
        self.0.into_raw_vec_and_offset().0
    }

    /// Regroup the same elements under a new shape.
    pub fn reshape(self, shape: &[usize]) -> Result<Self> {
        NdArray::from_shape_vec(shape, self.into_vec())
    }

    /// Borrowed view of the whole array.
    pub fn view(&self) -> ArrayView<'_, T> {
        self.0.view()
    }

    /// The underlying ndarray.
    pub fn as_array(&self) -> &ArrayD<T> {
        &self.0
    }

    /// Consume the wrapper, returning the ndarray.
    pub fn into_inner(self) -> ArrayD<T> {
        self.0
    }
}

impl<T: Clone> NdArray<T> {
    /// Array of `shape` with every element set to `value`.
    pub fn filled(shape: &[usize], value: T) -> Self {
        NdArray(ArrayD::from_elem(IxDyn(shape), value))
    }
}

impl<T: Datatype> NdArray<T> {
    /// Zero-initialized receive buffer of `shape`.
    pub fn zeros(shape: &[usize]) -> Self {
        NdArray::filled(shape, T::default())
    }
}

impl<T: Clone> From<ArrayD<T>> for NdArray<T> {
    /// Copies into standard layout when `array` is strided or transposed.
    fn from(array: ArrayD<T>) -> Self {
        NdArray(array.as_standard_layout().to_owned())
    }
}

/// Split `total` items into `parts` contiguous shares.
///
/// The first `total % parts` shares get one extra item, so share sizes differ
/// by at most one. The result is directly usable as ScatterV counts.
///
/// ```
/// assert_eq!(ferrogroup::partition_counts(10, 4), vec![3, 3, 2, 2]);
/// ```
pub fn partition_counts(total: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    let base = total / parts;
    let extra = total % parts;
    (0..parts)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Exclusive prefix sums of `counts`.
pub(crate) fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_shape_vec_checks_count() {
        assert!(NdArray::from_shape_vec(&[2, 3], vec![0i32; 6]).is_ok());
        let err = NdArray::from_shape_vec(&[2, 3], vec![0i32; 5]).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferSizeMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn strides_are_row_major() {
        let a = NdArray::<f32>::zeros(&[4, 2, 3]);
        assert_eq!(a.strides(), vec![6, 3, 1]);
        assert_eq!(NdArray::from_vec(vec![1u8, 2]).strides(), vec![1]);
    }

    #[test]
    fn units_follow_axis_zero() {
        let a = NdArray::from_shape_vec(&[3, 2], (0..6).collect::<Vec<i64>>()).unwrap();
        assert_eq!(a.unit_shape(), &[2]);
        assert_eq!(a.unit(0), Some(&[0, 1][..]));
        assert_eq!(a.unit(2), Some(&[4, 5][..]));
        assert_eq!(a.unit(3), None);
    }

    #[test]
    fn get_uses_full_index() {
        let a = NdArray::from_shape_vec(&[2, 3], (0..6).collect::<Vec<u32>>()).unwrap();
        assert_eq!(a.get(&[1, 2]), Some(&5));
        assert_eq!(a.get(&[0, 1]), Some(&1));
        assert_eq!(a.get(&[2, 0]), None);
        assert_eq!(a.get(&[1]), None);
    }

    #[test]
    fn reshape_keeps_order() {
        let a = NdArray::from_vec((0..6).collect::<Vec<i32>>());
        let b = a.clone().reshape(&[2, 3]).unwrap();
        assert_eq!(b.as_slice(), a.as_slice());
        assert!(a.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn transposed_input_is_copied_to_row_major() {
        let a = NdArray::from_shape_vec(&[2, 3], (0..6).collect::<Vec<i32>>()).unwrap();
        let t = NdArray::from(a.into_inner().reversed_axes());
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.strides(), vec![2, 1]);
        assert_eq!(t.as_slice(), &[0, 3, 1, 4, 2, 5]);
        assert_eq!(t.into_vec(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn partition_counts_spread_remainder_first() {
        assert_eq!(partition_counts(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(partition_counts(8, 4), vec![2, 2, 2, 2]);
        assert_eq!(partition_counts(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(partition_counts(5, 0), Vec::<usize>::new());
        assert_eq!(partition_counts(10, 3).iter().sum::<usize>(), 10);
    }

    #[test]
    fn displacements_are_prefix_sums() {
        assert_eq!(displacements(&[3, 1, 0, 2]), vec![0, 3, 4, 4]);
        assert!(displacements(&[]).is_empty());
    }
}
