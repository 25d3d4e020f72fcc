use std::io::{Read, Write};
use std::ops::{Add, Mul, Sub};

use rayon::prelude::*;

use crate::error::MlError;

/// Dense 2D matrix of f32 values in a flat row-major buffer.
///
/// Column vectors and row vectors are just matrices with one dimension equal
/// to 1. Element access in release builds is unchecked beyond the slice
/// itself; shape compatibility for arithmetic is enforced with
/// `debug_assert!` so debug/test builds fail fast while the hot loops stay
/// branch-free in release.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Creates a rows x cols matrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Builds a matrix from row slices. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, MlError> {
        let Some(first) = rows.first() else {
            return Err(MlError::EmptyInput { context: "Matrix::from_rows" });
        };
        let cols = first.len();
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(MlError::DimensionMismatch { context: "Matrix::from_rows" });
            }
            data.extend_from_slice(row);
        }
        Ok(Self { rows: rows.len(), cols, data })
    }

    /// Builds a matrix from row slices and transposes it in one pass, so each
    /// input row becomes a column of the result.
    pub fn from_rows_transposed(rows: &[Vec<f32>]) -> Result<Self, MlError> {
        Ok(Self::from_rows(rows)?.transpose())
    }

    /// Wraps an existing row-major buffer without copying.
    pub fn from_flat(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        debug_assert!(data.len() == rows * cols, "flat buffer length must equal rows*cols");
        Self { rows, cols, data }
    }

    /// 1 x n matrix from a slice.
    pub fn row_vector(values: &[f32]) -> Self {
        Self { rows: 1, cols: values.len(), data: values.to_vec() }
    }

    /// n x 1 matrix from a slice.
    pub fn column_vector(values: &[f32]) -> Self {
        Self { rows: values.len(), cols: 1, data: values.to_vec() }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f32 {
        debug_assert!(row < self.rows && col < self.cols, "Matrix index out of range");
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn at_mut(&mut self, row: usize, col: usize) -> &mut f32 {
        debug_assert!(row < self.rows && col < self.cols, "Matrix index out of range");
        &mut self.data[row * self.cols + col]
    }

    /// Flat row-major element access.
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        self.data[index]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Returns a new matrix with swapped dimensions.
    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        out
    }

    /// Adds a column vector to every column of the matrix in place.
    pub fn add_to_columns(&mut self, column_vec: &Matrix) -> &mut Self {
        debug_assert!(
            column_vec.cols == 1 && column_vec.rows == self.rows,
            "add_to_columns expects a column vector with matching row count"
        );
        for i in 0..self.rows {
            let bias = column_vec.data[i];
            for v in &mut self.data[i * self.cols..(i + 1) * self.cols] {
                *v += bias;
            }
        }
        self
    }

    /// Reduces each row to its sum, producing a rows x 1 column vector.
    /// Used to fold per-timestep bias gradients across a batch.
    pub fn sum_rows(&self) -> Matrix {
        let mut out = Matrix::zeros(self.rows, 1);
        for i in 0..self.rows {
            out.data[i] = self.data[i * self.cols..(i + 1) * self.cols].iter().sum();
        }
        out
    }

    /// Hadamard product with another matrix of the same shape.
    pub fn mult_elementwise(&self, other: &Matrix) -> Matrix {
        debug_assert!(
            self.rows == other.rows && self.cols == other.cols,
            "mult_elementwise expects identical shapes"
        );
        let data = self.data.iter().zip(&other.data).map(|(a, b)| a * b).collect();
        Matrix { rows: self.rows, cols: self.cols, data }
    }

    /// Maps a function over every element in place.
    pub fn apply_to_elements<F: Fn(f32) -> f32>(&mut self, f: F) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }

    /// Gathers the given columns into a new matrix, in the order provided.
    pub fn gather_columns(&self, indices: &[usize]) -> Matrix {
        let mut out = Matrix::zeros(self.rows, indices.len());
        for (new_col, &col) in indices.iter().enumerate() {
            debug_assert!(col < self.cols, "gather_columns index out of range");
            for row in 0..self.rows {
                out.data[row * indices.len() + new_col] = self.data[row * self.cols + col];
            }
        }
        out
    }

    /// Writes the matrix in its fixed binary layout:
    /// `[rows: u64][cols: u64][data: f32 x rows*cols]`, little-endian.
    /// No version or endianness marker; byte-for-byte round trip with `load`
    /// is the contract.
    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&(self.rows as u64).to_le_bytes())?;
        out.write_all(&(self.cols as u64).to_le_bytes())?;
        for v in &self.data {
            out.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads a matrix written by `save`.
    pub fn load<R: Read>(input: &mut R) -> std::io::Result<Matrix> {
        let mut word = [0u8; 8];
        input.read_exact(&mut word)?;
        let rows = u64::from_le_bytes(word) as usize;
        input.read_exact(&mut word)?;
        let cols = u64::from_le_bytes(word) as usize;

        let mut data = vec![0.0f32; rows * cols];
        let mut scalar = [0u8; 4];
        for v in &mut data {
            input.read_exact(&mut scalar)?;
            *v = f32::from_le_bytes(scalar);
        }

        Ok(Matrix { rows, cols, data })
    }
}

impl Add<&Matrix> for &Matrix {
    type Output = Matrix;

    fn add(self, other: &Matrix) -> Matrix {
        debug_assert!(
            self.rows == other.rows && self.cols == other.cols,
            "invalid sizes in Matrix addition"
        );
        let data = self.data.iter().zip(&other.data).map(|(a, b)| a + b).collect();
        Matrix { rows: self.rows, cols: self.cols, data }
    }
}

impl Sub<&Matrix> for &Matrix {
    type Output = Matrix;

    fn sub(self, other: &Matrix) -> Matrix {
        debug_assert!(
            self.rows == other.rows && self.cols == other.cols,
            "invalid sizes in Matrix subtraction"
        );
        let data = self.data.iter().zip(&other.data).map(|(a, b)| a - b).collect();
        Matrix { rows: self.rows, cols: self.cols, data }
    }
}

impl Mul<f32> for &Matrix {
    type Output = Matrix;

    fn mul(self, scalar: f32) -> Matrix {
        let data = self.data.iter().map(|v| v * scalar).collect();
        Matrix { rows: self.rows, cols: self.cols, data }
    }
}

impl Mul<&Matrix> for &Matrix {
    type Output = Matrix;

    /// Matrix product. Output rows are independent, so they are filled in
    /// parallel; each worker writes a disjoint row slice.
    fn mul(self, other: &Matrix) -> Matrix {
        debug_assert!(
            self.cols == other.rows,
            "invalid sizes in Matrix multiplication"
        );
        let mut out = Matrix::zeros(self.rows, other.cols);
        let n = other.cols;
        out.data
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(i, out_row)| {
                for k in 0..self.cols {
                    let a = self.data[i * self.cols + k];
                    let rhs_row = &other.data[k * n..(k + 1) * n];
                    for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                        *o += a * b;
                    }
                }
            });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Matrix {
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            *m.at_mut(i, i) = 1.0;
        }
        m
    }

    #[test]
    fn add_then_subtract_restores_original() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![0.5, -1.5, 2.0], vec![3.0, 0.0, -6.0]]).unwrap();
        let restored = &(&a + &b) - &b;
        for i in 0..a.size() {
            assert!((restored.get(i) - a.get(i)).abs() < 1e-6);
        }
    }

    #[test]
    fn multiplying_by_identity_is_a_noop() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![7.0, 8.0, 9.0], vec![10.0, 11.0, 12.0]]).unwrap();
        let ab = &a * &b;
        let ab_i = &ab * &identity(3);
        for i in 0..ab.size() {
            assert!((ab.get(i) - ab_i.get(i)).abs() < 1e-5);
        }
    }

    #[test]
    fn product_matches_hand_computed_values() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![5.0, 6.0], vec![7.0, 8.0]]).unwrap();
        let c = &a * &b;
        assert_eq!(c.at(0, 0), 19.0);
        assert_eq!(c.at(0, 1), 22.0);
        assert_eq!(c.at(1, 0), 43.0);
        assert_eq!(c.at(1, 1), 50.0);
    }

    #[test]
    fn transpose_swaps_dimensions_and_elements() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let t = a.transpose();
        assert_eq!(t.rows(), 3);
        assert_eq!(t.cols(), 2);
        assert_eq!(t.at(2, 0), 3.0);
        assert_eq!(t.at(0, 1), 4.0);
    }

    #[test]
    fn add_to_columns_broadcasts_the_bias() {
        let mut a = Matrix::zeros(2, 3);
        let bias = Matrix::column_vector(&[1.0, -2.0]);
        a.add_to_columns(&bias);
        for j in 0..3 {
            assert_eq!(a.at(0, j), 1.0);
            assert_eq!(a.at(1, j), -2.0);
        }
    }

    #[test]
    fn sum_rows_folds_each_row_to_a_scalar() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![-1.0, -1.0, 2.0]]).unwrap();
        let s = a.sum_rows();
        assert_eq!(s.rows(), 2);
        assert_eq!(s.cols(), 1);
        assert_eq!(s.at(0, 0), 6.0);
        assert_eq!(s.at(1, 0), 0.0);
    }

    #[test]
    fn gather_columns_clamps_nothing_and_preserves_order() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let g = a.gather_columns(&[2, 0]);
        assert_eq!(g.cols(), 2);
        assert_eq!(g.at(0, 0), 3.0);
        assert_eq!(g.at(1, 0), 6.0);
        assert_eq!(g.at(0, 1), 1.0);
        assert_eq!(g.at(1, 1), 4.0);
    }

    #[test]
    fn from_rows_rejects_ragged_and_empty_input() {
        assert!(matches!(
            Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]),
            Err(MlError::DimensionMismatch { .. })
        ));
        assert!(matches!(Matrix::from_rows(&[]), Err(MlError::EmptyInput { .. })));
    }

    #[test]
    fn save_load_round_trips_bit_for_bit() {
        let a = Matrix::from_rows(&[
            vec![1.25, -0.5, 3.1415927],
            vec![f32::MIN_POSITIVE, 1.0e20, -7.0],
        ])
        .unwrap();

        let mut buf: Vec<u8> = Vec::new();
        a.save(&mut buf).unwrap();
        let b = Matrix::load(&mut buf.as_slice()).unwrap();

        assert_eq!(a.rows(), b.rows());
        assert_eq!(a.cols(), b.cols());
        for i in 0..a.size() {
            assert_eq!(a.get(i).to_bits(), b.get(i).to_bits());
        }
    }

    #[test]
    fn load_fails_on_truncated_stream() {
        let a = Matrix::zeros(4, 4);
        let mut buf: Vec<u8> = Vec::new();
        a.save(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(Matrix::load(&mut buf.as_slice()).is_err());
    }
}
