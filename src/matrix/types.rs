//! Типы матриц и связанные структуры

use crate::error::{ClError, Result};
use std::fmt;
use std::path::PathBuf;

/// Размеры матрицы (строки, столбцы)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub rows: u32,
    pub cols: u32,
}

impl Shape {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Число элементов; u64, чтобы произведение двух u32 не переполнялось
    pub fn elements(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.rows, self.cols)
    }
}

/// Плотная матрица f32 в построчном порядке.
///
/// Длина данных всегда равна `rows * cols`; после создания изменяются только
/// значения, но не размер.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    shape: Shape,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self> {
        if data.len() as u64 != shape.elements() {
            return Err(ClError::Format {
                path: PathBuf::new(),
                reason: format!(
                    "shape {} needs {} values, got {}",
                    shape,
                    shape.elements(),
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.elements() as usize],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Изменяемый доступ к значениям (для чтения результата с устройства)
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Размер данных в байтах
    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn rejects_data_that_does_not_fill_shape() {
        let err = Matrix::new(Shape::new(2, 3), vec![0.0; 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn byte_len_counts_four_bytes_per_value() {
        let m = Matrix::new(Shape::new(2, 3), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(m.len(), 6);
        assert_eq!(m.byte_len(), 24);
    }

    #[test]
    fn shape_displays_like_diagnostics() {
        assert_eq!(Shape::new(1, 4).to_string(), "[1, 4]");
    }
}
