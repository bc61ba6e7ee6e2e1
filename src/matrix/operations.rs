//! Операции над матрицами на CPU

use super::types::{Matrix, Shape};
use crate::error::{ClError, Result};
use rand::Rng;

/// Тип заполнения операндов
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// Все элементы равны значению
    Constant(f32),
    /// Элементы 0, 1, 2, ...
    Sequence,
    /// Равномерно распределённые значения из [0, 1)
    Random,
}

/// Создаёт матрицу заданной формы
pub fn initialize_matrix<R: Rng>(shape: Shape, fill: Fill, rng: &mut R) -> Matrix {
    let n = shape.elements() as usize;
    let data: Vec<f32> = match fill {
        Fill::Constant(value) => vec![value; n],
        Fill::Sequence => (0..n).map(|i| i as f32).collect(),
        Fill::Random => (0..n).map(|_| rng.gen_range(0.0..1.0)).collect(),
    };
    // Длина данных совпадает с формой по построению
    let mut matrix = Matrix::zeros(shape);
    matrix.data_mut().copy_from_slice(&data);
    matrix
}

/// CPU реализация поэлементного сложения
pub fn cpu_vector_add(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    if a.shape() != b.shape() {
        return Err(ClError::ShapeMismatch {
            what: "operand".to_string(),
            expected: a.shape(),
            found: b.shape(),
        });
    }
    let mut c = Matrix::zeros(a.shape());
    for ((out, x), y) in c.data_mut().iter_mut().zip(a.data()).zip(b.data()) {
        *out = x + y;
    }
    Ok(c)
}

/// Итог сравнения результата устройства с эталоном
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub mismatches: usize,
    pub max_diff: f32,
}

impl Comparison {
    pub fn matches(&self) -> bool {
        self.mismatches == 0
    }
}

/// Сравнивает результаты GPU и CPU вычислений с допуском `epsilon`
pub fn compare_results(device_result: &[f32], cpu_result: &[f32], epsilon: f32) -> Comparison {
    let mut max_diff = 0.0f32;
    let mut mismatches = device_result.len().abs_diff(cpu_result.len());

    for (x, y) in device_result.iter().zip(cpu_result) {
        let diff = (x - y).abs();
        // NaN никогда не проходит сравнение
        if !(diff <= epsilon) {
            mismatches += 1;
            max_diff = max_diff.max(diff);
        }
    }

    if mismatches > 0 {
        log::warn!(
            "Обнаружены расхождения: {} элементов, максимальная разница {}",
            mismatches,
            max_diff
        );
    }
    Comparison { mismatches, max_diff }
}
