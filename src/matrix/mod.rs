//! Модуль для работы с матрицами
//!
//! Предоставляет:
//! - Тип матрицы и её форму
//! - Бинарный формат обмена
//! - Эталонные операции на CPU
//! - Исходный код ядра

mod types;
pub mod codec;
pub mod kernels;
pub mod operations;

pub use types::{Matrix, Shape};
pub use operations::{compare_results, cpu_vector_add, initialize_matrix, Comparison, Fill};
pub use kernels::{VECTOR_ADD_ENTRY, VECTOR_ADD_KERNEL};
