//! OpenCL ядра для матричных операций

/// Исходный код ядра поэлементного сложения; тот же файл читается с диска по `kernel_path`
pub static VECTOR_ADD_KERNEL: &str = include_str!("../../kernel.cl");

/// Имя точки входа в `VECTOR_ADD_KERNEL`
pub const VECTOR_ADD_ENTRY: &str = "vectorAdd";
