//! Модуль для работы с OpenCL
//!
//! Содержит низкоуровневые привязки, загружаемые во время выполнения, и
//! реализацию `Backend` поверх них

mod backend;
pub mod bindings;
pub mod callbacks;
pub mod types;
pub mod utils;

pub use backend::OpenClBackend;
