//! Конвейер выгрузки вычислений на OpenCL-устройство
//!
//! Поиск устройства, сессия (контекст, очередь, программа, ядра), буферы
//! устройства, диспетчеризация ядра с барьером завершения и бинарный формат
//! матриц для обмена операндами и результатами.

pub mod backend;
pub mod compute;
pub mod config;
pub mod error;
pub mod matrix;
pub mod opencl;
pub mod pipeline;
pub mod utils;

// Реэкспортируем макросы на уровень крейта
#[macro_use]
mod macros {
    /// Макрос для обработки кодов возврата OpenCL.
    ///
    /// Вычисляется в `Status<()>`, код ошибки передаётся как есть.
    #[macro_export]
    macro_rules! cl_check {
        ($expr:expr) => {{
            #[allow(unused_unsafe)]
            let code: $crate::opencl::types::cl_int = unsafe { $expr };
            let status: $crate::backend::Status<()> = if code != $crate::opencl::types::CL_SUCCESS {
                Err(code)
            } else {
                Ok(())
            };
            status
        }};
    }

    /// Макрос для функций clCreate*, возвращающих объект и код через out-параметр.
    ///
    /// Последний аргумент `errcode_ret` подставляется макросом.
    #[macro_export]
    macro_rules! cl_create {
        ($func:expr, $($arg:expr),* $(,)?) => {{
            let mut code: $crate::opencl::types::cl_int = $crate::opencl::types::CL_SUCCESS;
            #[allow(unused_unsafe)]
            let obj = unsafe { ($func)($($arg),*, &mut code) };
            if code != $crate::opencl::types::CL_SUCCESS {
                Err(code)
            } else if obj.is_null() {
                Err($crate::opencl::types::CL_INVALID_VALUE)
            } else {
                Ok(obj)
            }
        }};
    }
}

// Реэкспорт основных типов для удобства
pub use backend::{AccessMode, Backend};
pub use compute::{
    ComputeSession, DeviceBuffer, DeviceDescriptor, Dispatcher, KernelArg, KernelHandle,
    LaunchGeometry, PlatformDescriptor, PlatformDirectory,
};
pub use config::PipelineConfig;
pub use error::{ClError, ErrorKind, Result};
pub use matrix::{Matrix, Shape};
