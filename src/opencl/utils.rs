//! Вспомогательные функции для запросов clGet*Info

use super::types::*;
use crate::cl_check;
use crate::backend::Status;

/// Двухшаговый запрос строкового параметра: сначала размер, затем данные.
///
/// `query(size, ptr, size_ret)` оборачивает конкретную clGet*Info функцию.
pub fn query_string<F>(mut query: F) -> Status<String>
where
    F: FnMut(usize, *mut std::ffi::c_void, *mut usize) -> cl_int,
{
    let mut size = 0usize;
    cl_check!(query(0, std::ptr::null_mut(), &mut size as *mut usize))?;
    if size == 0 {
        return Ok(String::new());
    }

    let mut bytes = vec![0u8; size];
    cl_check!(query(size, bytes.as_mut_ptr() as *mut std::ffi::c_void, std::ptr::null_mut()))?;

    // Строки OpenCL завершаются нулём
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Запрос параметра фиксированного размера (cl_uint, cl_ulong, size_t, ...)
pub fn query_value<T, F>(mut query: F) -> Status<T>
where
    T: bytemuck::Pod,
    F: FnMut(usize, *mut std::ffi::c_void, *mut usize) -> cl_int,
{
    let mut value = T::zeroed();
    cl_check!(query(
        std::mem::size_of::<T>(),
        &mut value as *mut T as *mut std::ffi::c_void,
        std::ptr::null_mut()
    ))?;
    Ok(value)
}
