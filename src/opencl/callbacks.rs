use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

/// Тип callback-функции для контекста OpenCL
pub type ContextNotifyCallback = Option<
    unsafe extern "C" fn(
        errinfo: *const c_char,
        private_info: *const c_void,
        cb: usize,
        user_data: *mut c_void,
    ),
>;

/// Пересылает асинхронные сообщения драйвера об ошибках контекста в лог
pub unsafe extern "C" fn log_context_error(
    errinfo: *const c_char,
    _private_info: *const c_void,
    _cb: usize,
    _user_data: *mut c_void,
) {
    if errinfo.is_null() {
        return;
    }
    // SAFETY: драйвер передаёт null-terminated строку, живущую на время вызова.
    let message = unsafe { CStr::from_ptr(errinfo) };
    log::error!("OpenCL context: {}", message.to_string_lossy());
}
