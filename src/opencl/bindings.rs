//! Низкоуровневые привязки к OpenCL API
//!
//! Библиотека ICD-загрузчика открывается во время выполнения, поэтому крейт
//! собирается и тестируется на машинах без OpenCL драйвера.

use super::callbacks::ContextNotifyCallback;
use super::types::*;
use libloading::Library;
use std::ffi::c_void;
use std::os::raw::c_char;

pub type ClGetPlatformIdsFn = unsafe extern "C" fn(
    num_entries: cl_uint,
    platforms: *mut cl_platform_id,
    num_platforms: *mut cl_uint,
) -> cl_int;

pub type ClGetPlatformInfoFn = unsafe extern "C" fn(
    platform: cl_platform_id,
    param_name: cl_platform_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClGetDeviceIdsFn = unsafe extern "C" fn(
    platform: cl_platform_id,
    device_type: cl_device_type,
    num_entries: cl_uint,
    devices: *mut cl_device_id,
    num_devices: *mut cl_uint,
) -> cl_int;

pub type ClGetDeviceInfoFn = unsafe extern "C" fn(
    device: cl_device_id,
    param_name: cl_device_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClCreateContextFn = unsafe extern "C" fn(
    properties: *const cl_context_properties,
    num_devices: cl_uint,
    devices: *const cl_device_id,
    pfn_notify: ContextNotifyCallback,
    user_data: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_context;

pub type ClCreateCommandQueueFn = unsafe extern "C" fn(
    context: cl_context,
    device: cl_device_id,
    properties: cl_command_queue_properties,
    errcode_ret: *mut cl_int,
) -> cl_command_queue;

pub type ClCreateProgramWithSourceFn = unsafe extern "C" fn(
    context: cl_context,
    count: cl_uint,
    strings: *const *const c_char,
    lengths: *const usize,
    errcode_ret: *mut cl_int,
) -> cl_program;

pub type ClBuildProgramFn = unsafe extern "C" fn(
    program: cl_program,
    num_devices: cl_uint,
    device_list: *const cl_device_id,
    options: *const c_char,
    pfn_notify: Option<unsafe extern "C" fn(cl_program, *mut c_void)>,
    user_data: *mut c_void,
) -> cl_int;

pub type ClGetProgramBuildInfoFn = unsafe extern "C" fn(
    program: cl_program,
    device: cl_device_id,
    param_name: cl_program_build_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClCreateKernelFn = unsafe extern "C" fn(
    program: cl_program,
    kernel_name: *const c_char,
    errcode_ret: *mut cl_int,
) -> cl_kernel;

pub type ClGetKernelInfoFn = unsafe extern "C" fn(
    kernel: cl_kernel,
    param_name: cl_kernel_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClGetKernelArgInfoFn = unsafe extern "C" fn(
    kernel: cl_kernel,
    arg_index: cl_uint,
    param_name: cl_kernel_arg_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClCreateBufferFn = unsafe extern "C" fn(
    context: cl_context,
    flags: cl_mem_flags,
    size: usize,
    host_ptr: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_mem;

pub type ClSetKernelArgFn = unsafe extern "C" fn(
    kernel: cl_kernel,
    arg_index: cl_uint,
    arg_size: usize,
    arg_value: *const c_void,
) -> cl_int;

pub type ClEnqueueNdRangeKernelFn = unsafe extern "C" fn(
    command_queue: cl_command_queue,
    kernel: cl_kernel,
    work_dim: cl_uint,
    global_work_offset: *const usize,
    global_work_size: *const usize,
    local_work_size: *const usize,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

pub type ClEnqueueReadBufferFn = unsafe extern "C" fn(
    command_queue: cl_command_queue,
    buffer: cl_mem,
    blocking_read: cl_bool,
    offset: usize,
    size: usize,
    ptr: *mut c_void,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

pub type ClEnqueueWriteBufferFn = unsafe extern "C" fn(
    command_queue: cl_command_queue,
    buffer: cl_mem,
    blocking_write: cl_bool,
    offset: usize,
    size: usize,
    ptr: *const c_void,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

pub type ClFinishFn = unsafe extern "C" fn(command_queue: cl_command_queue) -> cl_int;

pub type ClReleaseFn = unsafe extern "C" fn(object: *mut c_void) -> cl_int;

/// Таблица точек входа OpenCL, разрешённых из загруженной библиотеки
pub struct ClFns {
    pub get_platform_ids: ClGetPlatformIdsFn,
    pub get_platform_info: ClGetPlatformInfoFn,
    pub get_device_ids: ClGetDeviceIdsFn,
    pub get_device_info: ClGetDeviceInfoFn,
    pub create_context: ClCreateContextFn,
    pub create_command_queue: ClCreateCommandQueueFn,
    pub create_program_with_source: ClCreateProgramWithSourceFn,
    pub build_program: ClBuildProgramFn,
    pub get_program_build_info: ClGetProgramBuildInfoFn,
    pub create_kernel: ClCreateKernelFn,
    pub get_kernel_info: ClGetKernelInfoFn,
    pub get_kernel_arg_info: ClGetKernelArgInfoFn,
    pub create_buffer: ClCreateBufferFn,
    pub set_kernel_arg: ClSetKernelArgFn,
    pub enqueue_nd_range_kernel: ClEnqueueNdRangeKernelFn,
    pub enqueue_read_buffer: ClEnqueueReadBufferFn,
    pub enqueue_write_buffer: ClEnqueueWriteBufferFn,
    pub finish: ClFinishFn,
    pub release_mem_object: ClReleaseFn,
    pub release_kernel: ClReleaseFn,
    pub release_program: ClReleaseFn,
    pub release_command_queue: ClReleaseFn,
    pub release_context: ClReleaseFn,
}

/// Имена, под которыми ICD-загрузчик встречается на поддерживаемых системах
pub const LIBRARY_CANDIDATES: [&str; 4] = [
    "libOpenCL.so.1",
    "libOpenCL.so",
    "OpenCL.dll",
    "/System/Library/Frameworks/OpenCL.framework/OpenCL",
];

/// Загруженная библиотека OpenCL вместе с таблицей функций
pub struct ClApi {
    pub fns: ClFns,
    _lib: Library,
}

impl ClApi {
    /// Открывает указанную библиотеку или перебирает стандартные имена
    pub fn load(library: Option<&std::path::Path>) -> Result<Self, String> {
        let lib = match library {
            // SAFETY: загрузка библиотеки, символы ещё не вызываются.
            Some(path) => unsafe { Library::new(path) }
                .map_err(|err| format!("failed to load {}: {err}", path.display()))?,
            None => open_first_candidate()?,
        };

        let fns = ClFns {
            get_platform_ids: load_symbol(&lib, b"clGetPlatformIDs\0")?,
            get_platform_info: load_symbol(&lib, b"clGetPlatformInfo\0")?,
            get_device_ids: load_symbol(&lib, b"clGetDeviceIDs\0")?,
            get_device_info: load_symbol(&lib, b"clGetDeviceInfo\0")?,
            create_context: load_symbol(&lib, b"clCreateContext\0")?,
            create_command_queue: load_symbol(&lib, b"clCreateCommandQueue\0")?,
            create_program_with_source: load_symbol(&lib, b"clCreateProgramWithSource\0")?,
            build_program: load_symbol(&lib, b"clBuildProgram\0")?,
            get_program_build_info: load_symbol(&lib, b"clGetProgramBuildInfo\0")?,
            create_kernel: load_symbol(&lib, b"clCreateKernel\0")?,
            get_kernel_info: load_symbol(&lib, b"clGetKernelInfo\0")?,
            get_kernel_arg_info: load_symbol(&lib, b"clGetKernelArgInfo\0")?,
            create_buffer: load_symbol(&lib, b"clCreateBuffer\0")?,
            set_kernel_arg: load_symbol(&lib, b"clSetKernelArg\0")?,
            enqueue_nd_range_kernel: load_symbol(&lib, b"clEnqueueNDRangeKernel\0")?,
            enqueue_read_buffer: load_symbol(&lib, b"clEnqueueReadBuffer\0")?,
            enqueue_write_buffer: load_symbol(&lib, b"clEnqueueWriteBuffer\0")?,
            finish: load_symbol(&lib, b"clFinish\0")?,
            release_mem_object: load_symbol(&lib, b"clReleaseMemObject\0")?,
            release_kernel: load_symbol(&lib, b"clReleaseKernel\0")?,
            release_program: load_symbol(&lib, b"clReleaseProgram\0")?,
            release_command_queue: load_symbol(&lib, b"clReleaseCommandQueue\0")?,
            release_context: load_symbol(&lib, b"clReleaseContext\0")?,
        };

        Ok(Self { fns, _lib: lib })
    }
}

fn open_first_candidate() -> Result<Library, String> {
    for candidate in LIBRARY_CANDIDATES {
        // SAFETY: только пробная загрузка, символы не вызываются.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            log::debug!("Загружена библиотека OpenCL: {}", candidate);
            return Ok(lib);
        }
    }
    Err(format!(
        "failed to load OpenCL ICD loader (tried {})",
        LIBRARY_CANDIDATES.join(", ")
    ))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, String> {
    // SAFETY: тип символа задаётся вызывающим по сигнатуре OpenCL API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        format!(
            "failed to resolve OpenCL symbol {}: {err}",
            String::from_utf8_lossy(&name[..name.len() - 1])
        )
    })?;
    Ok(*sym)
}
