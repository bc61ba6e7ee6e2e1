//! Реализация `Backend` поверх OpenCL API

use super::bindings::ClApi;
use super::callbacks::log_context_error;
use super::types::*;
use super::utils::{query_string, query_value};
use crate::backend::*;
use crate::error::{ClError, Result};
use crate::{cl_check, cl_create};
use std::ffi::{c_void, CString};
use std::path::Path;
use std::ptr;

/// Среда выполнения OpenCL, загруженная из системного ICD-загрузчика
pub struct OpenClBackend {
    api: ClApi,
}

// Дескрипторы OpenCL хранятся как usize в типах handle
fn raw<T: Into<usize>>(handle: T) -> *mut c_void {
    handle.into() as *mut c_void
}

macro_rules! into_usize {
    ($($name:ident),*) => {
        $(impl From<$name> for usize {
            fn from(handle: $name) -> usize {
                handle.0
            }
        })*
    };
}

into_usize!(PlatformId, DeviceId, ContextId, QueueId, ProgramId, KernelId, MemId);

fn access_flags(access: AccessMode) -> cl_mem_flags {
    match access {
        AccessMode::ReadOnly => CL_MEM_READ_ONLY,
        AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        AccessMode::ReadWrite => CL_MEM_READ_WRITE,
    }
}

fn device_type(bits: cl_device_type) -> DeviceType {
    if bits & CL_DEVICE_TYPE_GPU != 0 {
        DeviceType::Gpu
    } else if bits & CL_DEVICE_TYPE_CPU != 0 {
        DeviceType::Cpu
    } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceType::Accelerator
    } else {
        DeviceType::Other
    }
}

impl OpenClBackend {
    pub fn load(library: Option<&Path>) -> Result<Self> {
        let api = ClApi::load(library).map_err(ClError::RuntimeUnavailable)?;
        Ok(Self { api })
    }

    fn platform_string(&self, platform: PlatformId, param: cl_platform_info) -> Status<String> {
        let f = self.api.fns.get_platform_info;
        query_string(|size, value, size_ret| unsafe { f(raw(platform), param, size, value, size_ret) })
    }

    fn device_string(&self, device: DeviceId, param: cl_device_info) -> Status<String> {
        let f = self.api.fns.get_device_info;
        query_string(|size, value, size_ret| unsafe { f(raw(device), param, size, value, size_ret) })
    }

    fn device_value<T: bytemuck::Pod>(&self, device: DeviceId, param: cl_device_info) -> Status<T> {
        let f = self.api.fns.get_device_info;
        query_value(|size, value, size_ret| unsafe { f(raw(device), param, size, value, size_ret) })
    }

    fn arg_kind(&self, kernel: KernelId, index: cl_uint) -> Status<ArgKind> {
        let f = self.api.fns.get_kernel_arg_info;
        let qualifier: Status<cl_kernel_arg_address_qualifier> = query_value(|size, value, size_ret| unsafe {
            f(raw(kernel), index, CL_KERNEL_ARG_ADDRESS_QUALIFIER, size, value, size_ret)
        });
        // Без -cl-kernel-arg-info сведения о параметрах недоступны
        let qualifier = match qualifier {
            Ok(q) => q,
            Err(CL_KERNEL_ARG_INFO_NOT_AVAILABLE) => return Ok(ArgKind::Unknown),
            Err(code) => return Err(code),
        };
        match qualifier {
            CL_KERNEL_ARG_ADDRESS_GLOBAL | CL_KERNEL_ARG_ADDRESS_CONSTANT => Ok(ArgKind::Buffer),
            CL_KERNEL_ARG_ADDRESS_LOCAL => Ok(ArgKind::Local),
            _ => {
                let type_name = query_string(|size, value, size_ret| unsafe {
                    f(raw(kernel), index, CL_KERNEL_ARG_TYPE_NAME, size, value, size_ret)
                })?;
                let width = scalar_width(&type_name);
                Ok(ArgKind::Scalar { type_name, width })
            }
        }
    }
}

impl Backend for OpenClBackend {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platform_ids(&self) -> Status<Vec<PlatformId>> {
        let mut count: cl_uint = 0;
        match cl_check!((self.api.fns.get_platform_ids)(0, ptr::null_mut(), &mut count)) {
            Ok(()) => {}
            // ICD-загрузчик сообщает об отсутствии платформ этим кодом
            Err(CL_PLATFORM_NOT_FOUND_KHR) => return Ok(Vec::new()),
            Err(code) => return Err(code),
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<cl_platform_id> = vec![ptr::null_mut(); count as usize];
        cl_check!((self.api.fns.get_platform_ids)(count, ids.as_mut_ptr(), ptr::null_mut()))?;
        Ok(ids.into_iter().map(|id| PlatformId(id as usize)).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> Status<PlatformInfo> {
        Ok(PlatformInfo {
            name: self.platform_string(platform, CL_PLATFORM_NAME)?,
            vendor: self.platform_string(platform, CL_PLATFORM_VENDOR)?,
            version: self.platform_string(platform, CL_PLATFORM_VERSION)?,
        })
    }

    fn device_ids(&self, platform: PlatformId) -> Status<Vec<DeviceId>> {
        let f = self.api.fns.get_device_ids;
        let mut count: cl_uint = 0;
        match cl_check!(f(raw(platform), CL_DEVICE_TYPE_ALL, 0, ptr::null_mut(), &mut count)) {
            Ok(()) => {}
            Err(CL_DEVICE_NOT_FOUND) => return Ok(Vec::new()),
            Err(code) => return Err(code),
        }
        let mut ids: Vec<cl_device_id> = vec![ptr::null_mut(); count as usize];
        cl_check!(f(raw(platform), CL_DEVICE_TYPE_ALL, count, ids.as_mut_ptr(), ptr::null_mut()))?;
        Ok(ids.into_iter().map(|id| DeviceId(id as usize)).collect())
    }

    fn device_info(&self, device: DeviceId) -> Status<DeviceInfo> {
        let type_bits: cl_device_type = self.device_value(device, CL_DEVICE_TYPE)?;
        Ok(DeviceInfo {
            name: self.device_string(device, CL_DEVICE_NAME)?,
            vendor: self.device_string(device, CL_DEVICE_VENDOR)?,
            device_type: device_type(type_bits),
            compute_units: self.device_value::<cl_uint>(device, CL_DEVICE_MAX_COMPUTE_UNITS)?,
            max_work_group_size: self.device_value::<usize>(device, CL_DEVICE_MAX_WORK_GROUP_SIZE)?,
            global_mem_size: self.device_value::<cl_ulong>(device, CL_DEVICE_GLOBAL_MEM_SIZE)?,
        })
    }

    fn create_context(&self, device: DeviceId) -> Status<ContextId> {
        let device = raw(device) as cl_device_id;
        let context = cl_create!(
            self.api.fns.create_context,
            ptr::null(),
            1,
            &device,
            Some(log_context_error),
            ptr::null_mut()
        )?;
        Ok(ContextId(context as usize))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> Status<QueueId> {
        let queue = cl_create!(self.api.fns.create_command_queue, raw(context), raw(device), 0)?;
        Ok(QueueId(queue as usize))
    }

    fn create_program(&self, context: ContextId, source: &str) -> Status<ProgramId> {
        let text = source.as_ptr() as *const std::os::raw::c_char;
        let length = source.len();
        let program = cl_create!(self.api.fns.create_program_with_source, raw(context), 1, &text, &length)?;
        Ok(ProgramId(program as usize))
    }

    fn build_program(&self, program: ProgramId, device: DeviceId, options: &str) -> Status<()> {
        let options = CString::new(options).map_err(|_| CL_INVALID_VALUE)?;
        let device = raw(device) as cl_device_id;
        cl_check!((self.api.fns.build_program)(
            raw(program),
            1,
            &device,
            options.as_ptr(),
            None,
            ptr::null_mut()
        ))
    }

    fn build_log(&self, program: ProgramId, device: DeviceId) -> Status<String> {
        let f = self.api.fns.get_program_build_info;
        query_string(|size, value, size_ret| unsafe {
            f(raw(program), raw(device), CL_PROGRAM_BUILD_LOG, size, value, size_ret)
        })
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> Status<KernelId> {
        let name = CString::new(name).map_err(|_| CL_INVALID_KERNEL_NAME)?;
        let kernel = cl_create!(self.api.fns.create_kernel, raw(program), name.as_ptr())?;
        Ok(KernelId(kernel as usize))
    }

    fn kernel_signature(&self, kernel: KernelId) -> Status<Vec<ArgKind>> {
        let f = self.api.fns.get_kernel_info;
        let arity: cl_uint = query_value(|size, value, size_ret| unsafe {
            f(raw(kernel), CL_KERNEL_NUM_ARGS, size, value, size_ret)
        })?;
        (0..arity).map(|index| self.arg_kind(kernel, index)).collect()
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, value: ArgValue<'_>) -> Status<()> {
        let f = self.api.fns.set_kernel_arg;
        match value {
            ArgValue::Mem(mem) => {
                let mem = raw(mem) as cl_mem;
                cl_check!(f(
                    raw(kernel),
                    index,
                    std::mem::size_of::<cl_mem>(),
                    &mem as *const cl_mem as *const c_void
                ))
            }
            ArgValue::Bytes(bytes) => cl_check!(f(
                raw(kernel),
                index,
                bytes.len(),
                bytes.as_ptr() as *const c_void
            )),
        }
    }

    fn create_buffer(&self, context: ContextId, access: AccessMode, byte_length: usize) -> Status<MemId> {
        let mem = cl_create!(
            self.api.fns.create_buffer,
            raw(context),
            access_flags(access),
            byte_length,
            ptr::null_mut()
        )?;
        Ok(MemId(mem as usize))
    }

    fn write_buffer(&self, queue: QueueId, mem: MemId, data: &[u8]) -> Status<()> {
        cl_check!((self.api.fns.enqueue_write_buffer)(
            raw(queue),
            raw(mem),
            CL_TRUE,
            0,
            data.len(),
            data.as_ptr() as *const c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ))
    }

    fn read_buffer(&self, queue: QueueId, mem: MemId, out: &mut [u8]) -> Status<()> {
        cl_check!((self.api.fns.enqueue_read_buffer)(
            raw(queue),
            raw(mem),
            CL_TRUE,
            0,
            out.len(),
            out.as_mut_ptr() as *mut c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ))
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, global: usize, local: usize) -> Status<()> {
        cl_check!((self.api.fns.enqueue_nd_range_kernel)(
            raw(queue),
            raw(kernel),
            1,
            ptr::null(),
            &global,
            &local,
            0,
            ptr::null(),
            ptr::null_mut()
        ))
    }

    fn finish(&self, queue: QueueId) -> Status<()> {
        cl_check!((self.api.fns.finish)(raw(queue)))
    }

    fn release_mem(&self, mem: MemId) -> Status<()> {
        cl_check!((self.api.fns.release_mem_object)(raw(mem)))
    }

    fn release_kernel(&self, kernel: KernelId) -> Status<()> {
        cl_check!((self.api.fns.release_kernel)(raw(kernel)))
    }

    fn release_program(&self, program: ProgramId) -> Status<()> {
        cl_check!((self.api.fns.release_program)(raw(program)))
    }

    fn release_queue(&self, queue: QueueId) -> Status<()> {
        cl_check!((self.api.fns.release_command_queue)(raw(queue)))
    }

    fn release_context(&self, context: ContextId) -> Status<()> {
        cl_check!((self.api.fns.release_context)(raw(context)))
    }
}
