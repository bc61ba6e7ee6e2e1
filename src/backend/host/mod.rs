//! Эталонная среда выполнения на CPU
//!
//! Эмулирует платформы, устройства, буферы и очередь команд в памяти процесса.
//! Любое собранное ядро исполняется как поэлементное сложение
//! `out[i] = a[i] + b[i]` для `i < n`: `a` и `b` берутся из первых двух
//! `const` буферов, `out` из первого изменяемого, `n` из первого скаляра.
//! Ведёт учёт живых объектов и порядка их освобождения для проверок утечек.

mod source;

pub use source::{parse_kernels, KernelDecl, ParamDecl};

use super::*;
use crate::config::HostConfig;
use crate::opencl::types::*;
use std::cell::RefCell;
use std::collections::HashMap;

/// Код для команд, чьи предшественники в очереди завершились ошибкой
pub const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: cl_int = -14;

struct HostDevice {
    id: DeviceId,
    info: DeviceInfo,
}

struct HostPlatform {
    id: PlatformId,
    info: PlatformInfo,
    devices: Vec<HostDevice>,
}

struct QueueObj {
    device: DeviceId,
    pending: Vec<LaunchCommand>,
    /// Первая ошибка выполнения, ещё не отданная через clFinish
    fault: Option<cl_int>,
}

struct ProgramObj {
    source: String,
    kernels: Option<Vec<KernelDecl>>,
    log: String,
}

struct KernelObj {
    decl: KernelDecl,
    args: Vec<Option<HostArg>>,
}

#[derive(Debug, Clone)]
enum HostArg {
    Mem(MemId),
    Bytes(Vec<u8>),
}

struct BufferObj {
    access: AccessMode,
    data: Vec<u8>,
}

struct LaunchCommand {
    decl: KernelDecl,
    args: Vec<HostArg>,
    global: usize,
}

#[derive(Default)]
struct HostState {
    next_id: usize,
    contexts: HashMap<usize, DeviceId>,
    queues: HashMap<usize, QueueObj>,
    programs: HashMap<usize, ProgramObj>,
    kernels: HashMap<usize, KernelObj>,
    buffers: HashMap<usize, BufferObj>,
    allocated: u64,
    /// Имя вызова → (сколько успешных вызовов пропустить, код ошибки)
    injected: HashMap<&'static str, (u32, cl_int)>,
    released: Vec<String>,
}

impl HostState {
    fn alloc_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }
}

pub struct HostBackend {
    config: HostConfig,
    platforms: Vec<HostPlatform>,
    state: RefCell<HostState>,
}

impl HostBackend {
    pub fn new(config: HostConfig) -> Self {
        let mut next_id = 0usize;
        let mut platforms = Vec::with_capacity(config.platforms);
        for p in 0..config.platforms {
            next_id += 1;
            let platform_id = PlatformId(next_id);
            let devices = (0..config.devices_per_platform)
                .map(|d| {
                    next_id += 1;
                    HostDevice {
                        id: DeviceId(next_id),
                        info: DeviceInfo {
                            name: format!("Host CPU {}.{}", p, d),
                            vendor: "opencl_offload".to_string(),
                            device_type: DeviceType::Cpu,
                            compute_units: config.compute_units,
                            max_work_group_size: config.max_work_group_size,
                            global_mem_size: config.global_mem_size,
                        },
                    }
                })
                .collect();
            platforms.push(HostPlatform {
                id: platform_id,
                info: PlatformInfo {
                    name: format!("Host Emulation {}", p),
                    vendor: "opencl_offload".to_string(),
                    version: "OpenCL 1.2 host".to_string(),
                },
                devices,
            });
        }

        Self {
            config,
            platforms,
            state: RefCell::new(HostState {
                next_id,
                ..HostState::default()
            }),
        }
    }

    /// Следующий вызов `call` (имя функции OpenCL) вернёт `code`
    pub fn inject_failure(&self, call: &'static str, code: cl_int) {
        self.inject_failure_after(call, 0, code);
    }

    /// Как `inject_failure`, но первые `skip` вызовов `call` проходят
    pub fn inject_failure_after(&self, call: &'static str, skip: u32, code: cl_int) {
        self.state.borrow_mut().injected.insert(call, (skip, code));
    }

    /// Число неосвобождённых объектов: контексты, очереди, программы, ядра, буферы
    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.contexts.len() + state.queues.len() + state.programs.len() + state.kernels.len() + state.buffers.len()
    }

    /// Освобождённые объекты в порядке освобождения: `"kernel"`, `"mem"`, ...
    pub fn release_log(&self) -> Vec<String> {
        self.state.borrow().released.clone()
    }

    fn injected(&self, call: &'static str) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let Some((skip, code)) = state.injected.remove(call) else {
            return Ok(());
        };
        if skip > 0 {
            state.injected.insert(call, (skip - 1, code));
            return Ok(());
        }
        Err(code)
    }

    fn device(&self, device: DeviceId) -> Option<&HostDevice> {
        self.platforms
            .iter()
            .flat_map(|p| p.devices.iter())
            .find(|d| d.id == device)
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

/// Исполняет поэлементное сложение над буферами
fn execute(command: &LaunchCommand, buffers: &mut HashMap<usize, BufferObj>) -> Status<()> {
    let mut inputs = Vec::new();
    let mut output = None;
    let mut count: Option<u64> = None;
    for (param, arg) in command.decl.params.iter().zip(&command.args) {
        match (&param.kind, arg) {
            (ArgKind::Buffer, HostArg::Mem(mem)) if param.is_const => inputs.push(*mem),
            (ArgKind::Buffer, HostArg::Mem(mem)) if output.is_none() => output = Some(*mem),
            (ArgKind::Scalar { .. }, HostArg::Bytes(bytes)) if count.is_none() => {
                count = match bytes.len() {
                    4 => Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64),
                    8 => Some(u64::from_ne_bytes(bytes[..8].try_into().map_err(|_| CL_INVALID_ARG_SIZE)?)),
                    _ => None,
                }
            }
            _ => {}
        }
    }
    let (a, b, out) = match (inputs.as_slice(), output) {
        ([a, b, ..], Some(out)) => (*a, *b, out),
        _ => return Err(CL_INVALID_KERNEL_ARGS),
    };

    let lhs: Vec<f32> = read_f32(buffers, a)?;
    let rhs: Vec<f32> = read_f32(buffers, b)?;
    let target = buffers.get_mut(&out.0).ok_or(CL_INVALID_MEM_OBJECT)?;
    if target.access == AccessMode::ReadOnly {
        return Err(CL_INVALID_OPERATION);
    }

    let limit = count.map_or(command.global as u64, |n| n.min(command.global as u64)) as usize;
    for gid in 0..limit {
        let (Some(x), Some(y)) = (lhs.get(gid), rhs.get(gid)) else {
            return Err(CL_OUT_OF_RESOURCES);
        };
        let slot = target
            .data
            .get_mut(gid * 4..gid * 4 + 4)
            .ok_or(CL_OUT_OF_RESOURCES)?;
        slot.copy_from_slice(&(x + y).to_ne_bytes());
    }
    Ok(())
}

fn read_f32(buffers: &HashMap<usize, BufferObj>, mem: MemId) -> Status<Vec<f32>> {
    let buffer = buffers.get(&mem.0).ok_or(CL_INVALID_MEM_OBJECT)?;
    Ok(buffer
        .data
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl HostState {
    /// Выполняет отложенные запуски очереди по порядку
    fn drain(&mut self, queue: QueueId) -> Status<()> {
        let obj = self.queues.get_mut(&queue.0).ok_or(CL_INVALID_COMMAND_QUEUE)?;
        let commands = std::mem::take(&mut obj.pending);
        let mut fault = obj.fault;
        for command in &commands {
            if fault.is_some() {
                break;
            }
            if let Err(code) = execute(command, &mut self.buffers) {
                log::warn!("Хостовое ядро {} завершилось с ошибкой {}", command.decl.name, code);
                fault = Some(code);
            }
        }
        if let Some(obj) = self.queues.get_mut(&queue.0) {
            obj.fault = fault;
        }
        Ok(())
    }

    fn release<T>(map: &mut HashMap<usize, T>, id: usize, label: &str, released: &mut Vec<String>, invalid: cl_int) -> Status<()> {
        map.remove(&id).ok_or(invalid)?;
        released.push(label.to_string());
        Ok(())
    }
}

impl Backend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn platform_ids(&self) -> Status<Vec<PlatformId>> {
        self.injected("clGetPlatformIDs")?;
        Ok(self.platforms.iter().map(|p| p.id).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> Status<PlatformInfo> {
        self.platforms
            .iter()
            .find(|p| p.id == platform)
            .map(|p| p.info.clone())
            .ok_or(CL_INVALID_VALUE)
    }

    fn device_ids(&self, platform: PlatformId) -> Status<Vec<DeviceId>> {
        self.injected("clGetDeviceIDs")?;
        let platform = self.platforms.iter().find(|p| p.id == platform).ok_or(CL_INVALID_VALUE)?;
        Ok(platform.devices.iter().map(|d| d.id).collect())
    }

    fn device_info(&self, device: DeviceId) -> Status<DeviceInfo> {
        self.device(device).map(|d| d.info.clone()).ok_or(CL_INVALID_DEVICE)
    }

    fn create_context(&self, device: DeviceId) -> Status<ContextId> {
        self.injected("clCreateContext")?;
        self.device(device).ok_or(CL_INVALID_DEVICE)?;
        let mut state = self.state.borrow_mut();
        let id = state.alloc_id();
        state.contexts.insert(id, device);
        Ok(ContextId(id))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> Status<QueueId> {
        self.injected("clCreateCommandQueue")?;
        let mut state = self.state.borrow_mut();
        match state.contexts.get(&context.0) {
            Some(bound) if *bound == device => {}
            Some(_) => return Err(CL_INVALID_DEVICE),
            None => return Err(CL_INVALID_CONTEXT),
        }
        let id = state.alloc_id();
        state.queues.insert(
            id,
            QueueObj {
                device,
                pending: Vec::new(),
                fault: None,
            },
        );
        Ok(QueueId(id))
    }

    fn create_program(&self, context: ContextId, source: &str) -> Status<ProgramId> {
        self.injected("clCreateProgramWithSource")?;
        if source.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        let mut state = self.state.borrow_mut();
        if !state.contexts.contains_key(&context.0) {
            return Err(CL_INVALID_CONTEXT);
        }
        let id = state.alloc_id();
        state.programs.insert(
            id,
            ProgramObj {
                source: source.to_string(),
                kernels: None,
                log: String::new(),
            },
        );
        Ok(ProgramId(id))
    }

    fn build_program(&self, program: ProgramId, device: DeviceId, options: &str) -> Status<()> {
        self.injected("clBuildProgram")?;
        self.device(device).ok_or(CL_INVALID_DEVICE)?;
        let mut state = self.state.borrow_mut();
        let obj = state.programs.get_mut(&program.0).ok_or(CL_INVALID_PROGRAM)?;
        log::debug!("Хостовая сборка программы с опциями {:?}", options);
        match parse_kernels(&obj.source) {
            Ok(kernels) => {
                obj.kernels = Some(kernels);
                obj.log.clear();
                Ok(())
            }
            Err(log) => {
                obj.kernels = None;
                obj.log = log;
                Err(CL_BUILD_PROGRAM_FAILURE)
            }
        }
    }

    fn build_log(&self, program: ProgramId, _device: DeviceId) -> Status<String> {
        let state = self.state.borrow();
        state
            .programs
            .get(&program.0)
            .map(|p| p.log.clone())
            .ok_or(CL_INVALID_PROGRAM)
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> Status<KernelId> {
        self.injected("clCreateKernel")?;
        let mut state = self.state.borrow_mut();
        let obj = state.programs.get(&program.0).ok_or(CL_INVALID_PROGRAM)?;
        let kernels = obj.kernels.as_ref().ok_or(CL_INVALID_PROGRAM_EXECUTABLE)?;
        let decl = kernels
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or(CL_INVALID_KERNEL_NAME)?;
        let id = state.alloc_id();
        let args = vec![None; decl.params.len()];
        state.kernels.insert(id, KernelObj { decl, args });
        Ok(KernelId(id))
    }

    fn kernel_signature(&self, kernel: KernelId) -> Status<Vec<ArgKind>> {
        let state = self.state.borrow();
        let obj = state.kernels.get(&kernel.0).ok_or(CL_INVALID_KERNEL)?;
        Ok(obj.decl.params.iter().map(|p| p.kind.clone()).collect())
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, value: ArgValue<'_>) -> Status<()> {
        self.injected("clSetKernelArg")?;
        let mut state = self.state.borrow_mut();
        if let ArgValue::Mem(mem) = value {
            if !state.buffers.contains_key(&mem.0) {
                return Err(CL_INVALID_MEM_OBJECT);
            }
        }
        let obj = state.kernels.get_mut(&kernel.0).ok_or(CL_INVALID_KERNEL)?;
        let param = obj.decl.params.get(index as usize).ok_or(CL_INVALID_ARG_INDEX)?;
        let arg = match (&param.kind, value) {
            (ArgKind::Buffer, ArgValue::Mem(mem)) => HostArg::Mem(mem),
            (ArgKind::Scalar { width, .. }, ArgValue::Bytes(bytes)) => {
                if width.is_some_and(|w| w != bytes.len()) {
                    return Err(CL_INVALID_ARG_SIZE);
                }
                HostArg::Bytes(bytes.to_vec())
            }
            _ => return Err(CL_INVALID_ARG_VALUE),
        };
        obj.args[index as usize] = Some(arg);
        Ok(())
    }

    fn create_buffer(&self, context: ContextId, access: AccessMode, byte_length: usize) -> Status<MemId> {
        self.injected("clCreateBuffer")?;
        if byte_length == 0 || byte_length > self.config.max_alloc_size {
            return Err(CL_INVALID_BUFFER_SIZE);
        }
        let mut state = self.state.borrow_mut();
        if !state.contexts.contains_key(&context.0) {
            return Err(CL_INVALID_CONTEXT);
        }
        if state.allocated + byte_length as u64 > self.config.global_mem_size {
            return Err(CL_MEM_OBJECT_ALLOCATION_FAILURE);
        }
        state.allocated += byte_length as u64;
        let id = state.alloc_id();
        state.buffers.insert(
            id,
            BufferObj {
                access,
                data: vec![0u8; byte_length],
            },
        );
        Ok(MemId(id))
    }

    fn write_buffer(&self, queue: QueueId, mem: MemId, data: &[u8]) -> Status<()> {
        self.injected("clEnqueueWriteBuffer")?;
        let mut state = self.state.borrow_mut();
        state.drain(queue)?;
        if state.queues.get(&queue.0).and_then(|q| q.fault).is_some() {
            return Err(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        }
        let buffer = state.buffers.get_mut(&mem.0).ok_or(CL_INVALID_MEM_OBJECT)?;
        if data.len() > buffer.data.len() {
            return Err(CL_INVALID_VALUE);
        }
        buffer.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, queue: QueueId, mem: MemId, out: &mut [u8]) -> Status<()> {
        self.injected("clEnqueueReadBuffer")?;
        let mut state = self.state.borrow_mut();
        state.drain(queue)?;
        if state.queues.get(&queue.0).and_then(|q| q.fault).is_some() {
            return Err(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        }
        let buffer = state.buffers.get(&mem.0).ok_or(CL_INVALID_MEM_OBJECT)?;
        if out.len() > buffer.data.len() {
            return Err(CL_INVALID_VALUE);
        }
        out.copy_from_slice(&buffer.data[..out.len()]);
        Ok(())
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, global: usize, local: usize) -> Status<()> {
        self.injected("clEnqueueNDRangeKernel")?;
        let mut state = self.state.borrow_mut();
        let device = state.queues.get(&queue.0).ok_or(CL_INVALID_COMMAND_QUEUE)?.device;
        let max_local = self.device(device).map_or(0, |d| d.info.max_work_group_size);
        if global == 0 {
            return Err(CL_INVALID_GLOBAL_WORK_SIZE);
        }
        if local == 0 || local > max_local || global % local != 0 {
            return Err(CL_INVALID_WORK_GROUP_SIZE);
        }

        let obj = state.kernels.get(&kernel.0).ok_or(CL_INVALID_KERNEL)?;
        let args = obj
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(CL_INVALID_KERNEL_ARGS)?;
        let command = LaunchCommand {
            decl: obj.decl.clone(),
            args,
            global,
        };
        if let Some(queue) = state.queues.get_mut(&queue.0) {
            queue.pending.push(command);
        }
        Ok(())
    }

    fn finish(&self, queue: QueueId) -> Status<()> {
        self.injected("clFinish")?;
        let mut state = self.state.borrow_mut();
        state.drain(queue)?;
        match state.queues.get_mut(&queue.0).and_then(|q| q.fault.take()) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn release_mem(&self, mem: MemId) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        if let Some(buffer) = state.buffers.get(&mem.0) {
            state.allocated -= buffer.data.len() as u64;
        }
        HostState::release(&mut state.buffers, mem.0, "mem", &mut state.released, CL_INVALID_MEM_OBJECT)
    }

    fn release_kernel(&self, kernel: KernelId) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        HostState::release(&mut state.kernels, kernel.0, "kernel", &mut state.released, CL_INVALID_KERNEL)
    }

    fn release_program(&self, program: ProgramId) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        HostState::release(&mut state.programs, program.0, "program", &mut state.released, CL_INVALID_PROGRAM)
    }

    fn release_queue(&self, queue: QueueId) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        HostState::release(&mut state.queues, queue.0, "queue", &mut state.released, CL_INVALID_COMMAND_QUEUE)
    }

    fn release_context(&self, context: ContextId) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        HostState::release(&mut state.contexts, context.0, "context", &mut state.released, CL_INVALID_CONTEXT)
    }
}
