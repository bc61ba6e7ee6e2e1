//! Граница между компонентами конвейера и средой выполнения ускорителя
//!
//! Каждый метод соответствует одному вызову OpenCL API и возвращает его код
//! состояния без интерпретации. Классификацию ошибок выполняет компонент,
//! которому принадлежит операция.

pub mod host;

use crate::opencl::types::cl_int;

/// Результат вызова среды выполнения: значение или код OpenCL
pub type Status<T> = std::result::Result<T, cl_int>;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub usize);
        )*
    };
}

handle!(
    /// Идентификатор платформы
    PlatformId,
    /// Идентификатор устройства
    DeviceId,
    ContextId,
    QueueId,
    ProgramId,
    KernelId,
    MemId,
);

/// Режим доступа ядра к буферу
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    pub global_mem_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Accelerator,
    Other,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Gpu => "GPU",
            DeviceType::Accelerator => "ACCELERATOR",
            DeviceType::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Объявленный вид параметра ядра
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    /// `__global`/`__constant` указатель, ожидает объект памяти
    Buffer,
    /// `__local` указатель
    Local,
    /// Скалярный параметр; ширина неизвестна для нераспознанных типов
    Scalar {
        type_name: String,
        width: Option<usize>,
    },
    /// Среда выполнения не сообщила сведения о параметре
    Unknown,
}

/// Значение, передаваемое в clSetKernelArg
#[derive(Debug, Clone, Copy)]
pub enum ArgValue<'a> {
    Mem(MemId),
    Bytes(&'a [u8]),
}

/// Ширина скалярного типа OpenCL C в байтах
pub fn scalar_width(type_name: &str) -> Option<usize> {
    let normalized = match type_name.trim() {
        "unsigned char" => "uchar",
        "unsigned short" => "ushort",
        "unsigned int" | "unsigned" => "uint",
        "unsigned long" => "ulong",
        other => other,
    };
    match normalized {
        "char" | "uchar" | "bool" => Some(1),
        "short" | "ushort" | "half" => Some(2),
        "int" | "uint" | "float" => Some(4),
        "long" | "ulong" | "double" => Some(8),
        "size_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t" => {
            Some(std::mem::size_of::<usize>())
        }
        _ => None,
    }
}

/// Среда выполнения ускорителя.
///
/// Объекты не разделяются между потоками: все вызовы идут из одного
/// управляющего потока, и каждый блокирует его до завершения.
pub trait Backend {
    fn name(&self) -> &str;

    fn platform_ids(&self) -> Status<Vec<PlatformId>>;
    fn platform_info(&self, platform: PlatformId) -> Status<PlatformInfo>;
    fn device_ids(&self, platform: PlatformId) -> Status<Vec<DeviceId>>;
    fn device_info(&self, device: DeviceId) -> Status<DeviceInfo>;

    fn create_context(&self, device: DeviceId) -> Status<ContextId>;
    fn create_queue(&self, context: ContextId, device: DeviceId) -> Status<QueueId>;

    fn create_program(&self, context: ContextId, source: &str) -> Status<ProgramId>;
    fn build_program(&self, program: ProgramId, device: DeviceId, options: &str) -> Status<()>;
    fn build_log(&self, program: ProgramId, device: DeviceId) -> Status<String>;

    fn create_kernel(&self, program: ProgramId, name: &str) -> Status<KernelId>;
    fn kernel_signature(&self, kernel: KernelId) -> Status<Vec<ArgKind>>;
    fn set_kernel_arg(&self, kernel: KernelId, index: u32, value: ArgValue<'_>) -> Status<()>;

    fn create_buffer(&self, context: ContextId, access: AccessMode, byte_length: usize) -> Status<MemId>;
    /// Блокирующая запись хост → устройство
    fn write_buffer(&self, queue: QueueId, mem: MemId, data: &[u8]) -> Status<()>;
    /// Блокирующее чтение устройство → хост
    fn read_buffer(&self, queue: QueueId, mem: MemId, out: &mut [u8]) -> Status<()>;

    /// Одномерный запуск ядра
    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, global: usize, local: usize) -> Status<()>;
    /// Ожидание завершения всех команд очереди
    fn finish(&self, queue: QueueId) -> Status<()>;

    fn release_mem(&self, mem: MemId) -> Status<()>;
    fn release_kernel(&self, kernel: KernelId) -> Status<()>;
    fn release_program(&self, program: ProgramId) -> Status<()>;
    fn release_queue(&self, queue: QueueId) -> Status<()>;
    fn release_context(&self, context: ContextId) -> Status<()>;
}
