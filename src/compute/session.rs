//! Сессия вычислений: контекст, очередь, программа и ядра
//!
//! Каждый объект OpenCL обёрнут в охранника, освобождающего его в `Drop`.
//! Поля `ComputeSession` объявлены в порядке, обратном порядку создания,
//! поэтому освобождение идёт ядра → программа → очередь → контекст как при
//! нормальном завершении, так и при ошибке на середине инициализации.

use super::platform::DeviceDescriptor;
use crate::backend::{ArgKind, Backend, ContextId, KernelId, ProgramId, QueueId};
use crate::error::{ClError, Result};
use crate::opencl::types::{CL_BUILD_PROGRAM_FAILURE, CL_INVALID_KERNEL_NAME};
use std::cell::Cell;

macro_rules! guard {
    ($name:ident, $id:ty, $release:ident, $label:literal) => {
        pub(crate) struct $name<'b> {
            backend: &'b dyn Backend,
            id: $id,
        }

        impl Drop for $name<'_> {
            fn drop(&mut self) {
                if let Err(code) = self.backend.$release(self.id) {
                    log::warn!("Освобождение {} завершилось ошибкой {}", $label, code);
                } else {
                    log::debug!("Освобождён {} {:?}", $label, self.id);
                }
            }
        }
    };
}

guard!(ContextGuard, ContextId, release_context, "context");
guard!(QueueGuard, QueueId, release_queue, "queue");
guard!(ProgramGuard, ProgramId, release_program, "program");
guard!(KernelGuard, KernelId, release_kernel, "kernel");

/// Дескриптор ядра, полученный из `lookup_kernel`.
///
/// Сам объект ядра принадлежит сессии; дескриптор лишь ссылается на него.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle {
    pub(crate) slot: usize,
    pub(crate) id: KernelId,
    arity: u32,
}

impl KernelHandle {
    /// Число объявленных параметров ядра
    pub fn arity(&self) -> u32 {
        self.arity
    }
}

struct KernelEntry<'b> {
    name: String,
    signature: Vec<ArgKind>,
    guard: KernelGuard<'b>,
}

pub struct ComputeSession<'b> {
    // Порядок полей = порядок освобождения
    kernels: Vec<KernelEntry<'b>>,
    program: Option<ProgramGuard<'b>>,
    queue: QueueGuard<'b>,
    context: ContextGuard<'b>,
    device: DeviceDescriptor,
    backend: &'b dyn Backend,
    build_options: String,
    /// Запущено ядро, завершение которого ещё не дождались
    in_flight: Cell<bool>,
}

impl<'b> ComputeSession<'b> {
    /// Создаёт контекст и очередь команд для устройства
    pub fn open(backend: &'b dyn Backend, device: &DeviceDescriptor) -> Result<Self> {
        let context = ContextGuard {
            backend,
            id: backend.create_context(device.id).map_err(|code| ClError::Context {
                op: "clCreateContext",
                code,
            })?,
        };
        log::debug!("Создан контекст {:?}", context.id);

        // При ошибке контекст освобождается охранником
        let queue = QueueGuard {
            backend,
            id: backend
                .create_queue(context.id, device.id)
                .map_err(|code| ClError::Context {
                    op: "clCreateCommandQueue",
                    code,
                })?,
        };
        log::debug!("Создана очередь команд {:?}", queue.id);

        Ok(Self {
            kernels: Vec::new(),
            program: None,
            queue,
            context,
            device: device.clone(),
            backend,
            build_options: String::new(),
            in_flight: Cell::new(false),
        })
    }

    /// Компилирует программу.
    ///
    /// Блокирует до завершения компилятора. Повторная компиляция освобождает
    /// прежние ядра и программу.
    pub fn compile(&mut self, source: &str, entry_point: &str) -> Result<()> {
        log::info!("Компиляция OpenCL программы (точка входа {})...", entry_point);
        self.kernels.clear();
        self.program = None;

        let program = ProgramGuard {
            backend: self.backend,
            id: self
                .backend
                .create_program(self.context.id, source)
                .map_err(|code| ClError::Compile {
                    op: "clCreateProgramWithSource",
                    code,
                    log: None,
                })?,
        };

        if let Err(code) = self.backend.build_program(program.id, self.device.id, &self.build_options) {
            let log = match self.backend.build_log(program.id, self.device.id) {
                Ok(log) => Some(log),
                Err(log_code) => {
                    log::warn!("Лог сборки недоступен: {}", log_code);
                    None
                }
            };
            return Err(ClError::Compile {
                op: "clBuildProgram",
                code,
                log,
            });
        }

        self.program = Some(program);
        Ok(())
    }

    /// Создаёт ядро по имени точки входа; повторный запрос возвращает тот же дескриптор
    pub fn lookup_kernel(&mut self, entry_point: &str) -> Result<KernelHandle> {
        if let Some(slot) = self.kernels.iter().position(|k| k.name == entry_point) {
            return Ok(self.handle(slot));
        }
        let program = self.program.as_ref().ok_or_else(|| ClError::KernelNotFound {
            name: entry_point.to_string(),
            code: CL_BUILD_PROGRAM_FAILURE,
        })?;

        let guard = KernelGuard {
            backend: self.backend,
            id: self
                .backend
                .create_kernel(program.id, entry_point)
                .map_err(|code| ClError::KernelNotFound {
                    name: entry_point.to_string(),
                    code,
                })?,
        };
        let signature = self
            .backend
            .kernel_signature(guard.id)
            .map_err(|code| ClError::KernelNotFound {
                name: entry_point.to_string(),
                code,
            })?;
        log::debug!("Ядро {}: {} параметров", entry_point, signature.len());

        self.kernels.push(KernelEntry {
            name: entry_point.to_string(),
            signature,
            guard,
        });
        Ok(self.handle(self.kernels.len() - 1))
    }

    fn handle(&self, slot: usize) -> KernelHandle {
        let entry = &self.kernels[slot];
        KernelHandle {
            slot,
            id: entry.guard.id,
            arity: entry.signature.len() as u32,
        }
    }

    /// Опции clBuildProgram для последующих `compile`
    pub fn set_build_options(&mut self, options: &str) {
        self.build_options = options.to_string();
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn backend(&self) -> &'b dyn Backend {
        self.backend
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.context.id
    }

    pub(crate) fn queue_id(&self) -> QueueId {
        self.queue.id
    }

    /// Сигнатура ядра; `None`, если дескриптор не принадлежит этой сессии
    pub(crate) fn signature(&self, kernel: KernelHandle) -> Option<&[ArgKind]> {
        self.kernels
            .get(kernel.slot)
            .filter(|entry| entry.guard.id == kernel.id)
            .map(|entry| entry.signature.as_slice())
    }

    pub(crate) fn set_in_flight(&self, value: bool) {
        self.in_flight.set(value);
    }

    /// Есть ли запущенное, но не дождавшееся завершения ядро
    pub fn has_unretired_launch(&self) -> bool {
        self.in_flight.get()
    }

    pub(crate) fn unknown_kernel(name: &str) -> ClError {
        ClError::KernelNotFound {
            name: name.to_string(),
            code: CL_INVALID_KERNEL_NAME,
        }
    }
}
