//! Привязка аргументов, размеры запуска и выполнение ядра

use super::buffer::DeviceBuffer;
use super::session::{ComputeSession, KernelHandle};
use crate::backend::{ArgKind, ArgValue};
use crate::error::{ClError, Result};
use crate::opencl::types::{cl_int, CL_INVALID_KERNEL_ARGS, CL_INVALID_MEM_OBJECT, CL_INVALID_WORK_GROUP_SIZE};
use crate::utils::measure_time;
use std::collections::HashMap;

/// Размеры одномерного запуска
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub global_work_size: usize,
    pub local_work_size: usize,
}

impl LaunchGeometry {
    /// Один work-item на элемент, группы по одному элементу.
    ///
    /// Всегда допустимо, но не использует локальную память групп.
    pub fn per_element(total_elements: usize) -> Self {
        Self {
            global_work_size: total_elements,
            local_work_size: 1,
        }
    }

    /// Группы размером не больше `min(preferred_local, device_max)`.
    ///
    /// Берётся наибольший делитель `total_elements` из верхней половины этого
    /// предела; если его нет, global округляется вверх до кратного пределу,
    /// а лишние work-item отсекаются проверкой `id < n` внутри ядра.
    pub fn grouped(total_elements: usize, preferred_local: usize, device_max: usize) -> Self {
        if total_elements == 0 {
            return Self::per_element(0);
        }
        let cap = preferred_local.min(device_max).min(total_elements).max(1);
        let floor = cap.div_ceil(2);
        if let Some(local) = (floor..=cap).rev().find(|d| total_elements % d == 0) {
            return Self {
                global_work_size: total_elements,
                local_work_size: local,
            };
        }
        Self {
            global_work_size: total_elements.div_ceil(cap) * cap,
            local_work_size: cap,
        }
    }
}

/// Скалярный аргумент ядра
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarArg {
    U32(u32),
    I32(i32),
    F32(f32),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl ScalarArg {
    pub fn to_ne_bytes(self) -> Vec<u8> {
        match self {
            ScalarArg::U32(v) => v.to_ne_bytes().to_vec(),
            ScalarArg::I32(v) => v.to_ne_bytes().to_vec(),
            ScalarArg::F32(v) => v.to_ne_bytes().to_vec(),
            ScalarArg::U64(v) => v.to_ne_bytes().to_vec(),
            ScalarArg::I64(v) => v.to_ne_bytes().to_vec(),
            ScalarArg::F64(v) => v.to_ne_bytes().to_vec(),
        }
    }

    pub fn width(self) -> usize {
        match self {
            ScalarArg::U32(_) | ScalarArg::I32(_) | ScalarArg::F32(_) => 4,
            ScalarArg::U64(_) | ScalarArg::I64(_) | ScalarArg::F64(_) => 8,
        }
    }
}

/// Аргумент для `Dispatcher::bind`
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    Buffer(&'a DeviceBuffer<'a>),
    Scalar(ScalarArg),
}

impl<'a> From<&'a DeviceBuffer<'a>> for KernelArg<'a> {
    fn from(buffer: &'a DeviceBuffer<'a>) -> Self {
        KernelArg::Buffer(buffer)
    }
}

impl From<u32> for KernelArg<'_> {
    fn from(value: u32) -> Self {
        KernelArg::Scalar(ScalarArg::U32(value))
    }
}

impl From<f32> for KernelArg<'_> {
    fn from(value: f32) -> Self {
        KernelArg::Scalar(ScalarArg::F32(value))
    }
}

/// Привязывает аргументы и запускает ядра сессии.
///
/// Только ссылается на буферы: пока диспетчер жив, привязанные буферы нельзя
/// освободить.
pub struct Dispatcher<'a> {
    session: &'a ComputeSession<'a>,
    bindings: HashMap<KernelHandle, Vec<Option<KernelArg<'a>>>>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(session: &'a ComputeSession<'a>) -> Self {
        Self {
            session,
            bindings: HashMap::new(),
        }
    }

    /// Политика по умолчанию: global = n, local = 1
    pub fn compute_geometry(total_elements: usize) -> LaunchGeometry {
        LaunchGeometry::per_element(total_elements)
    }

    /// Группы до `min(preferred_local, device_max)`, см. `LaunchGeometry::grouped`
    pub fn compute_grouped_geometry(total_elements: usize, preferred_local: usize, device_max: usize) -> LaunchGeometry {
        LaunchGeometry::grouped(total_elements, preferred_local, device_max)
    }

    fn signature(&self, kernel: KernelHandle) -> Result<&'a [ArgKind]> {
        self.session
            .signature(kernel)
            .ok_or_else(|| ComputeSession::unknown_kernel(&format!("{:?}", kernel.id)))
    }

    fn check(&self, index: u32, declared: &ArgKind, arg: &KernelArg<'a>) -> Result<()> {
        let mismatch = |reason: String| ClError::ArgumentBinding { index, reason };
        match (declared, arg) {
            (ArgKind::Local, _) => Err(mismatch("local memory arguments are not supported".to_string())),
            (ArgKind::Buffer | ArgKind::Unknown, KernelArg::Buffer(buffer)) => {
                buffer.mem("clSetKernelArg")?;
                if !std::ptr::eq(buffer.session(), self.session) {
                    return Err(mismatch("buffer belongs to another session".to_string()));
                }
                Ok(())
            }
            (ArgKind::Scalar { type_name, width: Some(width) }, KernelArg::Scalar(scalar)) => {
                if scalar.width() != *width {
                    return Err(mismatch(format!(
                        "scalar is {} bytes, kernel declares {} ({} bytes)",
                        scalar.width(),
                        type_name,
                        width
                    )));
                }
                Ok(())
            }
            (ArgKind::Scalar { width: None, .. } | ArgKind::Unknown, KernelArg::Scalar(_)) => Ok(()),
            (ArgKind::Buffer, KernelArg::Scalar(_)) => {
                Err(mismatch("kernel declares a buffer, got a scalar".to_string()))
            }
            (ArgKind::Scalar { type_name, .. }, KernelArg::Buffer(_)) => {
                Err(mismatch(format!("kernel declares {}, got a buffer", type_name)))
            }
        }
    }

    fn apply(&self, kernel: KernelHandle, index: u32, arg: &KernelArg<'a>) -> std::result::Result<(), cl_int> {
        let bytes;
        let value = match arg {
            KernelArg::Buffer(buffer) => {
                ArgValue::Mem(buffer.mem("clSetKernelArg").map_err(|_| CL_INVALID_MEM_OBJECT)?)
            }
            KernelArg::Scalar(scalar) => {
                bytes = scalar.to_ne_bytes();
                ArgValue::Bytes(&bytes)
            }
        };
        self.session.backend().set_kernel_arg(kernel.id, index, value)
    }

    /// Возвращает среде выполнения прежние значения уже переписанных индексов
    fn restore(&self, kernel: KernelHandle, overwritten: &[(u32, KernelArg<'a>)]) {
        let Some(slots) = self.bindings.get(&kernel) else {
            return;
        };
        for (index, _) in overwritten {
            if let Some(previous) = slots[*index as usize] {
                if let Err(code) = self.apply(kernel, *index, &previous) {
                    log::warn!("Не удалось восстановить аргумент {} ядра {:?}: {}", index, kernel.id, code);
                }
            }
        }
    }

    /// Привязывает аргументы ядра по индексам.
    ///
    /// Всё или ничего: список проверяется целиком до первого clSetKernelArg,
    /// а если среда выполнения отвергнет аргумент на середине, уже
    /// переписанные индексы получают прежние значения и учёт привязок не
    /// меняется.
    pub fn bind(&mut self, kernel: KernelHandle, args: &[(u32, KernelArg<'a>)]) -> Result<()> {
        let signature = self.signature(kernel)?;
        let arity = signature.len();

        let mut seen = vec![false; arity];
        for (index, arg) in args {
            let declared = signature.get(*index as usize).ok_or_else(|| ClError::ArgumentBinding {
                index: *index,
                reason: format!("index exceeds kernel arity {}", arity),
            })?;
            if std::mem::replace(&mut seen[*index as usize], true) {
                return Err(ClError::ArgumentBinding {
                    index: *index,
                    reason: "argument bound twice in one call".to_string(),
                });
            }
            self.check(*index, declared, arg)?;
        }

        for (applied, (index, arg)) in args.iter().enumerate() {
            if let Err(code) = self.apply(kernel, *index, arg) {
                self.restore(kernel, &args[..applied]);
                return Err(ClError::ArgumentBinding {
                    index: *index,
                    reason: format!("status {}", code),
                });
            }
        }

        let slots = self.bindings.entry(kernel).or_insert_with(|| vec![None; arity]);
        for (index, arg) in args {
            slots[*index as usize] = Some(*arg);
        }
        log::debug!("Привязано {} аргументов ядра {:?}", args.len(), kernel.id);
        Ok(())
    }

    /// Индексы аргументов, привязанных к ядру
    pub fn bound_indices(&self, kernel: KernelHandle) -> Vec<u32> {
        self.bindings
            .get(&kernel)
            .map(|slots| {
                slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_some())
                    .map(|(i, _)| i as u32)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Запускает ядро и блокирует до его завершения (clFinish).
    ///
    /// Чтение буферов разрешено только после возврата из этого метода.
    pub fn launch(&mut self, kernel: KernelHandle, geometry: LaunchGeometry) -> Result<()> {
        const ENQUEUE: &str = "clEnqueueNDRangeKernel";
        let arity = self.signature(kernel)?.len();

        let complete = match self.bindings.get(&kernel) {
            Some(slots) => slots.iter().all(Option::is_some),
            None => arity == 0,
        };
        if !complete {
            return Err(ClError::Launch {
                op: ENQUEUE,
                code: CL_INVALID_KERNEL_ARGS,
            });
        }
        for arg in self.bindings.get(&kernel).into_iter().flatten().flatten() {
            if let KernelArg::Buffer(buffer) = arg {
                buffer.mem(ENQUEUE)?;
            }
        }

        let LaunchGeometry {
            global_work_size: global,
            local_work_size: local,
        } = geometry;
        let max_local = self.session.device().info.max_work_group_size;
        if local == 0 || local > max_local || global % local != 0 {
            log::error!(
                "Недопустимые размеры запуска: global {}, local {}, максимум группы {}",
                global,
                local,
                max_local
            );
            return Err(ClError::Launch {
                op: ENQUEUE,
                code: CL_INVALID_WORK_GROUP_SIZE,
            });
        }

        let backend = self.session.backend();
        let queue = self.session.queue_id();
        let (status, elapsed) = measure_time(|| -> std::result::Result<(), (&'static str, cl_int)> {
            if global > 0 {
                self.session.set_in_flight(true);
                backend
                    .enqueue_kernel(queue, kernel.id, global, local)
                    .map_err(|code| (ENQUEUE, code))?;
            }
            backend.finish(queue).map_err(|code| ("clFinish", code))
        });

        match status {
            Ok(()) => {
                self.session.set_in_flight(false);
                log::info!("Ядро выполнено за {:?} (global {}, local {})", elapsed, global, local);
                Ok(())
            }
            Err((op, code)) => {
                // Ядро не поставлено в очередь, чтение безопасно
                if op == ENQUEUE {
                    self.session.set_in_flight(false);
                }
                Err(ClError::Launch { op, code })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostBackend;
    use crate::backend::AccessMode;
    use crate::compute::PlatformDirectory;
    use crate::config::{DeviceSelection, HostConfig};
    use crate::matrix::{VECTOR_ADD_ENTRY, VECTOR_ADD_KERNEL};
    use crate::opencl::types::{CL_INVALID_ARG_VALUE, CL_OUT_OF_RESOURCES};
    use crate::ErrorKind;

    fn open(backend: &HostBackend) -> (ComputeSession<'_>, KernelHandle) {
        let directory = PlatformDirectory::discover(backend).unwrap();
        let device = directory.select(&DeviceSelection::default()).unwrap();
        let mut session = ComputeSession::open(backend, device).unwrap();
        session.compile(VECTOR_ADD_KERNEL, VECTOR_ADD_ENTRY).unwrap();
        let kernel = session.lookup_kernel(VECTOR_ADD_ENTRY).unwrap();
        (session, kernel)
    }

    fn operands<'s>(session: &'s ComputeSession<'s>) -> [DeviceBuffer<'s>; 3] {
        let a = DeviceBuffer::allocate(session, 16, AccessMode::ReadOnly).unwrap();
        let b = DeviceBuffer::allocate(session, 16, AccessMode::ReadOnly).unwrap();
        let c = DeviceBuffer::allocate(session, 16, AccessMode::WriteOnly).unwrap();
        a.upload(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        b.upload(&[5.0f32, 6.0, 7.0, 8.0]).unwrap();
        [a, b, c]
    }

    #[test]
    fn per_element_geometry_covers_every_element() {
        for n in [0usize, 1, 1024, 1 << 24] {
            let geometry = Dispatcher::compute_geometry(n);
            assert_eq!(geometry.global_work_size, n);
            assert_eq!(geometry.local_work_size, 1);
        }
    }

    #[test]
    fn grouped_geometry_respects_limits() {
        assert_eq!(LaunchGeometry::grouped(0, 64, 1024), LaunchGeometry::per_element(0));
        assert_eq!(
            LaunchGeometry::grouped(1000, 64, 1024),
            LaunchGeometry { global_work_size: 1000, local_work_size: 50 }
        );
        assert_eq!(
            LaunchGeometry::grouped(1009, 64, 1024),
            LaunchGeometry { global_work_size: 1024, local_work_size: 64 }
        );
        assert_eq!(
            LaunchGeometry::grouped(3, 64, 1024),
            LaunchGeometry { global_work_size: 3, local_work_size: 3 }
        );

        for n in [1usize, 7, 255, 4096, 100_003] {
            let g = LaunchGeometry::grouped(n, 256, 128);
            assert!(g.global_work_size >= n);
            assert!(g.local_work_size >= 1 && g.local_work_size <= 128);
            assert_eq!(g.global_work_size % g.local_work_size, 0);
        }
    }

    #[test]
    fn bound_kernel_adds_vectors() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);

        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 4u32.into())])
            .unwrap();
        dispatcher.launch(kernel, Dispatcher::compute_geometry(4)).unwrap();

        let mut out = [0.0f32; 4];
        c.download(&mut out).unwrap();
        assert_eq!(out, [6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn out_of_range_index_binds_nothing() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, _c] = operands(&session);

        let mut dispatcher = Dispatcher::new(&session);
        let err = dispatcher
            .bind(kernel, &[(0, KernelArg::Buffer(&a)), (7, KernelArg::Buffer(&b))])
            .unwrap_err();
        assert!(matches!(err, ClError::ArgumentBinding { index: 7, .. }));
        assert!(dispatcher.bound_indices(kernel).is_empty());

        let err = dispatcher.launch(kernel, Dispatcher::compute_geometry(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert_eq!(err.status_code(), Some(CL_INVALID_KERNEL_ARGS));
    }

    #[test]
    fn scalar_width_and_kind_are_checked() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, _b, _c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);

        let err = dispatcher
            .bind(kernel, &[(3, KernelArg::Scalar(ScalarArg::U64(4)))])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentBinding);

        let err = dispatcher.bind(kernel, &[(3, KernelArg::Buffer(&a))]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentBinding);

        let err = dispatcher.bind(kernel, &[(0, 1.0f32.into())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentBinding);
        assert!(dispatcher.bound_indices(kernel).is_empty());
    }

    #[test]
    fn buffer_from_other_session_is_rejected() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let (other, _) = open(&backend);
        let foreign = DeviceBuffer::allocate(&other, 16, AccessMode::ReadOnly).unwrap();

        let mut dispatcher = Dispatcher::new(&session);
        let err = dispatcher.bind(kernel, &[(0, KernelArg::Buffer(&foreign))]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentBinding);
    }

    #[test]
    fn runtime_rejection_keeps_previous_bindings() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 4u32.into())])
            .unwrap();
        assert_eq!(dispatcher.bound_indices(kernel), vec![0, 1, 2, 3]);

        backend.inject_failure("clSetKernelArg", CL_INVALID_ARG_VALUE);
        let err = dispatcher.bind(kernel, &[(0, (&b).into())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentBinding);
        assert_eq!(dispatcher.bound_indices(kernel), vec![0, 1, 2, 3]);

        dispatcher.launch(kernel, Dispatcher::compute_geometry(4)).unwrap();
        let mut out = [0.0f32; 4];
        c.download(&mut out).unwrap();
        assert_eq!(out, [6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn rejection_midway_restores_overwritten_arguments() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 4u32.into())])
            .unwrap();

        // Индекс 0 переписан, индекс 1 отвергнут
        let replacement = DeviceBuffer::allocate(&session, 16, AccessMode::ReadOnly).unwrap();
        replacement.upload(&[100.0f32; 4]).unwrap();
        backend.inject_failure_after("clSetKernelArg", 1, CL_INVALID_ARG_VALUE);
        let err = dispatcher
            .bind(kernel, &[(0, (&replacement).into()), (1, (&replacement).into())])
            .unwrap_err();
        assert!(matches!(err, ClError::ArgumentBinding { index: 1, .. }));
        assert_eq!(dispatcher.bound_indices(kernel), vec![0, 1, 2, 3]);

        dispatcher.launch(kernel, Dispatcher::compute_geometry(4)).unwrap();
        let mut out = [0.0f32; 4];
        c.download(&mut out).unwrap();
        assert_eq!(out, [6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn failed_finish_keeps_results_unreadable() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 4u32.into())])
            .unwrap();

        backend.inject_failure("clFinish", CL_OUT_OF_RESOURCES);
        let err = dispatcher.launch(kernel, Dispatcher::compute_geometry(4)).unwrap_err();
        assert!(matches!(err, ClError::Launch { op: "clFinish", code: CL_OUT_OF_RESOURCES }));
        assert!(session.has_unretired_launch());

        let mut out = [0.0f32; 4];
        let err = c.download(&mut out).unwrap_err();
        assert!(matches!(err, ClError::Unretired { .. }));
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn failed_enqueue_leaves_buffers_readable() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 4u32.into())])
            .unwrap();

        backend.inject_failure("clEnqueueNDRangeKernel", CL_OUT_OF_RESOURCES);
        let err = dispatcher.launch(kernel, Dispatcher::compute_geometry(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert!(!session.has_unretired_launch());

        let mut out = [1.0f32; 4];
        c.download(&mut out).unwrap();
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn oversized_work_group_is_rejected_before_enqueue() {
        let backend = HostBackend::new(HostConfig {
            max_work_group_size: 2,
            ..HostConfig::default()
        });
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 4u32.into())])
            .unwrap();

        let geometry = LaunchGeometry { global_work_size: 4, local_work_size: 4 };
        let err = dispatcher.launch(kernel, geometry).unwrap_err();
        assert_eq!(err.status_code(), Some(CL_INVALID_WORK_GROUP_SIZE));
        assert!(!session.has_unretired_launch());
    }

    #[test]
    fn empty_launch_completes_without_enqueue() {
        let backend = HostBackend::default();
        let (session, kernel) = open(&backend);
        let [a, b, c] = operands(&session);
        let mut dispatcher = Dispatcher::new(&session);
        dispatcher
            .bind(kernel, &[(0, (&a).into()), (1, (&b).into()), (2, (&c).into()), (3, 0u32.into())])
            .unwrap();
        dispatcher.launch(kernel, Dispatcher::compute_geometry(0)).unwrap();
        assert!(!session.has_unretired_launch());
    }
}
