//! Буферы памяти устройства

use super::session::ComputeSession;
use crate::backend::{AccessMode, MemId};
use crate::error::{ClError, Result};

/// Выделение памяти на устройстве.
///
/// Размер фиксируется при создании. Буфер ссылается на сессию, но не владеет
/// ею: заимствование гарантирует, что все буферы освобождаются раньше
/// объектов сессии.
pub struct DeviceBuffer<'s> {
    session: &'s ComputeSession<'s>,
    mem: Option<MemId>,
    byte_length: usize,
    access: AccessMode,
}

impl<'s> DeviceBuffer<'s> {
    pub fn allocate(session: &'s ComputeSession<'s>, byte_length: usize, access: AccessMode) -> Result<Self> {
        let mem = session
            .backend()
            .create_buffer(session.context_id(), access, byte_length)
            .map_err(|code| ClError::Allocation {
                requested: byte_length,
                code,
            })?;
        log::debug!("Создан буфер {:?}: {} байт, {:?}", mem, byte_length, access);
        Ok(Self {
            session,
            mem: Some(mem),
            byte_length,
            access,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn is_released(&self) -> bool {
        self.mem.is_none()
    }

    pub(crate) fn session(&self) -> &'s ComputeSession<'s> {
        self.session
    }

    pub(crate) fn mem(&self, op: &'static str) -> Result<MemId> {
        self.mem.ok_or(ClError::UseAfterRelease { op })
    }

    fn check_len(&self, op: &'static str, actual: usize) -> Result<()> {
        if actual != self.byte_length {
            return Err(ClError::TransferSize {
                op,
                expected: self.byte_length,
                actual,
            });
        }
        Ok(())
    }

    /// Блокирующее копирование хост → устройство; размер среза должен совпадать с буфером
    pub fn upload<T: bytemuck::Pod>(&self, host: &[T]) -> Result<()> {
        const OP: &str = "clEnqueueWriteBuffer";
        let mem = self.mem(OP)?;
        let bytes: &[u8] = bytemuck::cast_slice(host);
        self.check_len(OP, bytes.len())?;
        self.session
            .backend()
            .write_buffer(self.session.queue_id(), mem, bytes)
            .map_err(|code| ClError::Transfer { op: OP, code })
    }

    /// Блокирующее копирование устройство → хост.
    ///
    /// Запрещено, пока запущенное ядро не завершилось.
    pub fn download<T: bytemuck::Pod>(&self, host: &mut [T]) -> Result<()> {
        const OP: &str = "clEnqueueReadBuffer";
        let mem = self.mem(OP)?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(host);
        self.check_len(OP, bytes.len())?;
        if self.session.has_unretired_launch() {
            return Err(ClError::Unretired { op: OP });
        }
        self.session
            .backend()
            .read_buffer(self.session.queue_id(), mem, bytes)
            .map_err(|code| ClError::Transfer { op: OP, code })
    }

    /// Освобождает память устройства; повторный вызов ничего не делает
    pub fn release(&mut self) -> Result<()> {
        let Some(mem) = self.mem.take() else {
            return Ok(());
        };
        self.session
            .backend()
            .release_mem(mem)
            .map_err(|code| ClError::Transfer {
                op: "clReleaseMemObject",
                code,
            })?;
        log::debug!("Освобождён буфер {:?}", mem);
        Ok(())
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("{}", err);
        }
    }
}

impl std::fmt::Debug for DeviceBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("mem", &self.mem)
            .field("byte_length", &self.byte_length)
            .field("access", &self.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostBackend;
    use crate::compute::PlatformDirectory;
    use crate::config::{DeviceSelection, HostConfig};
    use crate::opencl::types::CL_INVALID_BUFFER_SIZE;
    use crate::ErrorKind;

    fn with_session(config: HostConfig, test: impl FnOnce(&HostBackend, &ComputeSession<'_>)) {
        let backend = HostBackend::new(config);
        let directory = PlatformDirectory::discover(&backend).unwrap();
        let device = directory.select(&DeviceSelection::default()).unwrap();
        let session = ComputeSession::open(&backend, device).unwrap();
        test(&backend, &session);
    }

    #[test]
    fn upload_then_download_returns_same_values() {
        with_session(HostConfig::default(), |_, session| {
            let buffer = DeviceBuffer::allocate(session, 12, AccessMode::ReadWrite).unwrap();
            buffer.upload(&[1.5f32, 2.5, -3.0]).unwrap();
            let mut out = [0.0f32; 3];
            buffer.download(&mut out).unwrap();
            assert_eq!(out, [1.5, 2.5, -3.0]);
        });
    }

    #[test]
    fn zero_length_allocation_fails() {
        with_session(HostConfig::default(), |_, session| {
            let err = DeviceBuffer::allocate(session, 0, AccessMode::ReadOnly).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Allocation);
            assert_eq!(err.status_code(), Some(CL_INVALID_BUFFER_SIZE));
        });
    }

    #[test]
    fn allocation_beyond_device_memory_fails() {
        let config = HostConfig {
            global_mem_size: 64,
            ..HostConfig::default()
        };
        with_session(config, |_, session| {
            let _first = DeviceBuffer::allocate(session, 48, AccessMode::ReadOnly).unwrap();
            let err = DeviceBuffer::allocate(session, 32, AccessMode::ReadOnly).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Allocation);
        });
    }

    #[test]
    fn length_mismatch_is_transfer_error() {
        with_session(HostConfig::default(), |_, session| {
            let buffer = DeviceBuffer::allocate(session, 16, AccessMode::ReadWrite).unwrap();
            let err = buffer.upload(&[1.0f32, 2.0, 3.0]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transfer);
            let mut out = [0.0f32; 5];
            let err = buffer.download(&mut out).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transfer);
        });
    }

    #[test]
    fn released_buffer_rejects_every_operation() {
        with_session(HostConfig::default(), |backend, session| {
            let live_before = backend.live_objects();
            let mut buffer = DeviceBuffer::allocate(session, 8, AccessMode::ReadWrite).unwrap();
            buffer.release().unwrap();
            buffer.release().unwrap();
            assert!(buffer.is_released());
            assert_eq!(backend.live_objects(), live_before);

            let err = buffer.upload(&[0.0f32, 0.0]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UseAfterRelease);
            let mut out = [0.0f32; 2];
            let err = buffer.download(&mut out).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UseAfterRelease);
            assert_eq!(out, [0.0, 0.0]);

            // Остальные объекты не затронуты
            let other = DeviceBuffer::allocate(session, 8, AccessMode::ReadWrite).unwrap();
            other.upload(&[4.0f32, 5.0]).unwrap();
        });
    }

    #[test]
    fn drop_releases_device_memory() {
        with_session(HostConfig::default(), |backend, session| {
            let live_before = backend.live_objects();
            {
                let _buffer = DeviceBuffer::allocate(session, 8, AccessMode::ReadOnly).unwrap();
                assert_eq!(backend.live_objects(), live_before + 1);
            }
            assert_eq!(backend.live_objects(), live_before);
            assert_eq!(backend.release_log().last().map(String::as_str), Some("mem"));
        });
    }
}
