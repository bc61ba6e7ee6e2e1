//! Поиск платформ и устройств

use crate::backend::{Backend, DeviceId, DeviceInfo, PlatformId, PlatformInfo};
use crate::config::DeviceSelection;
use crate::error::{ClError, Result};
use crate::opencl::types::{CL_DEVICE_NOT_FOUND, CL_PLATFORM_NOT_FOUND_KHR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub info: DeviceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDescriptor {
    pub id: PlatformId,
    pub info: PlatformInfo,
    pub devices: Vec<DeviceDescriptor>,
}

/// Снимок платформ и устройств, неизменяемый после обнаружения
#[derive(Debug, Clone)]
pub struct PlatformDirectory {
    platforms: Vec<PlatformDescriptor>,
}

impl PlatformDirectory {
    /// Перечисляет платформы и их устройства в порядке, сообщённом средой выполнения
    pub fn discover(backend: &dyn Backend) -> Result<Self> {
        let discovery = |op| move |code| ClError::Discovery { op, code };

        let ids = backend.platform_ids().map_err(discovery("clGetPlatformIDs"))?;
        if ids.is_empty() {
            return Err(ClError::Discovery {
                op: "clGetPlatformIDs",
                code: CL_PLATFORM_NOT_FOUND_KHR,
            });
        }

        let mut platforms = Vec::with_capacity(ids.len());
        for id in ids {
            let info = backend.platform_info(id).map_err(discovery("clGetPlatformInfo"))?;
            let devices = backend
                .device_ids(id)
                .map_err(discovery("clGetDeviceIDs"))?
                .into_iter()
                .map(|device| {
                    let info = backend.device_info(device).map_err(discovery("clGetDeviceInfo"))?;
                    Ok(DeviceDescriptor { id: device, info })
                })
                .collect::<Result<Vec<_>>>()?;
            log::debug!("Платформа {}: {} устройств", info.name, devices.len());
            platforms.push(PlatformDescriptor { id, info, devices });
        }

        log::info!("Найдено платформ: {}", platforms.len());
        Ok(Self { platforms })
    }

    pub fn platforms(&self) -> &[PlatformDescriptor] {
        &self.platforms
    }

    /// Возвращает устройство по индексам.
    ///
    /// По умолчанию берётся первое устройство первой платформы; выбор по
    /// характеристикам устройства не выполняется.
    pub fn select(&self, selection: &DeviceSelection) -> Result<&DeviceDescriptor> {
        let platform = self.platforms.get(selection.platform_index).ok_or(ClError::Discovery {
            op: "clGetPlatformIDs",
            code: CL_PLATFORM_NOT_FOUND_KHR,
        })?;
        let device = platform.devices.get(selection.device_index).ok_or(ClError::Discovery {
            op: "clGetDeviceIDs",
            code: CL_DEVICE_NOT_FOUND,
        })?;
        log::info!(
            "Выбрано устройство {} ({}) на платформе {}",
            device.info.name,
            device.info.device_type,
            platform.info.name
        );
        Ok(device)
    }
}
