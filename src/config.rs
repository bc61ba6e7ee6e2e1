//! Конфигурация конвейера
//!
//! Все параметры имеют значения по умолчанию, поэтому JSON-файл может
//! содержать только отличающиеся поля.

use crate::backend::host::HostBackend;
use crate::backend::Backend;
use crate::error::{ClError, Result};
use crate::opencl::OpenClBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Переменная окружения с путём к JSON-конфигурации
pub const CONFIG_ENV: &str = "OFFLOAD_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Путь к исходнику ядра OpenCL C
    pub kernel_path: PathBuf,
    /// Имя точки входа ядра
    pub entry_point: String,
    /// Опции clBuildProgram
    pub build_options: String,
    pub device: DeviceSelection,
    pub geometry: GeometryPolicy,
    pub backend: BackendConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from("kernel.cl"),
            entry_point: "vectorAdd".to_string(),
            build_options: "-cl-kernel-arg-info".to_string(),
            device: DeviceSelection::default(),
            geometry: GeometryPolicy::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Индексы платформы и устройства; по умолчанию первое устройство первой платформы
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelection {
    pub platform_index: usize,
    pub device_index: usize,
}

/// Политика выбора размеров запуска
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GeometryPolicy {
    /// global = n, local = 1
    #[default]
    PerElement,
    /// Группы до `preferred_local` элементов, остаток отсекается проверкой в ядре
    Grouped { preferred_local: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Системный ICD-загрузчик OpenCL
    OpenCl {
        #[serde(default)]
        library: Option<PathBuf>,
    },
    /// Хостовая эмуляция
    Host(HostConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::OpenCl { library: None }
    }
}

impl BackendConfig {
    /// Создаёт среду выполнения.
    ///
    /// Отсутствие библиотеки OpenCL означает, что платформ нет.
    pub fn connect(&self) -> Result<Box<dyn Backend>> {
        match self {
            BackendConfig::OpenCl { library } => {
                let backend = OpenClBackend::load(library.as_deref())?;
                Ok(Box::new(backend))
            }
            BackendConfig::Host(host) => Ok(Box::new(HostBackend::new(host.clone()))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub platforms: usize,
    pub devices_per_platform: usize,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    pub max_alloc_size: usize,
    pub global_mem_size: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            platforms: 1,
            devices_per_platform: 1,
            compute_units: 4,
            max_work_group_size: 1024,
            max_alloc_size: 256 << 20,
            global_mem_size: 1 << 30,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ClError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|err| ClError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Читает файл из `OFFLOAD_CONFIG`, иначе значения по умолчанию
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                log::info!("Конфигурация из {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_first_device_and_per_element_geometry() {
        let config = PipelineConfig::default();
        assert_eq!(config.device, DeviceSelection { platform_index: 0, device_index: 0 });
        assert_eq!(config.geometry, GeometryPolicy::PerElement);
        assert_eq!(config.kernel_path, PathBuf::from("kernel.cl"));
        assert_eq!(config.entry_point, "vectorAdd");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "kernel_path": "kernels/add.cl",
            "geometry": { "policy": "grouped", "preferred_local": 64 },
            "backend": { "kind": "host", "platforms": 0 }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kernel_path, PathBuf::from("kernels/add.cl"));
        assert_eq!(config.entry_point, "vectorAdd");
        assert_eq!(config.geometry, GeometryPolicy::Grouped { preferred_local: 64 });
        match config.backend {
            BackendConfig::Host(host) => {
                assert_eq!(host.platforms, 0);
                assert_eq!(host.devices_per_platform, 1);
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offload.json");
        std::fs::write(&path, r#"{ "kernel": "typo.cl" }"#).unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }
}
