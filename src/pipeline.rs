//! Сложение двух матриц на устройстве от файлов до файла
//!
//! Порядок захвата: контекст → очередь → программа → ядро → буферы.
//! Локальные переменные объявлены в том же порядке, поэтому при любой
//! ошибке объекты освобождаются в обратном.

use crate::backend::{AccessMode, Backend};
use crate::compute::{ComputeSession, DeviceBuffer, Dispatcher, KernelArg, LaunchGeometry, PlatformDirectory};
use crate::config::{GeometryPolicy, PipelineConfig};
use crate::error::{ClError, Result};
use crate::matrix::{codec, cpu_vector_add, Matrix, Shape};
use std::path::Path;

/// Входы, результат устройства и эталон CPU
#[derive(Debug, Clone)]
pub struct VectorAddReport {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub expected: Matrix,
}

/// Пути к файлам операндов и результата
#[derive(Debug, Clone, Copy)]
pub struct VectorAddPaths<'p> {
    pub input0: &'p Path,
    pub input1: &'p Path,
    pub output: &'p Path,
}

/// Шаблон результата: существующий файл должен иметь форму операндов
fn output_template(path: &Path, shape: Shape) -> Result<Matrix> {
    if !path.exists() {
        log::debug!("{} не существует, используется форма операндов", path.display());
        return Ok(Matrix::zeros(shape));
    }
    let template = codec::load(path)?;
    if template.shape() != shape {
        return Err(ClError::ShapeMismatch {
            what: format!("output {}", path.display()),
            expected: shape,
            found: template.shape(),
        });
    }
    Ok(template)
}

fn geometry(policy: GeometryPolicy, elements: usize, device_max: usize) -> LaunchGeometry {
    match policy {
        GeometryPolicy::PerElement => Dispatcher::compute_geometry(elements),
        GeometryPolicy::Grouped { preferred_local } => {
            Dispatcher::compute_grouped_geometry(elements, preferred_local, device_max)
        }
    }
}

/// Складывает матрицы из `paths.input0` и `paths.input1` на устройстве.
///
/// Файл результата записывается только при успехе всех шагов.
pub fn run_vector_add(
    backend: &dyn Backend,
    config: &PipelineConfig,
    paths: VectorAddPaths<'_>,
) -> Result<VectorAddReport> {
    let a = codec::load(paths.input0)?;
    let b = codec::load(paths.input1)?;
    add_loaded(backend, config, paths, a, b)
}

/// То же, что `run_vector_add`, для уже прочитанных операндов.
///
/// `paths.input0` и `paths.input1` нужны только для сообщений об ошибках.
pub fn add_loaded(
    backend: &dyn Backend,
    config: &PipelineConfig,
    paths: VectorAddPaths<'_>,
    a: Matrix,
    b: Matrix,
) -> Result<VectorAddReport> {
    if a.shape() != b.shape() {
        return Err(ClError::ShapeMismatch {
            what: format!("input {}", paths.input1.display()),
            expected: a.shape(),
            found: b.shape(),
        });
    }
    let mut c = output_template(paths.output, a.shape())?;
    let n = u32::try_from(a.len()).map_err(|_| ClError::Format {
        path: paths.input0.to_path_buf(),
        reason: format!("{} elements exceed the kernel's uint count", a.len()),
    })?;

    let source = std::fs::read_to_string(&config.kernel_path).map_err(|source| ClError::Load {
        path: config.kernel_path.clone(),
        source,
    })?;

    log::info!("Поиск платформ через {}", backend.name());
    let directory = PlatformDirectory::discover(backend)?;
    let device = directory.select(&config.device)?;

    let mut session = ComputeSession::open(backend, device)?;
    session.set_build_options(&config.build_options);
    session.compile(&source, &config.entry_point)?;
    let kernel = session.lookup_kernel(&config.entry_point)?;
    let session = session;

    let a_buf = DeviceBuffer::allocate(&session, a.byte_len(), AccessMode::ReadOnly)?;
    let b_buf = DeviceBuffer::allocate(&session, b.byte_len(), AccessMode::ReadOnly)?;
    let c_buf = DeviceBuffer::allocate(&session, c.byte_len(), AccessMode::WriteOnly)?;
    a_buf.upload(a.data())?;
    b_buf.upload(b.data())?;

    let mut dispatcher = Dispatcher::new(&session);
    dispatcher.bind(
        kernel,
        &[
            (0, KernelArg::Buffer(&a_buf)),
            (1, KernelArg::Buffer(&b_buf)),
            (2, KernelArg::Buffer(&c_buf)),
            (3, n.into()),
        ],
    )?;
    let launch = geometry(config.geometry, a.len(), device.info.max_work_group_size);
    dispatcher.launch(kernel, launch)?;
    c_buf.download(c.data_mut())?;

    codec::save(paths.output, &c)?;
    log::info!("Результат {} записан в {}", c.shape(), paths.output.display());

    let expected = cpu_vector_add(&a, &b)?;
    Ok(VectorAddReport { a, b, c, expected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostBackend;
    use crate::config::{BackendConfig, HostConfig};
    use crate::opencl::types::{CL_MEM_OBJECT_ALLOCATION_FAILURE, CL_OUT_OF_RESOURCES};
    use crate::ErrorKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new(a: &Matrix, b: &Matrix) -> Self {
            let dir = tempfile::tempdir().unwrap();
            codec::save(&dir.path().join("input0.raw"), a).unwrap();
            codec::save(&dir.path().join("input1.raw"), b).unwrap();
            let kernel_path = dir.path().join("kernel.cl");
            std::fs::write(&kernel_path, crate::matrix::VECTOR_ADD_KERNEL).unwrap();
            let config = PipelineConfig {
                kernel_path,
                backend: BackendConfig::Host(HostConfig::default()),
                ..PipelineConfig::default()
            };
            Self { dir, config }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn run(&self, backend: &HostBackend) -> Result<VectorAddReport> {
            let (input0, input1, output) = (self.path("input0.raw"), self.path("input1.raw"), self.path("output.raw"));
            run_vector_add(
                backend,
                &self.config,
                VectorAddPaths {
                    input0: &input0,
                    input1: &input1,
                    output: &output,
                },
            )
        }
    }

    fn row(values: &[f32]) -> Matrix {
        Matrix::new(Shape::new(1, values.len() as u32), values.to_vec()).unwrap()
    }

    #[test]
    fn adds_one_by_four_operands() {
        let fixture = Fixture::new(&row(&[1.0, 2.0, 3.0, 4.0]), &row(&[5.0, 6.0, 7.0, 8.0]));
        let backend = HostBackend::default();
        let report = fixture.run(&backend).unwrap();

        assert_eq!(report.c.data(), &[6.0, 8.0, 10.0, 12.0]);
        assert_eq!(report.c.data(), report.expected.data());
        let saved = codec::load(&fixture.path("output.raw")).unwrap();
        assert_eq!(saved.shape(), Shape::new(1, 4));
        assert_eq!(saved.data(), report.c.data());
        assert_eq!(backend.live_objects(), 0);
        assert_eq!(
            backend.release_log(),
            vec!["mem", "mem", "mem", "kernel", "program", "queue", "context"]
        );
    }

    #[test]
    fn grouped_policy_gives_same_result() {
        let a = Matrix::new(Shape::new(7, 13), (0..91).map(|i| i as f32).collect()).unwrap();
        let b = Matrix::new(Shape::new(7, 13), (0..91).map(|i| 0.5 * i as f32).collect()).unwrap();
        let mut fixture = Fixture::new(&a, &b);
        fixture.config.geometry = GeometryPolicy::Grouped { preferred_local: 16 };
        let report = fixture.run(&HostBackend::default()).unwrap();
        assert_eq!(report.c.data(), report.expected.data());
    }

    #[test]
    fn mismatched_operands_fail_before_device_work() {
        let fixture = Fixture::new(&row(&[1.0, 2.0]), &row(&[1.0, 2.0, 3.0]));
        let backend = HostBackend::default();
        let err = fixture.run(&backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        assert!(backend.release_log().is_empty());
        assert!(!fixture.path("output.raw").exists());
    }

    #[test]
    fn output_template_must_match_operands() {
        let fixture = Fixture::new(&row(&[1.0, 2.0]), &row(&[3.0, 4.0]));
        codec::save(&fixture.path("output.raw"), &Matrix::zeros(Shape::new(2, 2))).unwrap();
        let err = fixture.run(&HostBackend::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn missing_kernel_source_is_load_error() {
        let mut fixture = Fixture::new(&row(&[1.0]), &row(&[2.0]));
        fixture.config.kernel_path = fixture.path("missing.cl");
        let err = fixture.run(&HostBackend::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn allocation_failure_releases_session() {
        let fixture = Fixture::new(&row(&[1.0, 2.0, 3.0, 4.0]), &row(&[5.0, 6.0, 7.0, 8.0]));
        let backend = HostBackend::new(HostConfig {
            global_mem_size: 40,
            ..HostConfig::default()
        });
        let err = fixture.run(&backend).unwrap_err();
        assert_eq!(err.status_code(), Some(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        assert_eq!(backend.live_objects(), 0);
        assert_eq!(
            backend.release_log(),
            vec!["mem", "mem", "kernel", "program", "queue", "context"]
        );
        assert!(!fixture.path("output.raw").exists());
    }

    #[test]
    fn failed_launch_writes_nothing() {
        let fixture = Fixture::new(&row(&[1.0, 2.0]), &row(&[3.0, 4.0]));
        let before = Matrix::new(Shape::new(1, 2), vec![-1.0, -1.0]).unwrap();
        codec::save(&fixture.path("output.raw"), &before).unwrap();

        let backend = HostBackend::default();
        backend.inject_failure("clFinish", CL_OUT_OF_RESOURCES);
        let err = fixture.run(&backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert_eq!(backend.live_objects(), 0);
        assert_eq!(codec::load(&fixture.path("output.raw")).unwrap().data(), before.data());
    }
}
