use opencl_offload::backend::host::HostBackend;
use opencl_offload::config::{BackendConfig, GeometryPolicy, HostConfig};
use opencl_offload::matrix::{codec, compare_results, initialize_matrix, Fill};
use opencl_offload::pipeline::{run_vector_add, VectorAddPaths};
use opencl_offload::{ErrorKind, PipelineConfig, Shape};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

fn config() -> PipelineConfig {
    PipelineConfig {
        kernel_path: Path::new(env!("CARGO_MANIFEST_DIR")).join("kernel.cl"),
        backend: BackendConfig::Host(HostConfig::default()),
        ..PipelineConfig::default()
    }
}

fn write_operands(dir: &Path, shape: Shape, rng: &mut StdRng) -> [PathBuf; 3] {
    let input0 = dir.join("input0.raw");
    let input1 = dir.join("input1.raw");
    codec::save(&input0, &initialize_matrix(shape, Fill::Random, rng)).unwrap();
    codec::save(&input1, &initialize_matrix(shape, Fill::Random, rng)).unwrap();
    [input0, input1, dir.join("output.raw")]
}

#[test]
fn random_operands_sum_elementwise() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..8 {
        let shape = Shape::new(rng.gen_range(1..40), rng.gen_range(1..40));
        let dir = tempfile::tempdir().unwrap();
        let [input0, input1, output] = write_operands(dir.path(), shape, &mut rng);

        let mut config = config();
        if rng.gen_bool(0.5) {
            config.geometry = GeometryPolicy::Grouped { preferred_local: 32 };
        }
        let backend = HostBackend::default();
        let report = run_vector_add(
            &backend,
            &config,
            VectorAddPaths { input0: &input0, input1: &input1, output: &output },
        )
        .unwrap();

        let a = codec::load(&input0).unwrap();
        let b = codec::load(&input1).unwrap();
        let c = codec::load(&output).unwrap();
        assert_eq!(c.shape(), shape);
        for i in 0..c.len() {
            assert_eq!(c.data()[i], a.data()[i] + b.data()[i]);
        }
        assert!(compare_results(report.c.data(), report.expected.data(), 0.0).matches());
        assert_eq!(backend.live_objects(), 0);
    }
}

#[test]
fn saved_file_reloads_bit_exact() {
    let mut rng = StdRng::seed_from_u64(11);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matrix.raw");
    let matrix = initialize_matrix(Shape::new(3, 5), Fill::Random, &mut rng);

    codec::save(&path, &matrix).unwrap();
    let first = std::fs::read(&path).unwrap();
    let reloaded = codec::load(&path).unwrap();
    codec::save(&path, &reloaded).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), first);
    assert_eq!(first.len(), codec::HEADER_LEN + 15 * 4);
}

#[test]
fn every_runtime_failure_releases_all_objects() {
    let calls = [
        ("clCreateContext", ErrorKind::Context),
        ("clCreateCommandQueue", ErrorKind::Context),
        ("clCreateProgramWithSource", ErrorKind::Compile),
        ("clBuildProgram", ErrorKind::Compile),
        ("clCreateKernel", ErrorKind::KernelNotFound),
        ("clCreateBuffer", ErrorKind::Allocation),
        ("clEnqueueWriteBuffer", ErrorKind::Transfer),
        ("clSetKernelArg", ErrorKind::ArgumentBinding),
        ("clEnqueueNDRangeKernel", ErrorKind::Launch),
        ("clFinish", ErrorKind::Launch),
        ("clEnqueueReadBuffer", ErrorKind::Transfer),
    ];
    let mut rng = StdRng::seed_from_u64(3);
    for (call, kind) in calls {
        let dir = tempfile::tempdir().unwrap();
        let [input0, input1, output] = write_operands(dir.path(), Shape::new(2, 3), &mut rng);
        let backend = HostBackend::default();
        backend.inject_failure(call, -5);

        let err = run_vector_add(
            &backend,
            &config(),
            VectorAddPaths { input0: &input0, input1: &input1, output: &output },
        )
        .unwrap_err();
        assert_eq!(err.kind(), kind, "{}: {}", call, err);
        assert_eq!(backend.live_objects(), 0, "{} leaked objects", call);
        assert!(!output.exists(), "{} wrote output", call);
    }
}
