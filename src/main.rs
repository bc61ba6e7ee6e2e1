//! Сложение двух матриц на OpenCL-устройстве
//!
//! `vector_add <input_file_0> <input_file_1> <output_file>`

use anyhow::Result;
use clap::Parser;
use opencl_offload::matrix::{codec, compare_results};
use opencl_offload::pipeline::{add_loaded, VectorAddPaths, VectorAddReport};
use opencl_offload::PipelineConfig;
use std::path::PathBuf;
use std::process::ExitCode;

/// Допуск сравнения с эталоном CPU
const EPSILON: f32 = 1e-5;

#[derive(Parser, Debug)]
#[command(name = "vector_add")]
#[command(about = "Adds two matrix files on an OpenCL device", long_about = None)]
struct Cli {
    /// Первый операнд
    #[arg(value_name = "INPUT_FILE_0")]
    input0: PathBuf,
    /// Второй операнд
    #[arg(value_name = "INPUT_FILE_1")]
    input1: PathBuf,
    /// Файл результата; если существует, задаёт ожидаемую форму
    #[arg(value_name = "OUTPUT_FILE")]
    output: PathBuf,
}

fn print_result(report: &VectorAddReport) {
    println!("Output Vector Shape: {}", report.c.shape());
    for (i, (computed, expected)) in report.c.data().iter().zip(report.expected.data()).enumerate() {
        println!("C[{}]: {:.6} == {:.6}", i, computed, expected);
    }
    let comparison = compare_results(report.c.data(), report.expected.data(), EPSILON);
    if !comparison.matches() {
        eprintln!(
            "{} of {} elements differ from the CPU result (max difference {:e})",
            comparison.mismatches,
            report.c.len(),
            comparison.max_diff
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Формы печатаются сразу, чтобы они были видны и при ошибке устройства
    let a = codec::load(&cli.input0)?;
    println!("Input0 Vector Shape: {}", a.shape());
    let b = codec::load(&cli.input1)?;
    println!("Input1 Vector Shape: {}", b.shape());

    let config = PipelineConfig::from_env()?;
    let backend = config.backend.connect()?;
    let report = add_loaded(
        backend.as_ref(),
        &config,
        VectorAddPaths {
            input0: &cli.input0,
            input1: &cli.input1,
            output: &cli.output,
        },
        a,
        b,
    )?;
    print_result(&report);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
