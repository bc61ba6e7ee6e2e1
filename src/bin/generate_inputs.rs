//! Создаёт операнды и пустой шаблон результата
//!
//! `generate_inputs <rows> <cols> <dir>` пишет `input0.raw`, `input1.raw`
//! и заполненный нулями `output.raw`. По умолчанию операнды случайные.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use opencl_offload::matrix::{codec, initialize_matrix, Fill};
use opencl_offload::{Matrix, Shape};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FillKind {
    Random,
    /// 0, 1, 2, ... в порядке строк
    Sequence,
    /// Все значения равны `--value`
    Constant,
}

#[derive(Parser, Debug)]
#[command(name = "generate_inputs")]
#[command(about = "Writes operand files for vector_add", long_about = None)]
struct Cli {
    rows: u32,
    cols: u32,
    #[arg(value_name = "DIR")]
    dir: PathBuf,
    /// Seed генератора; без него используется системный источник
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum, default_value_t = FillKind::Random)]
    fill: FillKind,
    /// Значение для `--fill constant`
    #[arg(long, default_value_t = 1.0)]
    value: f32,
}

impl Cli {
    fn fill(&self) -> Fill {
        match self.fill {
            FillKind::Random => Fill::Random,
            FillKind::Sequence => Fill::Sequence,
            FillKind::Constant => Fill::Constant(self.value),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut rng: rand::rngs::StdRng = match cli.seed {
        Some(seed) => rand::SeedableRng::seed_from_u64(seed),
        None => rand::SeedableRng::from_entropy(),
    };
    std::fs::create_dir_all(&cli.dir).with_context(|| format!("cannot create {}", cli.dir.display()))?;

    let shape = Shape::new(cli.rows, cli.cols);
    for name in ["input0.raw", "input1.raw"] {
        let matrix = initialize_matrix(shape, cli.fill(), &mut rng);
        codec::save(&cli.dir.join(name), &matrix)?;
    }
    codec::save(&cli.dir.join("output.raw"), &Matrix::zeros(shape))?;

    println!("Созданы операнды {} в {}", shape, cli.dir.display());
    Ok(())
}
