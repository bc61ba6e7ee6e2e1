//! Таблица доступных платформ и устройств OpenCL

use anyhow::Result;
use opencl_offload::utils::mebibytes;
use opencl_offload::{PipelineConfig, PlatformDirectory};
use prettytable::{row, Table};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = PipelineConfig::from_env()?;
    let backend = config.backend.connect()?;
    let directory = PlatformDirectory::discover(backend.as_ref())?;

    let mut table = Table::new();
    table.add_row(row!["Платформа", "Устройство", "Тип", "Вычислительных блоков", "Макс. группа", "Память, МиБ"]);
    for (p, platform) in directory.platforms().iter().enumerate() {
        if platform.devices.is_empty() {
            table.add_row(row![format!("{}: {}", p, platform.info.name), "-", "-", "-", "-", "-"]);
        }
        for (d, device) in platform.devices.iter().enumerate() {
            let info = &device.info;
            let memory_mib = mebibytes(info.global_mem_size);
            table.add_row(row![
                format!("{}: {}", p, platform.info.name),
                format!("{}: {}", d, info.name),
                info.device_type,
                info.compute_units,
                info.max_work_group_size,
                memory_mib
            ]);
        }
    }

    println!("Среда выполнения: {}", backend.name());
    table.printstd();
    Ok(())
}
