//! Вычислительные компоненты: поиск устройств, сессия, буферы и запуск ядер

mod buffer;
mod dispatch;
mod platform;
mod session;

pub use buffer::DeviceBuffer;
pub use dispatch::{Dispatcher, KernelArg, LaunchGeometry, ScalarArg};
pub use platform::{DeviceDescriptor, PlatformDescriptor, PlatformDirectory};
pub use session::{ComputeSession, KernelHandle};
