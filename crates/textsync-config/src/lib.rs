pub mod config;
pub mod device;

pub use config::AppConfig;
pub use device::DeviceId;
