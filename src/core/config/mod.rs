pub mod data;
pub mod io;

pub use data::{ClientConfig, Config, RelayConfig};
pub use io::ConfigError;
