pub mod config;
pub mod types;

pub use config::{ConfigError, PingguardConfig};
pub use types::*;
