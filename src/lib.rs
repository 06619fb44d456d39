pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod azure;
pub mod config;
pub mod core;
pub mod output;
