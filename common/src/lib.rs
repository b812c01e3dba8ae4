pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
