pub mod config;
pub mod mapping;

pub use config::*;
pub use mapping::*;
