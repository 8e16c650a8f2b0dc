pub mod config;
pub mod error;
pub mod redis;
pub mod types;

pub use config::*;
pub use error::*;
pub use redis::*;
pub use types::*;
