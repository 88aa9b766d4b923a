pub mod config;
pub mod error;
pub mod mock_server;
pub mod protocol;
pub mod session;

pub use error::{Result, SensorError};
