pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod message;
pub mod stats;

pub use config::Config;
pub use error::{Result, StreamError};
