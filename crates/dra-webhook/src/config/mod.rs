pub mod cli;
pub mod mapping;
pub mod serve;

use core::error::Error;

pub use cli::*;
pub use mapping::ResourceNameMapping;
pub use serve::*;

/// Errors raised while loading or validating configuration.
#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Failed to read configuration file: {path}")]
    Read { path: String },
    #[display("Failed to parse configuration: {message}")]
    Parse { message: String },
    #[display("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl Error for ConfigError {}
