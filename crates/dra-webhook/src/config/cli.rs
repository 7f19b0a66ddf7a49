use clap::{Parser, Subcommand};
use utils::version;

use crate::config::serve::ServeArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the mutating and validating admission webhooks
    Serve(Box<ServeArgs>),
}
