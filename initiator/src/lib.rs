pub mod cli;
pub mod error;
pub mod launcher;

pub use crate::cli::Cli;
