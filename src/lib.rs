pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fetch;
pub mod format;
pub mod rapid;
pub mod utils;

pub use error::{AppError, Result};
