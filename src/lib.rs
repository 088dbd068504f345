pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod relay;
pub mod store;

pub use error::AppError;
