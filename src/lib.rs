pub mod auth;
pub mod collect;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod records;
pub mod services;
pub mod utils;
pub mod vendors;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
