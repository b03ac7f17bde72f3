pub mod classify;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod output;
pub mod output_log;
pub mod poll;
pub mod repository;
pub mod storage;

pub use error::{Error, Result};
