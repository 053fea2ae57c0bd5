#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod server;
pub mod sync;
pub mod utils;
pub mod vm;
