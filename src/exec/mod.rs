pub mod executor;

pub use executor::{BackgroundTask, CommandResult, ExecutionContext, Executor};
