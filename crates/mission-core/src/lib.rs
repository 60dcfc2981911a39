pub mod artifact;
pub mod backend;
pub mod config;
pub mod error;
pub mod io;
pub mod legacy;
pub mod locked_file;
pub mod manifest;
pub mod orchestrator;
pub mod paths;
pub mod records;
pub mod registry;
pub mod safety;
pub mod specialists;
pub mod store;
pub mod task;
pub mod task_manager;
pub mod types;
pub mod worker;
pub mod worker_process;

pub use error::{MissionError, Result};
