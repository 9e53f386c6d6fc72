pub mod config;
pub mod device;
pub mod jobs;
pub mod layout;
pub mod runner;

pub use config::ToolConfig;
