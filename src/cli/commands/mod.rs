//! CLI command implementations

pub mod cache;
pub mod config;
pub mod download;

pub use cache::execute as cache;
pub use config::execute as config;
pub use download::execute as download;
