//! CLI command implementations.

pub mod config;
pub mod investigate;
pub mod report;
pub mod worker;

use anyhow::Result;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Load the effective configuration, from `path` when given.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
