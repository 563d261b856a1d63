/// Logger configuration derived from command-line flags
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::{get_cmd_args, has_arg};

/// Active logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Highest level shown (Info by default)
    pub min_level: LogLevel,
    /// Tags with debug output enabled (--debug-<tag>)
    pub debug_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Snapshot of the current configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Replace the configuration
pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

/// Build the configuration from --quiet, --verbose and --debug-<tag> flags
pub fn init_from_args() {
    let min_level = if has_arg("--verbose") {
        LogLevel::Verbose
    } else if has_arg("--quiet") {
        LogLevel::Warning
    } else {
        LogLevel::Info
    };

    let debug_tags = get_cmd_args()
        .iter()
        .filter_map(|arg| arg.strip_prefix("--debug-"))
        .map(|tag| tag.to_lowercase())
        .collect();

    set_logger_config(LoggerConfig {
        min_level,
        debug_tags,
    });
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().debug_tags.contains(&tag.to_debug_key())
}

/// Whether --verbose output is on
pub fn is_verbose_enabled() -> bool {
    LOGGER_CONFIG.read().min_level >= LogLevel::Verbose
}
