//! Debug logging
//!
//! Logging is off unless `CHATSYNC_LOG` is set to a level or filter
//! directive. Output goes to a file so it never interleaves with whatever
//! the host application draws on the terminal.

use std::fs::File;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Environment variable that enables logging
pub const LOG_ENV: &str = "CHATSYNC_LOG";

/// Install a file-based subscriber if `CHATSYNC_LOG` is set
///
/// Returns `true` if a subscriber was installed. Safe to call more than once.
pub fn init_logging(config: &Config) -> bool {
    let Ok(log_level) = std::env::var(LOG_ENV) else {
        return false;
    };

    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            return false;
        }
    };

    // Ignore error if already initialized
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter_for(&log_level))
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init()
        .is_ok();

    if installed {
        info!("Logging initialized to {:?}", log_path);
    }
    installed
}

/// A bare level applies to this crate only; anything else is a full directive
fn filter_for(level: &str) -> EnvFilter {
    let level = level.trim();
    if level.is_empty() {
        EnvFilter::new("chatsync_core=info")
    } else if level.contains('=') || level.contains(',') {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(format!("chatsync_core={}", level))
    }
}
