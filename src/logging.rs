//! Logger initialization.
//!
//! `RUST_LOG` takes precedence over the configured level. Vulkan validation
//! output is logged under the `vulkan` target, so it can be filtered
//! separately (e.g. `RUST_LOG=info,vulkan=warn`).

use std::fs::OpenOptions;
use std::sync::Once;

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::config::DebugConfig;

static INIT: Once = Once::new();

/// Initialize the global logger once; later calls are ignored.
pub fn init_logging(config: &DebugConfig) {
    INIT.call_once(|| {
        let mut builder = Builder::new();

        if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(parse_level(&config.log_level));
        }

        if let Some(path) = &config.log_file {
            match OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
            {
                Ok(file) => {
                    builder.target(Target::Pipe(Box::new(file)));
                }
                Err(e) => eprintln!("Failed to open log file {:?}: {}", path, e),
            }
        }

        builder.init();
        log::debug!("logging initialized");
    });
}

fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}
