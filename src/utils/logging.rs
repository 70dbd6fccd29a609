//! Logging Module
//!
//! Structured logging built on `tracing`. `RUST_LOG` wins when it is set;
//! otherwise the crate logs at the configured level while Burn and the HTTP
//! stack are held at `warn`.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are chatty at `info`/`debug`
const QUIET_DEPENDENCIES: [&str; 5] = ["burn", "cubecl", "reqwest", "hyper", "rustls"];

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for this crate
    pub level: Level,
    /// Level for the crates in `QUIET_DEPENDENCIES`
    pub dependency_level: Level,
    /// Show the module path of each event
    pub include_target: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug output for this crate, module paths shown
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ..Self::default()
        }
    }

    /// Build from a level name such as `"debug"`; unknown names give `None`
    pub fn from_level_name(name: &str) -> Option<Self> {
        let level = name.trim().parse::<Level>().ok()?;
        Some(Self {
            level,
            ..Self::default()
        })
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        let mut directives = vec![self.level.as_str().to_lowercase()];
        directives.extend(QUIET_DEPENDENCIES.iter().map(|krate| {
            format!("{}={}", krate, self.dependency_level.as_str().to_lowercase())
        }));
        directives.join(",")
    }
}

/// Initialize the global subscriber.
///
/// Returns an error message if a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target),
        )
        .with(filter)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}
