use contractflow_core::config::{AppConfig, LogFormat};
use tracing_subscriber::EnvFilter;

use crate::commands::GlobalOptions;

/// Installs the global subscriber. Output goes to stderr so stdout carries
/// only the command's JSON result; `RUST_LOG` overrides the configured level.
pub fn init(options: &GlobalOptions) {
    let (level, format) = match AppConfig::load(options.load_options()) {
        Ok(config) => (config.logging.level, config.logging.format),
        Err(_) => ("warn".to_string(), LogFormat::Compact),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // A second initialisation in the same process is ignored.
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
