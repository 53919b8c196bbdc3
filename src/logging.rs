//! tracing subscriber setup for the binary

use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingConfig, log_path};

/// Filter from `RUST_LOG`, else the configured level for this crate with
/// noisy HTTP internals held at warn
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "release_tracker={},hyper=warn,reqwest=warn,h2=warn",
            level
        ))
    })
}

/// Install the global subscriber.
///
/// Console output goes to stderr so stdout stays clean for results. The
/// returned guard flushes the file writer and must outlive logging; it is
/// `None` when file logging is off or the log directory is unusable.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let console = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match config.file.then(open_log_file).flatten() {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().json().with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console)
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("release-tracker: logging already initialized: {}", e);
    }
    guard
}

fn open_log_file() -> Option<fs::File> {
    let path = log_path();
    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("release-tracker: cannot create {}: {}", parent.display(), e);
        return None;
    }

    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .inspect_err(|e| eprintln!("release-tracker: cannot open {}: {}", path.display(), e))
        .ok()
}
