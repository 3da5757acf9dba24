//! Logging and tracing configuration
//!
//! The CLI installs one subscriber per process. Its filter sits behind a
//! reload layer so the test runners can switch verbosity per test case
//! (`enable_logger` / `enable_debug`) through an explicit [`LogControl`].

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Log verbosity derived from the `enable_logger` / `enable_debug` flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only
    #[default]
    Quiet,
    /// Progress messages
    Info,
    /// Everything, including service requests
    Debug,
}

impl Verbosity {
    /// Debug wins over logger; neither means quiet
    pub fn from_flags(enable_logger: bool, enable_debug: bool) -> Self {
        if enable_debug {
            Verbosity::Debug
        } else if enable_logger {
            Verbosity::Info
        } else {
            Verbosity::Quiet
        }
    }

    fn directives(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Info => "wftester=info,wft=info,warn",
            Verbosity::Debug => "wftester=debug,wft=debug,info",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(self.directives())
    }
}

/// Handle for adjusting the active log level at runtime
///
/// Clones share the current level. A disabled control (the default) only
/// tracks the level and never touches a subscriber, which is what library
/// users and tests get when they never install one.
#[derive(Clone, Default)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    current: Arc<Mutex<Verbosity>>,
}

impl LogControl {
    /// A control that never changes the subscriber
    pub fn disabled() -> Self {
        Self::default()
    }

    fn with_handle(handle: reload::Handle<EnvFilter, Registry>, verbosity: Verbosity) -> Self {
        Self {
            handle: Some(handle),
            current: Arc::new(Mutex::new(verbosity)),
        }
    }

    /// Level most recently applied
    pub fn current(&self) -> Verbosity {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch the filter to the given verbosity, returning the previous one
    pub fn apply(&self, verbosity: Verbosity) -> Verbosity {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, verbosity)
        };
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.reload(verbosity.filter()) {
                tracing::debug!("Could not update log filter: {}", e);
            }
        }
        previous
    }
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("enabled", &self.handle.is_some())
            .field("current", &self.current())
            .finish()
    }
}

/// Initialize tracing for the CLI (stderr logging, optional log file)
///
/// When `RUST_LOG` is set it takes precedence and the returned control is
/// disabled. The returned guard must be kept alive for the file writer to
/// flush.
pub fn init_cli(verbosity: Verbosity, log_file: Option<&Path>) -> (LogControl, Option<WorkerGuard>) {
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_override = env_filter.is_some();
    let (filter, handle) = reload::Layer::new(env_filter.unwrap_or_else(|| verbosity.filter()));

    let (file_layer, guard) = match log_file.and_then(open_log_file) {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .with(file_layer)
        .init();

    let control = if env_override {
        LogControl::disabled()
    } else {
        LogControl::with_handle(handle, verbosity)
    };
    (control, guard)
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
            eprintln!("Warning: Could not create log directory {}", parent.display());
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Info);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Debug);
    }

    #[test]
    fn test_disabled_control_tracks_level() {
        let control = LogControl::disabled();
        assert_eq!(control.apply(Verbosity::Debug), Verbosity::Quiet);
        assert_eq!(control.clone().current(), Verbosity::Debug);
    }

    #[test]
    fn test_apply_reloads_filter() {
        let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(Verbosity::Info.filter());
        let control = LogControl::with_handle(handle.clone(), Verbosity::Info);

        assert_eq!(control.apply(Verbosity::Debug), Verbosity::Info);
        let active = handle.with_current(|f| f.to_string()).unwrap();
        assert!(active.contains("wftester=debug"));

        assert_eq!(control.apply(Verbosity::Info), Verbosity::Debug);
        let active = handle.with_current(|f| f.to_string()).unwrap();
        assert!(active.contains("wftester=info"));
        drop(layer);
    }
}
