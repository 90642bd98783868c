// ABOUTME: Watch module for monitoring the slide source and rebuilding the preview
// ABOUTME: Debounces file events and cancels stale builds when a newer save arrives

use log::{debug, error, info};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use notify_debouncer_full::new_debouncer;

use crate::build::{BuildResult, Previewer};
use crate::cancel::CancelToken;
use crate::config::BuildOptions;
use crate::errors::{PreviewError, Result};
use crate::utils;

/// Configuration for watch mode
pub struct WatchConfig {
    /// Path to the Beamer source to watch
    pub slides_path: PathBuf,

    /// Debounce time in milliseconds
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            slides_path: PathBuf::new(),
            debounce_ms: 200,
        }
    }
}

type Reporter = Arc<dyn Fn(BuildResult) + Send + Sync>;

struct InFlight {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Runs at most one build at a time, newest source wins.
///
/// `trigger` cancels the build in flight and waits for it to wind down before
/// starting the next, so two builds never write the output concurrently.
pub struct BuildSupervisor {
    previewer: Arc<Previewer>,
    reporter: Reporter,
    in_flight: Mutex<Option<InFlight>>,
}

impl BuildSupervisor {
    /// Supervisor that logs every build result
    pub fn new(previewer: Arc<Previewer>) -> Self {
        Self::with_reporter(previewer, log_result)
    }

    pub fn with_reporter<F>(previewer: Arc<Previewer>, reporter: F) -> Self
    where
        F: Fn(BuildResult) + Send + Sync + 'static,
    {
        Self {
            previewer,
            reporter: Arc::new(reporter),
            in_flight: Mutex::new(None),
        }
    }

    /// Start a build of `source`, superseding any build still running
    pub fn trigger(&self, source: String) {
        let mut slot = self.in_flight.lock();
        if let Some(previous) = slot.take() {
            if !previous.handle.is_finished() {
                info!("Source changed during build, cancelling stale build");
            }
            previous.cancel.cancel();
            if previous.handle.join().is_err() {
                error!("Previous build panicked");
            }
        }

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let previewer = Arc::clone(&self.previewer);
        let reporter = Arc::clone(&self.reporter);
        let handle = thread::spawn(move || {
            let result = previewer.build(&source, &token);
            (*reporter)(result);
        });

        *slot = Some(InFlight { cancel, handle });
    }

    /// Block until the current build, if any, has finished
    pub fn wait(&self) {
        if let Some(current) = self.in_flight.lock().take() {
            if current.handle.join().is_err() {
                error!("Build panicked");
            }
        }
    }
}

impl Drop for BuildSupervisor {
    fn drop(&mut self) {
        if let Some(current) = self.in_flight.get_mut().take() {
            current.cancel.cancel();
            let _ = current.handle.join();
        }
    }
}

fn log_result(result: BuildResult) {
    if result.is_done() {
        info!("{}", result);
        info!("Ready");
    } else {
        error!("{}", result);
    }
}

/// Watch the slide source and rebuild the preview on every save.
///
/// Runs until the event channel closes. Build failures are logged and never
/// stop the loop.
pub fn watch_slides(config: WatchConfig, options: BuildOptions) -> Result<()> {
    utils::validate_file_exists(&config.slides_path)?;
    let slides_abs = utils::get_absolute_path(&config.slides_path)?;

    let watch_path = match slides_abs.parent() {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };

    let mut options = options;
    if options.source_dir.is_none() {
        options.source_dir = Some(watch_path.clone());
    }

    let previewer = Arc::new(Previewer::new(options)?);
    let supervisor = BuildSupervisor::new(previewer);

    // Initial build
    if let Some(source) = read_source(&slides_abs) {
        supervisor.trigger(source);
    }

    let (tx, rx) = mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(config.debounce_ms), None, tx)
        .map_err(|e| PreviewError::Watch(format!("Failed to create file watcher: {}", e)))?;

    debouncer
        .watcher()
        .watch(&watch_path, RecursiveMode::NonRecursive)
        .map_err(|e| {
            PreviewError::Watch(format!(
                "Failed to start watching directory {:?}: {}",
                watch_path, e
            ))
        })?;

    info!(
        "Watching {:?} for changes (Press Ctrl+C to stop)",
        config.slides_path
    );

    for result in rx {
        match result {
            Ok(events) => {
                let relevant = events
                    .iter()
                    .any(|event| event.paths.iter().any(|p| is_slides_path(p, &slides_abs)));
                if !relevant {
                    continue;
                }
                debug!("Change detected in {:?}", slides_abs);
                if let Some(source) = read_source(&slides_abs) {
                    supervisor.trigger(source);
                }
            }
            Err(errors) => {
                for e in errors {
                    error!("Watch error: {:?}", e);
                }
            }
        }
    }

    supervisor.wait();
    Ok(())
}

/// Whether an event path refers to the watched deck
fn is_slides_path(path: &Path, slides_abs: &Path) -> bool {
    if path == slides_abs {
        return true;
    }
    match utils::get_absolute_path(path) {
        Ok(abs) => abs == slides_abs,
        // Deleted or renamed away; compare by file name within the directory
        Err(_) => path.parent() == slides_abs.parent() && path.file_name() == slides_abs.file_name(),
    }
}

fn read_source(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(source) => Some(source),
        Err(e) => {
            error!("Could not open {:?}: {}", path, e);
            None
        }
    }
}
