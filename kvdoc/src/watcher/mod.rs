use crate::error::Result;
use crate::schema::{parse_schema, SchemaHandle};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Watches a schema descriptor file and installs a freshly parsed schema
/// whenever it changes. A descriptor that fails to parse is logged and the
/// previously installed schema stays active.
///
/// The parent directory is watched rather than the file itself so that
/// editors which replace the file on save are still picked up.
pub struct SchemaWatcher {
    _watcher: RecommendedWatcher,
    /// Handle to the background thread performing reloads
    _thread: std::thread::JoinHandle<()>,
}

impl SchemaWatcher {
    /// Start watching `model_file`. Bursts of change events are debounced
    /// by `debounce` before the file is re-read.
    pub fn start(model_file: &Path, handle: SchemaHandle, debounce: Duration) -> Result<Self> {
        let file_name = model_file
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        let dir = match model_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let model_file = model_file.to_path_buf();

        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let thread = std::thread::spawn(move || {
            let mut pending = false;
            let mut last_event = Instant::now();

            loop {
                match notify_rx.recv_timeout(debounce) {
                    Ok(Ok(event)) => {
                        if touches_descriptor(&event, &file_name) {
                            pending = true;
                            last_event = Instant::now();
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("Schema watcher error: {e}");
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if pending && last_event.elapsed() >= debounce {
                            pending = false;
                            reload(&model_file, &handle);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        // Watcher was dropped, exit the thread
                        break;
                    }
                }
            }
        });

        Ok(SchemaWatcher {
            _watcher: watcher,
            _thread: thread,
        })
    }
}

fn touches_descriptor(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

fn reload(model_file: &Path, handle: &SchemaHandle) {
    match parse_schema(model_file) {
        Ok(schema) => {
            handle.install(schema);
        }
        Err(e) => {
            log::warn!(
                "Keeping schema v{}: reload of {} failed: {e}",
                handle.version(),
                model_file.display()
            );
        }
    }
}
