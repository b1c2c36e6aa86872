// src/watcher.rs
use crate::broadcast::Registry;
use crate::error::WatchError;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher as NotifyWatcherTrait}; // To use .watch()
use notify_debouncer_full::{new_debouncer, DebouncedEvent};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches `dir` (non-recursively) on a background thread and broadcasts a
/// reload to `registry` once per debounced batch of writes.
///
/// The watch is fully established before this returns: a directory that
/// cannot be watched is reported here, not on the background thread. Errors
/// reported by the watch afterwards are logged and the thread keeps running.
///
/// # Arguments
///
/// * `dir` - The template directory.
/// * `debounce` - How long the debouncer waits for a burst of events to settle.
/// * `registry` - The subscribers to signal.
pub fn run_watcher(
    dir: &Path,
    debounce: Duration,
    registry: Arc<Registry>,
) -> Result<(), WatchError> {
    let dir = dir.to_path_buf();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), WatchError>>();

    std::thread::Builder::new()
        .name("tplive-watcher".to_string())
        .spawn(move || {
            // The debouncer lives as long as this thread.
            let (debouncer_tx, debouncer_rx) = std::sync::mpsc::channel();
            let mut debouncer = match new_debouncer(debounce, None, debouncer_tx) {
                Ok(d) => d,
                Err(e) => {
                    let _ = ready_tx.send(Err(WatchError::Create(e)));
                    return;
                }
            };

            if let Err(e) = debouncer
                .watcher()
                .watch(&dir, RecursiveMode::NonRecursive)
            {
                let _ = ready_tx.send(Err(WatchError::Watch {
                    path: dir.clone(),
                    source: e,
                }));
                return;
            }
            debouncer
                .cache()
                .add_root(&dir, RecursiveMode::NonRecursive);

            info!("[WatcherThread] Watching {}", dir.display());
            let _ = ready_tx.send(Ok(()));

            loop {
                match debouncer_rx.recv() {
                    Ok(Ok(events)) => handle_batch(&events, &dir, &registry),
                    Ok(Err(errors)) => {
                        for error in errors {
                            error!(
                                "[WatcherThread] Error while watching {}: {:?}",
                                dir.display(),
                                error
                            );
                        }
                    }
                    Err(e) => {
                        // The debouncer dropped its sender.
                        error!(
                            "[WatcherThread] Debouncer channel closed: {:?}. Watcher thread exiting.",
                            e
                        );
                        break;
                    }
                }
            }
        })
        .map_err(WatchError::Spawn)?;

    ready_rx.recv().map_err(|_| WatchError::ThreadExited)?
}

/// Broadcasts once if any event in the batch can change the rendered output.
fn handle_batch(events: &[DebouncedEvent], dir: &Path, registry: &Registry) {
    let changed: Vec<&DebouncedEvent> = events.iter().filter(|e| is_write(&e.kind)).collect();
    if changed.is_empty() {
        debug!(
            "[WatcherThread] Ignoring {} event(s) in {}",
            events.len(),
            dir.display()
        );
        return;
    }

    for event in &changed {
        info!("[WatcherThread] File changed: {:?} {:?}", event.kind, event.paths);
    }
    registry.broadcast();
}

/// Whether an event kind is a write to file contents.
///
/// Saves done by rename-over (common in editors) show up as a create or a
/// rename-to, so those count too.
pub fn is_write(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}
