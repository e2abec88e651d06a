use super::{Message, Trigger, TriggerError};
use crate::cancel::CancellationToken;
use log::{debug, trace};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Mutex,
    },
    time::{Duration, Instant},
};

/// Editors usually write a file in multiple steps, wait for them to settle.
const DEBOUNCE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A trigger that sends [Message::ConfigChanged] when the configuration file changes.
///
/// The parent directory is watched instead of the file, so the file can be
/// replaced (e.g. by an atomic rename) without losing the watch. Changes are
/// debounced: the message is sent once no change arrived for [DEBOUNCE].
pub struct ConfigTrigger {
    file_name: OsString,
    scope: CancellationToken,
    events: Mutex<Receiver<notify::Result<Event>>>,
    _watcher: Mutex<RecommendedWatcher>,
}

impl ConfigTrigger {
    /// Starts watching the configuration file. The trigger stops when the scope is cancelled.
    pub fn new(path: &Path, scope: &CancellationToken) -> Result<Self, TriggerError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                TriggerError::Misconfigured(format!("{} is not a file", path.to_string_lossy()))
            })?
            .to_os_string();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())
            .map_err(|err| TriggerError::Misconfigured(err.to_string()))?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|err| {
                TriggerError::Misconfigured(format!(
                    "cannot watch {}: {err}",
                    directory.to_string_lossy()
                ))
            })?;
        debug!("Watching {} for changes.", path.to_string_lossy());

        Ok(ConfigTrigger {
            file_name,
            scope: scope.clone(),
            events: Mutex::new(rx),
            _watcher: Mutex::new(watcher),
        })
    }

    fn is_config_change(&self, event: &Event) -> bool {
        (event.kind.is_create() || event.kind.is_modify())
            && event
                .paths
                .iter()
                .any(|path| path.file_name() == Some(self.file_name.as_os_str()))
    }
}

impl Trigger for ConfigTrigger {
    fn listen(&self, tx: Sender<Message>) -> Result<(), TriggerError> {
        let events = self
            .events
            .lock()
            .map_err(|_| TriggerError::FailedTrigger(String::from("config trigger is poisoned")))?;

        let mut pending: Option<Instant> = None;
        loop {
            if self.scope.is_cancelled() {
                return Ok(());
            }

            match events.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    if self.is_config_change(&event) {
                        trace!("Configuration changed: {:?}.", event.kind);
                        pending = Some(Instant::now());
                    }
                }
                Ok(Err(err)) => tx.send(Message::ConfigError(err.to_string()))?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TriggerError::FailedTrigger(String::from(
                        "file watcher stopped",
                    )));
                }
            }

            if pending.is_some_and(|changed| changed.elapsed() >= DEBOUNCE) {
                pending = None;
                tx.send(Message::ConfigChanged)?;
            }
        }
    }
}
