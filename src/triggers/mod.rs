use crate::session::SessionMessage;
use mockall::automock;
use std::sync::mpsc::{SendError, Sender};
use thiserror::Error;

/// A trigger that reloads the configuration when the file changes.
pub mod config;
/// A trigger that terminates the program on a signal.
pub mod signal;

/// Everything that can wake up the main loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// The root scope was cancelled.
    Cancelled,
    /// A termination signal arrived, the parameter is the name of the signal.
    Signal(String),
    /// A message from the session watching the targets.
    Target(SessionMessage),
    /// A message from the session watching the daemon's own repository.
    SelfRepo(SessionMessage),
    /// The configuration file changed.
    ConfigChanged,
    /// Watching the configuration file failed.
    ConfigError(String),
}

/// A custom error for describing the error cases for triggers
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Cannot initialize trigger, because it has a misconfiguration.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// Cannot send trigger with Sender. This usually because the receiver is dropped.
    #[error("cannot trigger changes, receiver hang up")]
    ReceiverHangup(#[from] SendError<Message>),
    /// Running the trigger failed.
    #[error("{0}")]
    FailedTrigger(String),
}

/// A trigger is a long running background process, which sends messages to the main loop.
///
/// Triggers may include:
///   - signals ([signal::SignalTrigger])
///   - configuration changes ([config::ConfigTrigger])
#[automock]
pub trait Trigger: Sync + Send {
    /// Start the trigger process.
    fn listen(&self, tx: Sender<Message>) -> Result<(), TriggerError>;
}
