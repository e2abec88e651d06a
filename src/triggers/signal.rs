use super::{Message, Trigger, TriggerError};
use log::debug;
use std::sync::{atomic::AtomicU8, mpsc::Sender};

/// A trigger that terminates the program on a signal.
///
/// The first SIGINT or SIGTERM starts the graceful shutdown, the second one
/// exits right away, even if the shutdown commands are still running.
pub struct SignalTrigger {
    trigger_count: AtomicU8,
}

/// The conventional name of the signal, e.g. `SIGTERM`.
#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    use nix::sys::signal::Signal;

    Signal::try_from(signal)
        .map(|signal| signal.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signal}"))
}

impl SignalTrigger {
    pub fn new() -> SignalTrigger {
        SignalTrigger {
            trigger_count: AtomicU8::new(0),
        }
    }

    #[cfg(unix)]
    fn listen_inner<I>(&self, tx: Sender<Message>, signals: I) -> Result<(), TriggerError>
    where
        I: IntoIterator<Item = i32>,
    {
        use log::error;
        use std::{process, sync::atomic::Ordering, thread::sleep, time::Duration};
        for signal in signals.into_iter() {
            let name = signal_name(signal);
            let previous = self.trigger_count.fetch_add(1, Ordering::Acquire);
            if previous == 0 {
                debug!("Got {name}, shutting down.");
                if tx.send(Message::Signal(name.clone())).is_err() {
                    error!("Failed terminating the application with {name}.");
                }
            } else {
                // Allow a little time for the log lines to be written.
                sleep(Duration::from_millis(100));
                debug!("Got {name} again, terminating right now.");
                process::exit(128 + signal);
            }
        }

        Ok(())
    }
}

impl Default for SignalTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger for SignalTrigger {
    /// Starts a trigger that iterates over signals and terminates the program.
    #[cfg(unix)]
    fn listen(&self, tx: Sender<Message>) -> Result<(), TriggerError> {
        use signal_hook::{
            consts::TERM_SIGNALS,
            iterator::{exfiltrator::SignalOnly, SignalsInfo},
        };
        let mut signals = SignalsInfo::<SignalOnly>::new(TERM_SIGNALS).map_err(|err| {
            TriggerError::Misconfigured(format!("cannot set up signal handler: {err}"))
        })?;
        self.listen_inner(tx, &mut signals)?;

        Ok(())
    }

    #[cfg(not(unix))]
    fn listen(&self, _tx: Sender<Message>) -> Result<(), TriggerError> {
        debug!("Signal handlers are not supported on non-unix systems.");

        Ok(())
    }
}
