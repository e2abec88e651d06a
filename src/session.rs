use crate::{
    cancel::CancellationToken,
    checks::{git::RepoWatcher, Check, CheckError, WatchEvent},
};
use log::{debug, error, trace, warn};
use std::{
    path::Path,
    sync::mpsc::{self, Receiver, SyncSender, TrySendError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;

/// The number of events that can wait for delivery, before new ones are dropped.
pub const EVENT_QUEUE_SIZE: usize = 64;

/// A custom error describing why a watch session stopped running.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The session scope was cancelled, this is the normal way to stop.
    #[error("watch session was cancelled")]
    Cancelled,
    /// Events cannot be delivered, because the delivery queue hang up.
    #[error("cannot deliver events, receiver hang up")]
    ReceiverHangup,
    /// Checking one of the repositories failed, which stops the whole session.
    #[error("checking {0} failed: {1}")]
    Check(String, CheckError),
}

/// A custom error for starting and bootstrapping a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The background threads cannot be started.
    #[error("cannot start watch session: {0}")]
    SpawnFailed(#[from] std::io::Error),
    /// The session stopped before the initial scan was done.
    #[error("initial scan failed: {0}")]
    InitialScanFailed(String),
}

/// Everything a running session reports to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionMessage {
    Event(WatchEvent),
    /// The session stopped with an error and will not produce more events.
    Failed(String),
}

/// Periodically checks a list of repositories and reports every new commit.
///
/// A session can be [run](WatchSession::run) on the current thread or
/// [started](WatchSession::start) in the background. On every tick each check
/// runs in the configured order; any error stops the session, restarting it is
/// up to the owner.
pub struct WatchSession {
    checks: Vec<Box<dyn Check>>,
    interval: Duration,
    initial_event: bool,
    initial_done: Option<SyncSender<()>>,
}

impl WatchSession {
    /// Creates a session watching the repository urls, cloned into `cache`.
    pub fn new(
        targets: &[String],
        interval: Duration,
        cache: &Path,
        initial_event: bool,
    ) -> Result<Self, CheckError> {
        let checks = targets
            .iter()
            .map(|url| Ok(Box::new(RepoWatcher::new(url, cache, initial_event)?) as Box<dyn Check>))
            .collect::<Result<Vec<_>, CheckError>>()?;

        Ok(Self::from_checks(checks, interval, initial_event))
    }

    /// Creates a session from arbitrary checks.
    pub fn from_checks(checks: Vec<Box<dyn Check>>, interval: Duration, initial_event: bool) -> Self {
        WatchSession {
            checks,
            interval,
            initial_event,
            initial_done: None,
        }
    }

    /// Returns a one-shot receiver, that gets a message when the initial scan finished.
    /// If the session stops before that, the receiver disconnects instead.
    pub fn initial_scan_signal(&mut self) -> Receiver<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.initial_done = Some(tx);
        rx
    }

    fn scan(
        &mut self,
        scope: &CancellationToken,
        queue: &SyncSender<SessionMessage>,
    ) -> Result<(), WatchError> {
        for check in self.checks.iter_mut() {
            if scope.is_cancelled() {
                return Err(WatchError::Cancelled);
            }

            let event = check
                .check()
                .map_err(|err| WatchError::Check(check.url(), err))?;

            if let Some(event) = event {
                debug!("New commit on {}.", event.url);
                match queue.try_send(SessionMessage::Event(event)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(SessionMessage::Event(event))) => {
                        warn!("Too many undelivered events, dropping event for {}.", event.url);
                    }
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return Err(WatchError::ReceiverHangup),
                }
            }
        }

        Ok(())
    }

    /// Runs the session until the scope is cancelled or a check fails.
    ///
    /// If initial events are enabled, the first scan runs right away, otherwise
    /// the first one is after one interval. The events are put on the queue
    /// without blocking: if it's full, the event is dropped with a warning.
    pub fn run(
        &mut self,
        scope: &CancellationToken,
        queue: &SyncSender<SessionMessage>,
    ) -> Result<(), WatchError> {
        if self.initial_event {
            self.scan(scope, queue)?;
        }
        if let Some(initial_done) = self.initial_done.take() {
            let _ = initial_done.send(());
        }

        let mut next_tick = Instant::now() + self.interval;
        loop {
            if scope.wait_timeout(next_tick.saturating_duration_since(Instant::now())) {
                return Err(WatchError::Cancelled);
            }
            next_tick = Instant::now() + self.interval;

            trace!("Checking {} repositories.", self.checks.len());
            self.scan(scope, queue)?;
        }
    }

    /// Starts the session in the background, with a child scope of `scope`.
    ///
    /// Every event and the final error are passed to `deliver` on a separate
    /// delivery thread, in the order they were produced.
    pub fn start<F>(mut self, scope: &CancellationToken, deliver: F) -> Result<SessionHandle, SessionError>
    where
        F: Fn(SessionMessage) + Send + 'static,
    {
        let scope = scope.child();
        let initial_scan = self.initial_scan_signal();
        let (queue_tx, queue_rx) = mpsc::sync_channel::<SessionMessage>(EVENT_QUEUE_SIZE);

        let delivery = thread::Builder::new()
            .name(String::from("watch-delivery"))
            .spawn(move || {
                for message in queue_rx {
                    deliver(message);
                }
            })?;

        let scanner = {
            let scope = scope.clone();
            thread::Builder::new()
                .name(String::from("watch-scan"))
                .spawn(move || {
                    let result = self.run(&scope, &queue_tx);
                    match &result {
                        Err(WatchError::Cancelled) => debug!("Watch session closed."),
                        Err(err) => {
                            error!("Watch session failed: {err}.");
                            let _ = queue_tx.send(SessionMessage::Failed(err.to_string()));
                        }
                        Ok(()) => {}
                    }
                    result
                })?
        };

        Ok(SessionHandle {
            scope,
            initial_scan: Some(initial_scan),
            scanner: Some(scanner),
            delivery: Some(delivery),
        })
    }
}

/// The owner of a running session, which stops the session on drop.
pub struct SessionHandle {
    scope: CancellationToken,
    initial_scan: Option<Receiver<()>>,
    scanner: Option<JoinHandle<Result<(), WatchError>>>,
    delivery: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Blocks until the initial scan is finished. Fails if the session stopped before.
    pub fn wait_initial_scan(&mut self) -> Result<(), SessionError> {
        let Some(initial_scan) = self.initial_scan.take() else {
            return Ok(());
        };

        if initial_scan.recv().is_ok() {
            return Ok(());
        }

        let cause = match self.scanner.take().map(JoinHandle::join) {
            Some(Ok(Err(err))) => err.to_string(),
            _ => String::from("watch session stopped"),
        };
        Err(SessionError::InitialScanFailed(cause))
    }

    /// Cancels the session and waits for it to stop, no events are delivered
    /// after this returns.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.scope.cancel();
        if let Some(scanner) = self.scanner.take() {
            if scanner.join().is_err() {
                error!("Watch session panicked.");
            }
        }
        if let Some(delivery) = self.delivery.take() {
            if delivery.join().is_err() {
                error!("Event delivery panicked.");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checks::MockCheck,
        testing::{TestDirectory, TestResult},
    };
    use std::{fs, path::PathBuf, sync::mpsc::RecvTimeoutError};
    use time::OffsetDateTime;

    fn event(url: &str) -> WatchEvent {
        WatchEvent {
            url: url.to_string(),
            path: PathBuf::from(format!("/cache/{url}")),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            initial: true,
        }
    }

    fn mock_check(url: &'static str, events_on_calls: &'static [usize]) -> Box<dyn Check> {
        let mut check = MockCheck::new();
        let mut calls = 0;
        check.expect_url().return_const(url.to_string());
        check.expect_check().returning(move || {
            calls += 1;
            Ok(events_on_calls.contains(&calls).then(|| event(url)))
        });
        Box::new(check)
    }

    fn failing_check(url: &'static str) -> Box<dyn Check> {
        let mut check = MockCheck::new();
        check.expect_url().return_const(url.to_string());
        check
            .expect_check()
            .returning(|| Err(CheckError::FailedUpdate(String::from("Testing purposes."))));
        Box::new(check)
    }

    fn start(session: WatchSession) -> Result<(SessionHandle, Receiver<SessionMessage>), SessionError> {
        let (tx, rx) = mpsc::channel();
        let handle = session.start(&CancellationToken::new(), move |message| {
            let _ = tx.send(message);
        })?;
        Ok((handle, rx))
    }

    #[test]
    fn it_should_send_initial_events_in_order() -> TestResult {
        let session = WatchSession::from_checks(
            vec![mock_check("a", &[1]), mock_check("b", &[1])],
            Duration::from_secs(3600),
            true,
        );

        let (mut handle, rx) = start(session)?;
        handle.wait_initial_scan()?;

        assert_eq!(SessionMessage::Event(event("a")), rx.recv_timeout(Duration::from_secs(1))?);
        assert_eq!(SessionMessage::Event(event("b")), rx.recv_timeout(Duration::from_secs(1))?);

        handle.stop();

        Ok(())
    }

    #[test]
    fn it_should_check_on_every_tick() -> TestResult {
        let session = WatchSession::from_checks(
            vec![mock_check("a", &[3])],
            Duration::from_millis(20),
            false,
        );

        let (mut handle, rx) = start(session)?;
        handle.wait_initial_scan()?;

        assert_eq!(SessionMessage::Event(event("a")), rx.recv_timeout(Duration::from_secs(1))?);

        handle.stop();

        // Only the third call created an event
        assert!(rx.try_recv().is_err());

        Ok(())
    }

    #[test]
    fn it_should_fail_the_initial_scan_on_an_error() -> TestResult {
        let session = WatchSession::from_checks(
            vec![failing_check("a"), mock_check("b", &[1])],
            Duration::from_secs(3600),
            true,
        );

        let (mut handle, rx) = start(session)?;
        let result = handle.wait_initial_scan();

        assert!(
            matches!(result, Err(SessionError::InitialScanFailed(_))),
            "{result:?} should be InitialScanFailed"
        );
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1))?,
            SessionMessage::Failed(_)
        ));

        Ok(())
    }

    #[test]
    fn it_should_stop_on_a_failing_tick() -> TestResult {
        let session = WatchSession::from_checks(
            vec![failing_check("a")],
            Duration::from_millis(20),
            false,
        );

        let (mut handle, rx) = start(session)?;
        handle.wait_initial_scan()?;

        let message = rx.recv_timeout(Duration::from_secs(1))?;
        assert!(
            matches!(message, SessionMessage::Failed(ref err) if err.contains("checking a failed")),
            "{message:?} should be Failed"
        );

        // Nothing else is coming after the failure
        assert_eq!(
            Err(RecvTimeoutError::Timeout),
            rx.recv_timeout(Duration::from_millis(100))
        );

        Ok(())
    }

    #[test]
    fn it_should_return_cancelled_when_the_scope_is_cancelled() {
        let mut session = WatchSession::from_checks(
            vec![mock_check("a", &[])],
            Duration::from_secs(3600),
            true,
        );
        let scope = CancellationToken::new();
        let (queue, _rx) = mpsc::sync_channel(EVENT_QUEUE_SIZE);

        let cancel = scope.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        let start = Instant::now();
        let result = session.run(&scope, &queue);
        canceller.join().unwrap();

        assert!(
            matches!(result, Err(WatchError::Cancelled)),
            "{result:?} should be Cancelled"
        );
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn it_should_drop_events_instead_of_blocking() {
        let mut session = WatchSession::from_checks(
            vec![mock_check("a", &[1]), mock_check("b", &[1]), mock_check("c", &[1])],
            Duration::from_secs(3600),
            true,
        );
        let scope = CancellationToken::new();
        let (queue, rx) = mpsc::sync_channel(1);

        let cancel = scope.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        // Nobody reads the queue, but the scan has to finish
        let result = session.run(&scope, &queue);
        canceller.join().unwrap();

        assert!(matches!(result, Err(WatchError::Cancelled)));
        assert_eq!(Ok(SessionMessage::Event(event("a"))), rx.try_recv());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn it_should_watch_real_repositories() -> TestResult {
        let directory = TestDirectory::new()?;
        let a = directory.create_remote("a", 1_600_000_000)?;
        let b = directory.create_remote("b", 1_600_000_000)?;

        let session = WatchSession::new(
            &[a.clone(), b.clone()],
            Duration::from_millis(100),
            &directory.cache(),
            true,
        )?;
        let (mut handle, rx) = start(session)?;
        handle.wait_initial_scan()?;

        let SessionMessage::Event(first) = rx.recv_timeout(Duration::from_secs(5))? else {
            panic!("should be an event");
        };
        let SessionMessage::Event(second) = rx.recv_timeout(Duration::from_secs(5))? else {
            panic!("should be an event");
        };
        assert_eq!(a, first.url);
        assert_eq!(fs::canonicalize(directory.cache().join("a"))?, first.path);
        assert_eq!(b, second.url);
        assert_eq!(fs::canonicalize(directory.cache().join("b"))?, second.path);

        // Nothing happens until there is a new commit
        assert_eq!(
            Err(RecvTimeoutError::Timeout),
            rx.recv_timeout(Duration::from_millis(300))
        );

        directory.push_change("a", "hello world!", 1_700_000_000)?;
        let message = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(
            SessionMessage::Event(WatchEvent {
                url: a,
                path: fs::canonicalize(directory.cache().join("a"))?,
                timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000)?,
                initial: false,
            }),
            message
        );
        assert_eq!(
            Err(RecvTimeoutError::Timeout),
            rx.recv_timeout(Duration::from_millis(300))
        );

        handle.stop();

        Ok(())
    }
}
