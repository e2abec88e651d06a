use crate::{
    actions::{ExecuteError, Executor},
    cancel::CancellationToken,
    checks::{
        git::{discover_origin, is_ssh_url, repo_path, setup_known_hosts, GitError},
        CheckError, WatchEvent,
    },
    config::{Config, Target},
    instance::{InstanceError, InstanceGuard},
    secrets::{SecretError, SecretResolver},
    session::{SessionError, SessionHandle, SessionMessage, WatchSession},
    triggers::{config::ConfigTrigger, signal::SignalTrigger, Message, Trigger, TriggerError},
};
use log::{debug, error, info, warn};
use std::{
    collections::HashSet,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender},
    thread,
};
use thiserror::Error;

/// The directory under the cache, where the daemon's own repository is cloned.
const SELF_CACHE: &str = ".self";

/// A custom error implementation for the startup of the daemon.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("another instance is already running, remove {0} if it's not")]
    AlreadyRunning(String),
    #[error("cannot create socket {0}: {1}")]
    Socket(String, #[source] std::io::Error),
    #[error("cannot set up ssh: {0}")]
    SshConfig(#[source] GitError),
    #[error("cannot watch targets: {0}")]
    Watcher(#[from] CheckError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("cannot watch the configuration: {0}")]
    ConfigWatcher(#[from] TriggerError),
}

impl From<InstanceError> for StartError {
    fn from(value: InstanceError) -> Self {
        match value {
            InstanceError::AlreadyRunning(path) => StartError::AlreadyRunning(path),
            InstanceError::Socket(path, err) => StartError::Socket(path, err),
        }
    }
}

/// A custom error for a single deployment, which is logged and skipped.
#[derive(Debug, Error)]
enum DeployError {
    #[error("cannot resolve environment: {0}")]
    Secrets(#[from] SecretError),
    #[error("{0}")]
    Execute(#[from] ExecuteError),
}

/// The reason the main loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Cancelled,
    Signal(String),
}

impl Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Cancelled => write!(f, "cancelled"),
            Termination::Signal(signal) => write!(f, "received {signal}"),
        }
    }
}

/// The daemon: owns the watch sessions and reacts to every message sequentially.
///
/// Everything that happens (new commits, configuration changes, signals) is
/// sent into one channel, so deployments never run concurrently and the
/// sessions are only replaced from the main loop.
pub struct Orchestrator {
    config: Config,
    config_path: PathBuf,
    working_directory: PathBuf,
    resolver: SecretResolver,
    executor: Box<dyn Executor>,
    scope: CancellationToken,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    watcher: Option<SessionHandle>,
    self_watcher: Option<SessionHandle>,
    bootstrapped: HashSet<String>,
    stopped: bool,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        config_path: &Path,
        resolver: SecretResolver,
        executor: Box<dyn Executor>,
        scope: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel();

        Orchestrator {
            config,
            config_path: config_path.to_path_buf(),
            working_directory: PathBuf::from("."),
            resolver,
            executor,
            scope: scope.clone(),
            tx,
            rx,
            watcher: None,
            self_watcher: None,
            bootstrapped: HashSet::new(),
            stopped: false,
        }
    }

    /// Starts the daemon and blocks until it is terminated by a signal or cancellation.
    ///
    /// Every target with `initial_run` is deployed once the first clone or pull
    /// finished. After termination the shutdown commands are run.
    pub fn start(&mut self) -> Result<Termination, StartError> {
        let _instance = InstanceGuard::acquire(&self.config.socket)?;
        self.setup_ssh()?;

        let fresh = self.missing_clones();
        let started = self
            .start_triggers()
            .and_then(|()| self.start_watcher())
            .and_then(|()| self.bootstrap(&fresh));
        if let Err(err) = started {
            self.scope.cancel();
            self.stop_sessions();
            return Err(err);
        }
        self.start_self_watcher();

        info!("Watching {} targets.", self.config.targets.len());
        let termination = self.run();
        info!("Terminating: {termination}.");
        self.shutdown();

        Ok(termination)
    }

    fn setup_ssh(&self) -> Result<(), StartError> {
        let uses_ssh = self.config.targets.iter().any(|target| is_ssh_url(&target.url));
        if !uses_ssh && self.config.known_host.is_none() {
            return Ok(());
        }

        setup_known_hosts(self.config.known_host.as_deref()).map_err(StartError::SshConfig)
    }

    fn start_triggers(&self) -> Result<(), StartError> {
        let triggers: Vec<Box<dyn Trigger>> = vec![
            Box::new(SignalTrigger::new()),
            Box::new(ConfigTrigger::new(&self.config_path, &self.scope)?),
        ];

        for trigger in triggers {
            let tx = self.tx.clone();
            thread::spawn(move || {
                let result = trigger.listen(tx);
                if let Err(err) = result {
                    error!("Trigger failed: {err}.");
                }
            });
        }

        let scope = self.scope.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            scope.wait();
            let _ = tx.send(Message::Cancelled);
        });

        Ok(())
    }

    fn start_watcher(&mut self) -> Result<(), StartError> {
        let session = WatchSession::new(
            &self.config.target_urls(),
            self.config.check_interval,
            &self.config.cache_directory,
            true,
        )?;

        let tx = self.tx.clone();
        let handle = session.start(&self.scope, move |message| {
            let _ = tx.send(Message::Target(message));
        })?;
        self.watcher = Some(handle);

        Ok(())
    }

    fn create_self_watcher(&self) -> Result<SessionHandle, StartError> {
        let url = discover_origin(&self.working_directory).map_err(CheckError::from)?;
        debug!("Watching the configuration repository {url}.");

        let session = WatchSession::new(
            &[url],
            self.config.check_interval,
            &self.config.cache_directory.join(SELF_CACHE),
            false,
        )?;

        let tx = self.tx.clone();
        let handle = session.start(&self.scope, move |message| {
            let _ = tx.send(Message::SelfRepo(message));
        })?;

        Ok(handle)
    }

    fn start_self_watcher(&mut self) {
        match self.create_self_watcher() {
            Ok(handle) => self.self_watcher = Some(handle),
            Err(err) => warn!("Not watching the configuration repository: {err}."),
        }
    }

    /// The targets that have no clone in the cache yet, their first scan sends an initial event.
    fn missing_clones(&self) -> HashSet<String> {
        self.config
            .targets
            .iter()
            .filter(|target| {
                repo_path(&self.config.cache_directory, &target.url)
                    .map(|path| !path.exists())
                    .unwrap_or(false)
            })
            .map(|target| target.url.clone())
            .collect()
    }

    /// Waits for the first scan, then runs every target with `initial_run` once.
    ///
    /// Only the targets in `fresh` are recorded, the initial event of the others never arrives.
    fn bootstrap(&mut self, fresh: &HashSet<String>) -> Result<(), StartError> {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher
                .wait_initial_scan()
                .map_err(|err| StartError::Bootstrap(err.to_string()))?;
        }

        let targets: Vec<Target> = self
            .config
            .targets
            .iter()
            .filter(|target| target.initial_run)
            .cloned()
            .collect();
        for target in targets {
            if fresh.contains(&target.url) {
                self.bootstrapped.insert(target.url.clone());
            }

            let path = match repo_path(&self.config.cache_directory, &target.url) {
                Ok(path) => path,
                Err(err) => {
                    error!("Cannot deploy {target}: {err}.");
                    continue;
                }
            };

            info!("Deploying {target} on startup.");
            match self.execute(&target, &path, false) {
                Ok(()) => info!("Deployed {target}."),
                Err(err) => error!("Failed deploying {target}: {err}."),
            }
        }

        Ok(())
    }

    /// Processes messages until a signal or cancellation arrives.
    pub fn run(&mut self) -> Termination {
        debug!("Waiting on events.");
        loop {
            let Ok(message) = self.rx.recv() else {
                return Termination::Cancelled;
            };
            if let Some(termination) = self.handle(message) {
                return termination;
            }
        }
    }

    fn handle(&mut self, message: Message) -> Option<Termination> {
        match message {
            Message::Cancelled => return Some(Termination::Cancelled),
            Message::Signal(signal) => return Some(Termination::Signal(signal)),
            Message::Target(SessionMessage::Event(event)) => self.deploy(&event),
            Message::Target(SessionMessage::Failed(err)) => error!(
                "Watching targets stopped, nothing is deployed until the configuration changes: {err}."
            ),
            Message::SelfRepo(SessionMessage::Event(event)) => {
                info!("The configuration repository {} has new commits.", event.url)
            }
            Message::SelfRepo(SessionMessage::Failed(err)) => {
                warn!("Watching the configuration repository stopped: {err}.")
            }
            Message::ConfigChanged => self.reload(),
            Message::ConfigError(err) => error!("Watching the configuration failed: {err}."),
        }

        None
    }

    fn find_target(&self, event: &WatchEvent) -> Option<&Target> {
        self.config.find_target(&event.url).or_else(|| {
            self.config.targets.iter().find(|target| {
                repo_path(&self.config.cache_directory, &target.url)
                    .ok()
                    .and_then(|path| fs::canonicalize(path).ok())
                    .is_some_and(|path| path == event.path)
            })
        })
    }

    fn deploy(&mut self, event: &WatchEvent) {
        let Some(target) = self.find_target(event).cloned() else {
            warn!("There is no target for {}, skipping.", event.url);
            return;
        };

        if event.initial && (!target.initial_run || self.bootstrapped.remove(&target.url)) {
            debug!("Skipping the initial event of {target}.");
            return;
        }

        info!("New commit on {target} from {}, deploying.", event.timestamp);
        match self.execute(&target, &event.path, false) {
            Ok(()) => info!("Deployed {target}."),
            Err(err) => error!("Failed deploying {target}: {err}."),
        }
    }

    fn execute(&self, target: &Target, path: &Path, shutdown: bool) -> Result<(), DeployError> {
        let env = self.resolver.resolve(path)?;
        self.executor.execute(target, path, env, shutdown)?;

        Ok(())
    }

    /// Replaces the target session with one for the new configuration.
    ///
    /// An invalid configuration is ignored. If the new session cannot start,
    /// the daemon keeps running without watching the targets.
    fn reload(&mut self) {
        let config = match Config::load(&self.config_path) {
            Ok(config) => config,
            Err(err) => {
                error!("Keeping the current configuration: {err}.");
                return;
            }
        };

        info!("Configuration changed, restarting watcher.");
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.bootstrapped.clear();
        self.config = config;

        if let Err(err) = self.setup_ssh() {
            warn!("Failed setting up ssh: {err}.");
        }
        if let Err(err) = self.start_watcher() {
            error!("Failed restarting watcher, nothing is deployed until the configuration changes: {err}.");
        }
    }

    fn stop_sessions(&mut self) {
        for session in [self.watcher.take(), self.self_watcher.take()]
            .into_iter()
            .flatten()
        {
            session.stop();
        }
    }

    /// Stops watching and runs the shutdown command of every target.
    ///
    /// Failures are logged and the remaining targets are still shut down.
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.stopped {
            debug!("Already shut down.");
            return;
        }
        self.stopped = true;

        self.scope.cancel();
        self.stop_sessions();

        for target in &self.config.targets {
            if target.shutdown_command.is_empty() {
                continue;
            }

            let path = match repo_path(&self.config.cache_directory, &target.url) {
                Ok(path) => path,
                Err(err) => {
                    error!("Cannot shut down {target}: {err}.");
                    continue;
                }
            };
            let env = self.resolver.resolve(&path).unwrap_or_else(|err| {
                warn!("Shutting down {target} with the global environment: {err}.");
                self.resolver.global().clone()
            });

            info!("Shutting down {target}.");
            match self.executor.execute(target, &path, env, true) {
                Ok(()) => info!("Shut down {target}."),
                Err(err) => error!("Failed shutting down {target}: {err}."),
            }
        }
    }
}
