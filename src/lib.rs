//! Watch git repositories, pull every new commit and deploy it with a command.
//!
//! ## How it works
//!
//! `machinehead` is built up from **checks**, **sessions**, **triggers** and **actions**.
//! Checks clone or pull one repository and report new commits. A session runs
//! the checks of every configured target periodically. Triggers are long running
//! background processes (signals, configuration changes). Every event ends up
//! in one channel, which is processed by the [Orchestrator](start::Orchestrator):
//! it resolves the environment of the target and runs its command.
//!
//! ```ignore
//! +---------+       +---------+
//! | session | ----> |         |       +---------+       +--------+
//! +---------+       | channel | ----> | secrets | ----> | action |
//! | trigger | ----> |         |       +---------+       +--------+
//! +---------+       +---------+
//! ```
//!

/// An action runs the command of a target (e.g. [as a process](actions::command::CommandExecutor)).
pub mod actions;
/// A shareable cancellation scope for the background threads.
pub mod cancel;
/// A check is a process that tests if there are any changes and updates it.
pub mod checks;
/// The targets and settings, loaded from `machinehead.json`.
pub mod config;
/// A marker socket so only one daemon runs at a time.
pub mod instance;
/// The environment of the deployments: a global env file and secrets from Vault.
pub mod secrets;
/// A session runs the checks of the targets on a fixed interval.
pub mod session;
/// The main program loop, that reacts to every event sequentially.
pub mod start;
/// A trigger is a long running background process, which sends messages to the main loop
/// (e.g. [on a signal](triggers::signal::SignalTrigger) or [on configuration changes](triggers::config::ConfigTrigger)).
pub mod triggers;

#[cfg(test)]
mod testing;
