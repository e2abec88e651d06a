use log::{debug, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// A custom error for describing why the instance cannot be claimed.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The socket exists, so there is another daemon running (or it crashed).
    #[error("{0} already exists, another instance is probably running")]
    AlreadyRunning(String),
    /// The socket cannot be created.
    #[error("cannot create {0}: {1}")]
    Socket(String, #[source] std::io::Error),
}

/// Marks the running daemon with a unix socket, which is removed on drop.
///
/// If the daemon is killed without cleaning up, the socket has to be removed by hand.
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    #[cfg(unix)]
    _listener: std::os::unix::net::UnixListener,
}

impl InstanceGuard {
    /// Claims the socket path, fails if it already exists.
    pub fn acquire(path: &Path) -> Result<Self, InstanceError> {
        if path.exists() {
            return Err(InstanceError::AlreadyRunning(
                path.to_string_lossy().to_string(),
            ));
        }

        debug!("Creating socket {}.", path.to_string_lossy());

        #[cfg(unix)]
        let guard = InstanceGuard {
            path: path.to_path_buf(),
            _listener: std::os::unix::net::UnixListener::bind(path)
                .map_err(|err| InstanceError::Socket(path.to_string_lossy().to_string(), err))?,
        };
        #[cfg(not(unix))]
        let guard = {
            fs::File::create(path)
                .map_err(|err| InstanceError::Socket(path.to_string_lossy().to_string(), err))?;
            InstanceGuard {
                path: path.to_path_buf(),
            }
        };

        Ok(guard)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Failed removing {}: {err}.", self.path.to_string_lossy());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestDirectory, TestResult};

    #[test]
    fn it_should_remove_the_socket_on_drop() -> TestResult {
        let directory = TestDirectory::new()?;
        let socket = directory.base.join("machinehead.sock");

        let guard = InstanceGuard::acquire(&socket)?;
        assert!(socket.exists());

        drop(guard);
        assert!(!socket.exists());

        Ok(())
    }

    #[test]
    fn it_should_refuse_a_second_instance() -> TestResult {
        let directory = TestDirectory::new()?;
        let socket = directory.base.join("machinehead.sock");

        let _guard = InstanceGuard::acquire(&socket)?;
        let result = InstanceGuard::acquire(&socket);

        assert!(
            matches!(result, Err(InstanceError::AlreadyRunning(_))),
            "{result:?} should be AlreadyRunning"
        );
        // The first instance keeps its socket
        assert!(socket.exists());

        Ok(())
    }
}
