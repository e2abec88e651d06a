use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, bool> {
        // A poisoned flag is still a valid flag.
        self.cancelled.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn cancel(&self) {
        {
            let mut cancelled = self.lock();
            if *cancelled {
                return;
            }
            *cancelled = true;
            self.condvar.notify_all();
        }

        let children = std::mem::take(
            &mut *self.children.lock().unwrap_or_else(|err| err.into_inner()),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// A cancellation scope shared between threads.
///
/// Cloning the token shares the same scope. A [child](CancellationToken::child)
/// scope is cancelled together with its parent, but can also be cancelled alone,
/// which is how a single watch session is closed without stopping the daemon.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a new, uncancelled root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope that is cancelled when this one is.
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            children.retain(|child| child.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }

        // The parent might have been cancelled before we registered.
        if self.is_cancelled() {
            child.cancel();
        }

        child
    }

    /// Cancels this scope and every child scope.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.lock()
    }

    /// Blocks until the scope is cancelled or the timeout elapses.
    /// Returns true if the scope was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.lock();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = self
                .inner
                .condvar
                .wait_timeout(cancelled, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|err| err.into_inner().0);
        }
        true
    }

    /// Blocks until the scope is cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.inner.lock();
        while !*cancelled {
            cancelled = self
                .inner
                .condvar
                .wait(cancelled)
                .unwrap_or_else(|err| err.into_inner());
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn it_should_time_out_if_not_cancelled() {
        let token = CancellationToken::new();

        let start = Instant::now();
        let cancelled = token.wait_timeout(Duration::from_millis(50));

        assert!(!cancelled);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn it_should_return_immediately_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn it_should_wake_up_waiting_threads() {
        let token = CancellationToken::new();
        let waiting = token.clone();

        let handle = thread::spawn(move || waiting.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        token.cancel();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn it_should_cancel_children_with_the_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn it_should_not_cancel_the_parent_with_the_child() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn it_should_create_cancelled_children_from_a_cancelled_parent() {
        let parent = CancellationToken::new();
        parent.cancel();

        assert!(parent.child().is_cancelled());
    }
}
