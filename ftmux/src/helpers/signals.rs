/// # Signals
///
/// Keeps track of termination requests, either from a signal or from the
/// program itself.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use log::info;
use signal_hook::iterator::Signals;

#[derive(Clone)]
pub(crate) struct Running {
    terminated: Arc<AtomicBool>,
}

impl Running {
    /// Create a new Running instance, terminated upon receiving one of the
    /// termination signals (e.g. SIGTERM).
    pub(crate) fn new() -> Result<Running> {
        let mut sigs = Signals::new(signal_hook::consts::TERM_SIGNALS)?;

        let run = Self::ignore_signals();
        let terminated = Arc::clone(&run.terminated);

        thread::spawn(move || {
            if sigs.forever().next().is_some() {
                terminated.store(true, Ordering::Relaxed);
                info!("Received signal, terminating...");
            }
        });

        Ok(run)
    }

    /// Same as `new()` but termination has to be requested with
    /// `terminate()`.
    pub(crate) fn ignore_signals() -> Running {
        Self {
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn running(&self) -> bool {
        !self.terminated.load(Ordering::Relaxed)
    }

    pub(crate) fn terminate(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }

    /// Block until termination is requested, checking every `interval`.
    pub(crate) fn wait(&self, interval: Duration) {
        while self.running() {
            thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate() {
        let run = Running::ignore_signals();
        assert!(run.running());

        let other = run.clone();
        let handle = thread::spawn(move || other.wait(Duration::from_millis(1)));
        run.terminate();
        handle.join().unwrap();
        assert!(!run.running());
    }
}
