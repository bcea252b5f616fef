//! Terminal progress reporting and cancellation for `droidrun run`

use std::sync::atomic::{AtomicBool, Ordering};

use droidrun_app::RunListener;
use tokio::sync::Notify;

use crate::events::CliEvent;

/// [`RunListener`] that prints to the terminal
///
/// Text goes to stderr; with `json` every message becomes a [`CliEvent`] on
/// stdout instead.
#[derive(Debug, Default)]
pub struct ConsoleListener {
    json: bool,
    cancelled: AtomicBool,
    stopped: Notify,
}

impl ConsoleListener {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            ..Default::default()
        }
    }

    /// Ask the running deployment to stop waiting for a device
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resolves once [`RunListener::stopped`] has been called
    pub async fn wait_stopped(&self) {
        self.stopped.notified().await;
    }
}

impl RunListener for ConsoleListener {
    fn progress(&self, message: &str) {
        if self.json {
            CliEvent::progress(message).emit();
        } else {
            eprintln!("{}", message);
        }
    }

    fn error(&self, message: &str) {
        if self.json {
            CliEvent::error(message).emit();
        } else {
            eprintln!("error: {}", message);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn stopped(&self) {
        if self.json {
            CliEvent::stopped().emit();
        } else {
            eprintln!("The app stopped.");
        }
        // a permit is stored if nobody waits yet
        self.stopped.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_sticky() {
        let listener = ConsoleListener::new(false);
        assert!(!listener.is_cancelled());

        listener.cancel();

        assert!(listener.is_cancelled());
        assert!(listener.is_cancelled());
    }

    #[tokio::test]
    async fn test_stopped_before_wait_is_not_lost() {
        let listener = ConsoleListener::new(false);
        listener.stopped();

        tokio::time::timeout(Duration::from_secs(1), listener.wait_stopped())
            .await
            .expect("stop notification was lost");
    }
}
