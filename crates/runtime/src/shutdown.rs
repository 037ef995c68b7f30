//! Broadcast cancellation for worker tasks.

use tokio::sync::watch;

/// Supervisor side: flips every subscribed [`ShutdownSignal`] at once.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Worker side of the shutdown broadcast.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested or the trigger is gone.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_late_subscribers() {
        let trigger = ShutdownTrigger::new();
        let mut early = trigger.subscribe();
        assert!(!early.is_cancelled());

        trigger.trigger();
        early.cancelled().await;

        let mut late = trigger.subscribe();
        assert!(late.is_cancelled());
        late.cancelled().await;
    }

    #[tokio::test]
    async fn test_dropped_trigger_cancels() {
        let trigger = ShutdownTrigger::new();
        let mut signal = trigger.subscribe();
        drop(trigger);
        signal.cancelled().await;
    }
}
