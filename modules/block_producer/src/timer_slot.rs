//! Single pending wake-up for the scheduler

use std::{future::Future, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};

/// At most one pending timer. Arming a new one aborts the previous one,
/// so only the latest wake-up is ever delivered.
#[derive(Debug)]
pub struct TimerSlot<E> {
    events: mpsc::Sender<E>,
    pending: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> TimerSlot<E> {
    pub fn new(events: mpsc::Sender<E>) -> Self {
        Self {
            events,
            pending: None,
        }
    }

    /// Deliver `event` after `delay`
    pub fn schedule(&mut self, delay: Duration, event: E) {
        self.arm(async move {
            tokio::time::sleep(delay).await;
            Some(event)
        });
    }

    /// Deliver whatever `wake` yields once it completes, if anything
    pub fn arm<F>(&mut self, wake: F)
    where
        F: Future<Output = Option<E>> + Send + 'static,
    {
        self.cancel();
        let events = self.events.clone();
        self.pending = Some(tokio::spawn(async move {
            if let Some(event) = wake.await {
                let _ = events.send(event).await;
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|pending| !pending.is_finished())
    }
}

impl<E> Drop for TimerSlot<E> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}
