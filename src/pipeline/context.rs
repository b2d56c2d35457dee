//! Interactive execution context
//!
//! Controllers, distributors and consumers live on one thread that drains a
//! task queue. Provider threads never touch that state directly; they post
//! tasks here and the owning thread runs them in submission order.

use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue drained exclusively by the interactive thread.
pub struct Context {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

/// Cloneable, thread-safe way to post work onto a [`Context`].
#[derive(Clone)]
pub struct ContextHandle {
    tx: Sender<Task>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            tx: self.tx.clone(),
        }
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Run every queued task without waiting, including tasks queued by the
    /// tasks themselves.
    pub fn process_events(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for a task, then drain the queue.
    pub fn process_events_timeout(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.process_events()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Await a task, then drain the queue.
    pub async fn process_events_async(&self) -> usize {
        match self.rx.recv_async().await {
            Ok(task) => {
                task();
                1 + self.process_events()
            }
            Err(_) => 0,
        }
    }

    /// Keep running tasks until `done` holds or `timeout` elapses.
    ///
    /// Returns the final value of `done`.
    pub fn process_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(task) => task(),
                Err(_) => return done(),
            }
        }
    }
}

impl ContextHandle {
    /// Queue `task` to run on the interactive thread.
    ///
    /// Returns false if the context has been dropped.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }
}
