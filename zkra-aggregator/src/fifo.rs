//! Cancellable FIFO work queue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

struct Shared<T> {
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
    cancel_rx: watch::Receiver<bool>,
}

/// Unbounded multi-producer queue with a single logical consumer.
///
/// Items come out in publish order. After [`Fifo::cancel`], `get` returns
/// `None` (the tombstone that terminates consumer loops) and later `put`s
/// are dropped.
pub struct Fifo<T> {
    tx: mpsc::UnboundedSender<T>,
    cancel_tx: Arc<watch::Sender<bool>>,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel_tx: self.cancel_tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send> Fifo<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            tx,
            cancel_tx: Arc::new(cancel_tx),
            shared: Arc::new(Shared {
                rx: Mutex::new(rx),
                cancel_rx,
            }),
        }
    }

    /// Publish an item. Never blocks; silently dropped after cancel.
    pub fn put(&self, item: T) {
        if *self.shared.cancel_rx.borrow() {
            return;
        }
        let _ = self.tx.send(item);
    }

    /// Next item in publish order, or `None` once cancelled.
    pub async fn get(&self) -> Option<T> {
        let mut cancel = self.shared.cancel_rx.clone();
        if *cancel.borrow() {
            return None;
        }
        let mut rx = self.shared.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item,
            _ = cancel.changed() => None,
        }
    }

    /// Cancel the queue; consumers observe the tombstone on their next
    /// `get`.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl<T: Send> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}
