//! FIFO intake queue with an explicit shutdown sentinel.
//!
//! Producers push `Some(item)`; [`IntakeSender::close`] pushes the `None`
//! sentinel. Consumers always dequeue with a bounded wait so their loop can
//! look at its stop flag even when nothing arrives.

use std::time::Duration;

use tokio::sync::mpsc;

pub fn intake_queue<T>() -> (IntakeSender<T>, IntakeReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IntakeSender { tx }, IntakeReceiver { rx })
}

#[derive(Debug)]
pub enum Dequeued<T> {
    Item(T),
    /// Explicit wake-and-stop.
    Sentinel,
    /// Nothing arrived within the wait.
    Timeout,
    /// Every sender is gone; treated like the sentinel.
    Closed,
}

#[derive(Debug)]
pub struct IntakeSender<T> {
    tx: mpsc::UnboundedSender<Option<T>>,
}

impl<T> Clone for IntakeSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> IntakeSender<T> {
    /// Enqueue an item. Returns `false` if the consumer is gone.
    pub fn send(&self, item: T) -> bool {
        self.tx.send(Some(item)).is_ok()
    }

    /// Enqueue the shutdown sentinel.
    pub fn close(&self) -> bool {
        self.tx.send(None).is_ok()
    }
}

#[derive(Debug)]
pub struct IntakeReceiver<T> {
    rx: mpsc::UnboundedReceiver<Option<T>>,
}

impl<T> IntakeReceiver<T> {
    pub async fn recv_timeout(&mut self, wait: Duration) -> Dequeued<T> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(Some(item))) => Dequeued::Item(item),
            Ok(Some(None)) => Dequeued::Sentinel,
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_then_sentinel() {
        let (tx, mut rx) = intake_queue();
        assert!(tx.send("a"));
        assert!(tx.send("b"));
        assert!(tx.close());

        let wait = Duration::from_millis(50);
        assert!(matches!(rx.recv_timeout(wait).await, Dequeued::Item("a")));
        assert!(matches!(rx.recv_timeout(wait).await, Dequeued::Item("b")));
        assert!(matches!(rx.recv_timeout(wait).await, Dequeued::Sentinel));
        assert!(matches!(rx.recv_timeout(wait).await, Dequeued::Timeout));
    }

    #[tokio::test]
    async fn test_dropped_senders_close_the_queue() {
        let (tx, mut rx) = intake_queue::<String>();
        drop(tx);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Dequeued::Closed
        ));
    }
}
