use crate::subscription::SubscriptionHandle;
use tokio::sync::mpsc;

/// Channel-backed subscription. Values arrive in dispatch order; dropping the
/// stream releases its listener.
#[derive(Debug)]
pub struct MessageStream<T> {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> MessageStream<T> {
    pub(crate) fn new(handle: SubscriptionHandle, rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { handle, rx }
    }

    /// Next value, or `None` once the listener was unsubscribed and every
    /// buffered value was taken.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }
}
