use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A message in flight from one job's `sendmsg` to another's `recvmsg`.
///
/// `delivered` resolves once [`Message::mark_delivered`] has been called,
/// which `Manager::recvmsg` does the moment the recipient collects the
/// body. `waitrecv` polls this rather than the inbox directly, since by the
/// time it runs the message may already have left the inbox.
#[derive(Debug)]
pub(crate) struct Message {
    /// Unique ident assigned at send time, of the form `"msg:<n>"`.
    pub(crate) ident: String,
    /// Opaque payload bytes, framed length-first on the wire for `recvmsg`.
    pub(crate) body: Vec<u8>,
    delivered: Notify,
    is_delivered: AtomicBool,
}

impl Message {
    /// Construct an undelivered message.
    pub(crate) fn new(ident: String, body: Vec<u8>) -> Self {
        Self {
            ident,
            body,
            delivered: Notify::new(),
            is_delivered: AtomicBool::new(false),
        }
    }

    /// Whether `recvmsg` has already collected this message.
    pub(crate) fn is_delivered(&self) -> bool {
        self.is_delivered.load(Ordering::SeqCst)
    }

    /// Signal delivery, waking any `waitrecv` caller.
    pub(crate) fn mark_delivered(&self) {
        self.is_delivered.store(true, Ordering::SeqCst);
        self.delivered.notify_waiters();
    }

    /// Resolves once [`Message::mark_delivered`] has been called, or
    /// immediately if it already has.
    pub(crate) async fn wait_delivered(&self) {
        loop {
            let notified = self.delivered.notified();
            if self.is_delivered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_delivered_resolves_after_mark() {
        let msg = std::sync::Arc::new(Message::new("msg:0".into(), b"hi".to_vec()));
        let waiter = msg.clone();
        let handle = tokio::spawn(async move { waiter.wait_delivered().await });
        tokio::task::yield_now().await;
        msg.mark_delivered();
        handle.await.unwrap();
        assert!(msg.is_delivered());
    }

    #[tokio::test]
    async fn wait_delivered_returns_immediately_if_already_marked() {
        let msg = Message::new("msg:0".into(), b"hi".to_vec());
        msg.mark_delivered();
        msg.wait_delivered().await;
    }
}
