// src/mailbox/channel.rs
//! Free-standing bounded channels
//!
//! A [`channel`] is a [`Mailbox`] that is not bound to an agent: any number
//! of senders, one receiver, the same capacity and watermark rules.
//!
//! - Dropping every sender closes the channel; the receiver drains what is
//!   left and then sees the end of the stream.
//! - Dropping the receiver closes the channel; further sends fail with
//!   `MailboxClosed`.

use crate::capability::{AgentId, Envelope, Transferable};
use crate::mailbox::bounded::Mailbox;
use crate::mailbox::error::SendError;
use crate::mailbox::pressure::{EnqueueStatus, MailboxStats};
use crate::scheduler::waker::block_until;
use crate::utils::clock::deadline_after;
use crate::utils::config::MailboxConfig;
use crate::utils::errors::{Result, RuntimeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

struct ChannelShared<T> {
    mailbox: Mailbox<T>,
    senders: AtomicUsize,
}

/// Create a bounded channel
pub fn channel<T: Transferable>(
    config: MailboxConfig,
) -> Result<(ChannelSender<T>, ChannelReceiver<T>)> {
    let shared = Arc::new(ChannelShared {
        mailbox: Mailbox::new(config)?,
        senders: AtomicUsize::new(1),
    });

    Ok((
        ChannelSender {
            shared: Arc::clone(&shared),
            sender: None,
        },
        ChannelReceiver { shared },
    ))
}

/// Sending half; cheap to clone
pub struct ChannelSender<T> {
    shared: Arc<ChannelShared<T>>,

    /// Identity stamped on envelopes, if sending on behalf of an agent
    sender: Option<AgentId>,
}

impl<T: Transferable> ChannelSender<T> {
    /// Send `message`; the message comes back inside the error on rejection
    pub fn send(&self, message: T) -> std::result::Result<EnqueueStatus, SendError<T>> {
        let envelope = Envelope::try_seal(message, self.sender).map_err(SendError::Forbidden)?;
        self.shared
            .mailbox
            .enqueue(envelope)
            .map_err(|err| err.map(Envelope::into_payload))
    }

    /// Stamp subsequent sends with `agent` as the sender
    pub fn on_behalf_of(mut self, agent: AgentId) -> Self {
        self.sender = Some(agent);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.shared.mailbox.is_closed()
    }

    pub fn is_backpressured(&self) -> bool {
        self.shared.mailbox.is_backpressured()
    }
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
            sender: self.sender,
        }
    }
}

impl<T> Drop for ChannelSender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.mailbox.close();
        }
    }
}

/// Receiving half
pub struct ChannelReceiver<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> ChannelReceiver<T> {
    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<Envelope<T>> {
        self.shared.mailbox.dequeue()
    }

    /// Poll for the next envelope; `Ready(None)` once closed and drained
    ///
    /// Inside an agent, pass the agent's context so the agent is re-scheduled
    /// when a message arrives.
    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Option<Envelope<T>>> {
        self.shared.mailbox.poll_dequeue(cx)
    }

    /// Await the next envelope; `None` once closed and drained
    pub async fn recv(&self) -> Option<Envelope<T>> {
        futures::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Block the calling thread until a message arrives or `timeout` elapses
    ///
    /// Not for use on worker threads: agents should use [`Self::poll_recv`].
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Envelope<T>> {
        let deadline = deadline_after(Instant::now(), timeout);
        match block_until(Some(deadline), |cx| self.poll_recv(cx)) {
            Some(Some(envelope)) => Ok(envelope),
            Some(None) => Err(RuntimeError::MailboxClosed),
            None => Err(RuntimeError::AwaitTimeout(timeout)),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.mailbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.mailbox.is_empty()
    }

    pub fn stats(&self) -> MailboxStats {
        self.shared.mailbox.stats()
    }
}

impl<T> Drop for ChannelReceiver<T> {
    fn drop(&mut self) {
        self.shared.mailbox.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityTag, Isolated, Tagged};
    use std::thread;

    #[test]
    fn test_send_receive() {
        let (tx, rx) = channel::<String>(MailboxConfig::new(4, 3, 1)).unwrap();
        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();

        assert_eq!(rx.try_recv().unwrap().into_payload(), "a");
        assert_eq!(rx.try_recv().unwrap().into_payload(), "b");
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_backpressure_rules_match_mailbox() {
        let (tx, rx) = channel::<u32>(MailboxConfig::new(3, 2, 0)).unwrap();
        assert_eq!(tx.send(1).unwrap(), EnqueueStatus::Accepted);
        assert_eq!(tx.send(2).unwrap(), EnqueueStatus::BackpressureEngaged);
        assert_eq!(tx.send(3).unwrap(), EnqueueStatus::Backpressured);

        let err = tx.send(4).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner(), 4);

        while rx.try_recv().is_some() {}
        assert!(!tx.is_backpressured());
        assert_eq!(rx.stats().cleared_events, 1);
    }

    #[test]
    fn test_rejected_isolated_value_returns_to_sender() {
        let (tx, _rx) = channel::<Isolated<Vec<u8>>>(MailboxConfig::new(1, 1, 0)).unwrap();
        tx.send(Isolated::new(vec![1])).unwrap();

        let err = tx.send(Isolated::new(vec![2, 2])).unwrap_err();
        assert_eq!(err.into_inner().into_inner(), vec![2, 2]);
    }

    #[test]
    fn test_mutable_local_is_forbidden() {
        let (tx, rx) = channel::<Tagged<u32>>(MailboxConfig::new(4, 3, 1)).unwrap();
        let err = tx
            .send(Tagged::new(CapabilityTag::MutableLocal, 7))
            .unwrap_err();
        assert!(matches!(err, SendError::Forbidden(_)));
        assert!(matches!(
            RuntimeError::from(err),
            RuntimeError::CapabilityViolation(_)
        ));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_dropping_senders_closes() {
        let (tx, rx) = channel::<u32>(MailboxConfig::new(4, 3, 1)).unwrap();
        let tx2 = tx.clone();
        tx.send(1).unwrap();
        drop(tx);
        tx2.send(2).unwrap();
        drop(tx2);

        assert_eq!(*rx.try_recv().unwrap().payload(), 1);
        assert_eq!(*rx.try_recv().unwrap().payload(), 2);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).unwrap_err(),
            RuntimeError::MailboxClosed
        );
    }

    #[test]
    fn test_dropping_receiver_closes() {
        let (tx, rx) = channel::<u32>(MailboxConfig::new(4, 3, 1)).unwrap();
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.send(1).unwrap_err().is_closed());
    }

    #[test]
    fn test_recv_timeout_elapses() {
        let (_tx, rx) = channel::<u32>(MailboxConfig::new(4, 3, 1)).unwrap();
        let err = rx.recv_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, RuntimeError::AwaitTimeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_recv_timeout_wakes_on_send() {
        let (tx, rx) = channel::<u32>(MailboxConfig::new(4, 3, 1)).unwrap();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(42).unwrap();
        });

        let envelope = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*envelope.payload(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_accepts_unbounded_wait() {
        let (tx, rx) = channel::<u32>(MailboxConfig::new(4, 3, 1)).unwrap();
        tx.send(9).unwrap();
        assert_eq!(rx.recv_timeout(Duration::MAX).unwrap().into_payload(), 9);

        drop(tx);
        assert_eq!(
            rx.recv_timeout(Duration::MAX).unwrap_err(),
            RuntimeError::MailboxClosed
        );
    }

    #[tokio::test]
    async fn test_async_recv() {
        let (tx, rx) = channel::<u32>(MailboxConfig::new(4, 3, 1)).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(9).unwrap();
        });

        assert_eq!(*rx.recv().await.unwrap().payload(), 9);
        assert!(rx.recv().await.is_none());
    }
}
