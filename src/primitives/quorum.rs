// src/primitives/quorum.rs
//! Threshold agreement with a deadline
//!
//! ```text
//!            Ballot{payload, responder}
//! quorum ──┬──────────────────────────► participant 1 ── affirm(r) ──┐
//!          ├──────────────────────────► participant 2 ── reject() ───┤
//!          └──────────────────────────► participant N ── (dropped) ──┤
//!                                                                    ▼
//!                        Tally: affirmed >= threshold ──► Ok(outcome)
//!                               threshold unreachable ──► QuorumFailure
//!                               deadline passed       ──► QuorumFailure
//! ```
//!
//! The round settles exactly once; votes arriving after that are ignored.
//! A responder dropped without answering (including one inside a message
//! that could not be delivered) counts as a rejection.

use crate::capability::{AgentId, CapabilityTag, Shared, Transferable};
use crate::primitives::future::{await_future, Awaitable, Resolver};
use crate::primitives::peer::Peer;
use crate::supervisor::AgentContext;
use crate::utils::errors::{Result, RuntimeError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tracing::{debug, trace};

/// Result of a successful round
#[derive(Debug, Clone)]
pub struct QuorumOutcome<R> {
    /// Affirmative responses, in arrival order
    pub responses: Vec<(AgentId, R)>,

    pub rejected: usize,
    pub participants: usize,
}

impl<R> QuorumOutcome<R> {
    pub fn affirmed(&self) -> usize {
        self.responses.len()
    }
}

struct Tally<R> {
    responses: Vec<(AgentId, R)>,
    rejected: usize,
    settled: bool,
}

struct Round<R> {
    tally: Mutex<Tally<R>>,
    participants: usize,
    threshold: usize,
    resolver: Resolver<Result<QuorumOutcome<R>>>,
}

impl<R> Round<R> {
    fn record(&self, voter: AgentId, vote: Option<R>) {
        let mut tally = self.tally.lock();
        if tally.settled {
            trace!("Ignoring late vote from {}", voter);
            return;
        }

        match vote {
            Some(response) => tally.responses.push((voter, response)),
            None => tally.rejected += 1,
        }

        let result = if tally.responses.len() >= self.threshold {
            Ok(QuorumOutcome {
                responses: std::mem::take(&mut tally.responses),
                rejected: tally.rejected,
                participants: self.participants,
            })
        } else if self.participants - tally.rejected < self.threshold {
            Err(RuntimeError::QuorumFailure {
                affirmed: tally.responses.len(),
                threshold: self.threshold,
            })
        } else {
            return;
        };

        // Resolved under the lock: once `settled` is visible, so is the result.
        tally.settled = true;
        self.resolver.resolve(result);
    }

    /// Settle on timeout; `None` if the round already settled
    fn expire(&self) -> Option<RuntimeError> {
        let mut tally = self.tally.lock();
        if tally.settled {
            return None;
        }
        tally.settled = true;
        Some(RuntimeError::QuorumFailure {
            affirmed: tally.responses.len(),
            threshold: self.threshold,
        })
    }
}

/// One participant's right to vote, exactly once
pub struct Responder<R> {
    round: Option<Arc<Round<R>>>,
    voter: AgentId,
}

impl<R> Responder<R> {
    pub fn affirm(mut self, response: R) {
        if let Some(round) = self.round.take() {
            round.record(self.voter, Some(response));
        }
    }

    pub fn reject(mut self) {
        if let Some(round) = self.round.take() {
            round.record(self.voter, None);
        }
    }

    pub fn voter(&self) -> AgentId {
        self.voter
    }
}

impl<R> Drop for Responder<R> {
    fn drop(&mut self) {
        if let Some(round) = self.round.take() {
            round.record(self.voter, None);
        }
    }
}

impl<R> fmt::Debug for Responder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("voter", &self.voter)
            .field("answered", &self.round.is_none())
            .finish()
    }
}

/// What each participant receives
pub struct Ballot<P: ?Sized, R> {
    pub payload: Shared<P>,
    pub responder: Responder<R>,
}

impl<P: ?Sized + fmt::Debug, R> fmt::Debug for Ballot<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ballot")
            .field("payload", &self.payload)
            .field("responder", &self.responder)
            .finish()
    }
}

impl<P, R> Transferable for Ballot<P, R>
where
    P: Transferable + Sync,
    R: Send + 'static,
{
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::ImmutableShared
    }
}

/// An in-flight round
pub struct QuorumRound<R> {
    round: Arc<Round<R>>,
    awaitable: Awaitable<Result<QuorumOutcome<R>>>,
}

impl<R: Send + 'static> QuorumRound<R> {
    /// Block until the round settles or `timeout` passes
    pub fn wait(mut self, timeout: Duration) -> Result<QuorumOutcome<R>> {
        match self.awaitable.wait(timeout) {
            Ok(result) => result,
            Err(RuntimeError::AwaitTimeout(_)) => self.expire(),
            Err(err) => Err(err),
        }
    }

    /// Poll from a behavior; the deadline runs from the first poll
    pub fn poll<M: Transferable>(
        &mut self,
        ctx: &mut AgentContext<'_, M>,
        timeout: Duration,
    ) -> Poll<Result<QuorumOutcome<R>>> {
        match ctx.poll_await(&mut self.awaitable, timeout) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(RuntimeError::AwaitTimeout(_))) => Poll::Ready(self.expire()),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Await from async code
    pub async fn resolve(mut self, timeout: Duration) -> Result<QuorumOutcome<R>> {
        let awaited = tokio::time::timeout(timeout, &mut self.awaitable).await;
        match awaited {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(err),
            Err(_) => self.expire(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.round.threshold
    }

    /// Settle as failed, unless the round settled after the timer fired
    ///
    /// A vote that reached the threshold in that window still wins.
    fn expire(&mut self) -> Result<QuorumOutcome<R>> {
        match self.round.expire() {
            Some(err) => {
                debug!(
                    "Quorum timed out ({} of {} participants)",
                    self.round.threshold, self.round.participants
                );
                Err(err)
            }
            None => self.awaitable.try_take().unwrap_or(Err(RuntimeError::QuorumFailure {
                affirmed: 0,
                threshold: self.round.threshold,
            })),
        }
    }
}

/// Send a ballot to every participant and start tallying
///
/// Fails immediately with `InvalidArgument` for a zero threshold and with
/// `QuorumFailure` when there are fewer participants than the threshold.
pub fn start_quorum<P, R, T>(
    participants: &[T],
    threshold: usize,
    payload: P,
) -> Result<QuorumRound<R>>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    T: Peer<Ballot<P, R>>,
{
    if threshold == 0 {
        return Err(RuntimeError::InvalidArgument(
            "quorum threshold must be positive".into(),
        ));
    }
    if threshold > participants.len() {
        return Err(RuntimeError::QuorumFailure {
            affirmed: 0,
            threshold,
        });
    }

    let (resolver, awaitable) = await_future();
    let round = Arc::new(Round {
        tally: Mutex::new(Tally {
            responses: Vec::with_capacity(threshold),
            rejected: 0,
            settled: false,
        }),
        participants: participants.len(),
        threshold,
        resolver,
    });

    let payload = Shared::new(payload);
    for participant in participants {
        let voter = participant.peer_id();
        let ballot = Ballot {
            payload: payload.clone(),
            responder: Responder {
                round: Some(Arc::clone(&round)),
                voter,
            },
        };

        // The ballot's responder rejects on drop if delivery failed.
        if let Err(err) = participant.deliver(ballot) {
            debug!("Quorum ballot to {} undeliverable: {}", voter, err);
        }
    }

    Ok(QuorumRound { round, awaitable })
}

/// Run a whole round on the calling thread
pub fn quorum<P, R, T>(
    participants: &[T],
    threshold: usize,
    payload: P,
    timeout: Duration,
) -> Result<QuorumOutcome<R>>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    T: Peer<Ballot<P, R>>,
{
    start_quorum(participants, threshold, payload)?.wait(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Holds ballots so tests decide when and how each participant votes
    struct Inbox {
        id: AgentId,
        ballots: Mutex<Vec<Ballot<String, u32>>>,
    }

    impl Inbox {
        fn new(id: u64) -> Self {
            Self {
                id: AgentId::from_raw(id),
                ballots: Mutex::new(Vec::new()),
            }
        }

        fn take(&self) -> Ballot<String, u32> {
            self.ballots.lock().pop().unwrap()
        }
    }

    impl Peer<Ballot<String, u32>> for Inbox {
        fn peer_id(&self) -> AgentId {
            self.id
        }

        fn deliver(&self, message: Ballot<String, u32>) -> Result<()> {
            self.ballots.lock().push(message);
            Ok(())
        }
    }

    struct Unreachable(AgentId);

    impl Peer<Ballot<String, u32>> for Unreachable {
        fn peer_id(&self) -> AgentId {
            self.0
        }

        fn deliver(&self, _message: Ballot<String, u32>) -> Result<()> {
            Err(RuntimeError::MailboxClosed)
        }
    }

    fn inboxes(n: u64) -> Vec<Inbox> {
        (1..=n).map(Inbox::new).collect()
    }

    #[test]
    fn test_resolves_at_threshold_and_ignores_late_votes() {
        let peers = inboxes(5);
        let round = start_quorum(&peers, 3, "proposal".to_string()).unwrap();

        for peer in &peers[..3] {
            let ballot = peer.take();
            assert_eq!(&*ballot.payload, "proposal");
            ballot.responder.affirm(peer.id.as_u64() as u32);
        }

        // Late affirmations after the round settled.
        for peer in &peers[3..] {
            peer.take().responder.affirm(0);
        }

        let outcome = round.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.affirmed(), 3);
        assert_eq!(outcome.participants, 5);
        let voters: Vec<u32> = outcome.responses.iter().map(|(_, r)| *r).collect();
        assert_eq!(voters, vec![1, 2, 3]);
    }

    #[test]
    fn test_threshold_reached_as_deadline_fires_is_success() {
        let peers = inboxes(5);
        let mut round = start_quorum(&peers, 3, "proposal".to_string()).unwrap();

        // The awaitable has already timed out when the deciding vote lands;
        // settling the expired round must still report the success.
        for peer in &peers[..3] {
            peer.take().responder.affirm(peer.id.as_u64() as u32);
        }

        let outcome = round.expire().unwrap();
        assert_eq!(outcome.affirmed(), 3);
        assert_eq!(outcome.participants, 5);
    }

    #[test]
    fn test_times_out_below_threshold() {
        let peers = inboxes(5);
        let round = start_quorum(&peers, 3, "proposal".to_string()).unwrap();

        peers[0].take().responder.affirm(1);
        peers[1].take().responder.affirm(2);

        let started = Instant::now();
        let result = round.wait(Duration::from_millis(30));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(
            result.unwrap_err(),
            RuntimeError::QuorumFailure {
                affirmed: 2,
                threshold: 3
            }
        );

        // Votes after the timeout change nothing and do not panic.
        peers[2].take().responder.affirm(3);
    }

    #[test]
    fn test_fails_early_when_threshold_unreachable() {
        let peers = inboxes(5);
        let round = start_quorum(&peers, 3, "proposal".to_string()).unwrap();

        peers[0].take().responder.affirm(1);
        peers[1].take().responder.reject();
        peers[2].take().responder.reject();
        drop(peers[3].take());

        let started = Instant::now();
        let result = round.wait(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(result, Err(RuntimeError::QuorumFailure { .. })));
    }

    #[test]
    fn test_undeliverable_participants_count_as_rejections() {
        let peers: Vec<Unreachable> = (1..=3).map(|i| Unreachable(AgentId::from_raw(i))).collect();
        let result = quorum(&peers, 1, "proposal".to_string(), Duration::from_secs(5));
        assert_eq!(
            result.unwrap_err(),
            RuntimeError::QuorumFailure {
                affirmed: 0,
                threshold: 1
            }
        );
    }

    #[test]
    fn test_invalid_thresholds() {
        let peers = inboxes(2);
        assert!(matches!(
            start_quorum::<String, u32, _>(&peers, 0, "p".to_string()),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            start_quorum::<String, u32, _>(&peers, 3, "p".to_string()),
            Err(RuntimeError::QuorumFailure {
                affirmed: 0,
                threshold: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_async_resolution() {
        let peers = inboxes(3);
        let round = start_quorum(&peers, 2, "proposal".to_string()).unwrap();
        peers[0].take().responder.affirm(1);
        peers[1].take().responder.affirm(2);

        let outcome = round.resolve(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.affirmed(), 2);
    }
}
