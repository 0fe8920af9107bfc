// src/primitives/lease.rs
//! Time-bounded exclusive claims on named resources
//!
//! ```text
//!   acquire(k) ──► [no record | expired] ──► grant {holder, token, expiry}
//!              └─► [live record]         ──► LeaseConflict
//!
//!   expiry passes ──► record is dead; next acquire replaces it
//! ```
//!
//! Each grant carries a fencing token that increases monotonically across
//! the table, so a holder that outlived its lease can be told apart from the
//! current one. Expired records are never returned as live; they are lazily
//! replaced on acquire or swept by [`LeaseTable::purge_expired`].

use crate::capability::AgentId;
use crate::utils::clock::{deadline_after, Clock, SystemClock};
use crate::utils::config::LeaseConfig;
use crate::utils::errors::{Result, RuntimeError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A granted lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    key: String,
    holder: AgentId,

    /// Fencing token, unique per grant
    token: u64,

    acquired_at: Instant,
    expires_at: Instant,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> AgentId {
        self.holder
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Time left at `now`, zero once expired
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Node-local lease records keyed by resource name
#[derive(Debug)]
pub struct LeaseTable {
    leases: DashMap<String, Lease>,
    clock: Arc<dyn Clock>,
    next_token: AtomicU64,
    config: LeaseConfig,
}

impl LeaseTable {
    pub fn new(config: LeaseConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Table reading expiry from `clock`
    pub fn with_clock(config: LeaseConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: DashMap::new(),
            clock,
            next_token: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Acquire `key` for `ttl`
    ///
    /// Fails with `LeaseConflict` while any live record exists, including
    /// one held by the same agent; use [`renew`](Self::renew) to extend.
    pub fn acquire(&self, key: impl Into<String>, holder: AgentId, ttl: Duration) -> Result<Lease> {
        if ttl.is_zero() {
            return Err(RuntimeError::InvalidArgument(
                "lease ttl must be non-zero".to_string(),
            ));
        }

        let key = key.into();
        let now = self.clock.now();

        match self.leases.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.is_live_at(now) {
                    trace!("Lease '{}' busy (held by {})", key, current.holder);
                    return Err(RuntimeError::LeaseConflict {
                        key,
                        holder: current.holder,
                    });
                }

                debug!(
                    "Lease '{}' expired for {}, granting to {}",
                    key, current.holder, holder
                );
                let lease = self.grant(key, holder, now, ttl);
                occupied.insert(lease.clone());
                Ok(lease)
            }
            Entry::Vacant(vacant) => {
                debug!("Lease '{}' granted to {} for {:?}", key, holder, ttl);
                let lease = self.grant(key, holder, now, ttl);
                vacant.insert(lease.clone());
                Ok(lease)
            }
        }
    }

    /// Acquire with the configured default TTL
    pub fn acquire_default(&self, key: impl Into<String>, holder: AgentId) -> Result<Lease> {
        self.acquire(key, holder, self.config.default_ttl())
    }

    /// Retry [`acquire`](Self::acquire) until it succeeds or `wait` passes
    ///
    /// Blocks the calling thread between attempts; agents should call
    /// `acquire` once per turn instead.
    pub fn acquire_within(
        &self,
        key: impl Into<String>,
        holder: AgentId,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Lease> {
        let key = key.into();
        let deadline = deadline_after(self.clock.now(), wait);

        loop {
            match self.acquire(key.clone(), holder, ttl) {
                Err(RuntimeError::LeaseConflict { .. }) if self.clock.now() < deadline => {
                    let left = deadline.saturating_duration_since(self.clock.now());
                    std::thread::sleep(self.config.retry_interval().min(left));
                }
                result => return result,
            }
        }
    }

    /// Async form of [`acquire_within`](Self::acquire_within)
    pub async fn acquire_async(
        &self,
        key: impl Into<String>,
        holder: AgentId,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Lease> {
        let key = key.into();
        let deadline = deadline_after(self.clock.now(), wait);

        loop {
            match self.acquire(key.clone(), holder, ttl) {
                Err(RuntimeError::LeaseConflict { .. }) if self.clock.now() < deadline => {
                    let left = deadline.saturating_duration_since(self.clock.now());
                    tokio::time::sleep(self.config.retry_interval().min(left)).await;
                }
                result => return result,
            }
        }
    }

    /// Extend a live lease by `ttl` from now
    ///
    /// The caller must present the current grant: a stale token for a key
    /// someone else now holds is a `LeaseConflict`; an expired or released
    /// lease is an `InvalidArgument`.
    pub fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        if ttl.is_zero() {
            return Err(RuntimeError::InvalidArgument(
                "lease ttl must be non-zero".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut current = self.leases.get_mut(&lease.key).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!("no lease held on '{}'", lease.key))
        })?;

        if current.token != lease.token {
            if current.is_live_at(now) {
                return Err(RuntimeError::LeaseConflict {
                    key: lease.key.clone(),
                    holder: current.holder,
                });
            }
            return Err(RuntimeError::InvalidArgument(format!(
                "lease on '{}' was superseded",
                lease.key
            )));
        }

        if !current.is_live_at(now) {
            return Err(RuntimeError::InvalidArgument(format!(
                "lease on '{}' already expired",
                lease.key
            )));
        }

        current.expires_at = deadline_after(now, ttl);
        trace!("Lease '{}' renewed by {} for {:?}", lease.key, current.holder, ttl);
        Ok(current.value().clone())
    }

    /// Release `key` if `holder` owns it
    ///
    /// Returns whether a live lease was released. Releasing someone else's
    /// live lease is a `LeaseConflict`; an expired record is simply dropped.
    pub fn release(&self, key: &str, holder: AgentId) -> Result<bool> {
        let now = self.clock.now();

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let current = occupied.get();
                let live = current.is_live_at(now);

                if current.holder != holder && live {
                    return Err(RuntimeError::LeaseConflict {
                        key: key.to_string(),
                        holder: current.holder,
                    });
                }

                occupied.remove();
                if live {
                    debug!("Lease '{}' released by {}", key, holder);
                }
                Ok(live)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// Current holder of a live lease on `key`
    pub fn holder(&self, key: &str) -> Option<AgentId> {
        self.get(key).map(|lease| lease.holder)
    }

    /// The live lease on `key`, if any
    pub fn get(&self, key: &str) -> Option<Lease> {
        let now = self.clock.now();
        self.leases
            .get(key)
            .filter(|lease| lease.is_live_at(now))
            .map(|lease| lease.value().clone())
    }

    /// Number of live leases
    pub fn live_count(&self) -> usize {
        let now = self.clock.now();
        self.leases
            .iter()
            .filter(|entry| entry.is_live_at(now))
            .count()
    }

    /// Drop expired records; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.leases.len();
        self.leases.retain(|_, lease| lease.is_live_at(now));
        let purged = before.saturating_sub(self.leases.len());
        if purged > 0 {
            debug!("Purged {} expired leases", purged);
        }
        purged
    }

    fn grant(&self, key: String, holder: AgentId, now: Instant, ttl: Duration) -> Lease {
        Lease {
            key,
            holder,
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            acquired_at: now,
            expires_at: deadline_after(now, ttl),
        }
    }
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self::new(LeaseConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use std::sync::Barrier;

    const TTL: Duration = Duration::from_secs(10);

    fn table() -> (LeaseTable, ManualClock) {
        let clock = ManualClock::new();
        let table = LeaseTable::with_clock(LeaseConfig::default(), Arc::new(clock.clone()));
        (table, clock)
    }

    fn agent(raw: u64) -> AgentId {
        AgentId::from_raw(raw)
    }

    #[test]
    fn test_acquire_then_conflict() {
        let (table, _clock) = table();
        let lease = table.acquire("db", agent(1), TTL).unwrap();
        assert_eq!(lease.holder(), agent(1));
        assert_eq!(table.holder("db"), Some(agent(1)));

        let err = table.acquire("db", agent(2), TTL).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::LeaseConflict {
                key: "db".to_string(),
                holder: agent(1),
            }
        );
    }

    #[test]
    fn test_same_holder_also_conflicts() {
        let (table, _clock) = table();
        table.acquire("db", agent(1), TTL).unwrap();
        assert!(matches!(
            table.acquire("db", agent(1), TTL),
            Err(RuntimeError::LeaseConflict { .. })
        ));
    }

    #[test]
    fn test_expiry_frees_without_release() {
        let (table, clock) = table();
        let first = table.acquire("db", agent(1), TTL).unwrap();

        clock.advance(TTL);
        assert_eq!(table.holder("db"), None);

        let second = table.acquire("db", agent(2), TTL).unwrap();
        assert_eq!(second.holder(), agent(2));
        assert!(second.token() > first.token());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let (table, _clock) = table();
        assert!(matches!(
            table.acquire("db", agent(1), Duration::ZERO),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_release_checks_holder() {
        let (table, _clock) = table();
        table.acquire("db", agent(1), TTL).unwrap();

        assert!(matches!(
            table.release("db", agent(2)),
            Err(RuntimeError::LeaseConflict { .. })
        ));
        assert_eq!(table.release("db", agent(1)), Ok(true));
        assert_eq!(table.release("db", agent(1)), Ok(false));
        assert!(table.acquire("db", agent(2), TTL).is_ok());
    }

    #[test]
    fn test_renew_extends_live_lease() {
        let (table, clock) = table();
        let lease = table.acquire("db", agent(1), TTL).unwrap();

        clock.advance(Duration::from_secs(8));
        let renewed = table.renew(&lease, TTL).unwrap();
        assert_eq!(renewed.token(), lease.token());

        clock.advance(Duration::from_secs(8));
        assert_eq!(table.holder("db"), Some(agent(1)));
    }

    #[test]
    fn test_renew_after_expiry_fails() {
        let (table, clock) = table();
        let lease = table.acquire("db", agent(1), TTL).unwrap();

        clock.advance(TTL);
        assert!(matches!(
            table.renew(&lease, TTL),
            Err(RuntimeError::InvalidArgument(_))
        ));

        table.acquire("db", agent(2), TTL).unwrap();
        assert!(matches!(
            table.renew(&lease, TTL),
            Err(RuntimeError::LeaseConflict { .. })
        ));
    }

    #[test]
    fn test_purge_expired() {
        let (table, clock) = table();
        table.acquire("a", agent(1), Duration::from_secs(1)).unwrap();
        table.acquire("b", agent(1), Duration::from_secs(5)).unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(table.live_count(), 1);
        assert_eq!(table.purge_expired(), 1);
        assert_eq!(table.purge_expired(), 0);
        assert_eq!(table.holder("b"), Some(agent(1)));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let table = Arc::new(LeaseTable::default());
        let barrier = Arc::new(Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    table.acquire("contended", agent(i), TTL).is_ok()
                })
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_acquire_within_waits_for_release() {
        let table = Arc::new(LeaseTable::default());
        table.acquire("db", agent(1), TTL).unwrap();

        let releaser = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                table.release("db", agent(1))
            })
        };

        let lease = table
            .acquire_within("db", agent(2), TTL, Duration::from_secs(5))
            .unwrap();
        assert_eq!(lease.holder(), agent(2));
        assert_eq!(releaser.join().unwrap(), Ok(true));
    }

    #[test]
    fn test_acquire_within_gives_up() {
        let table = LeaseTable::default();
        table.acquire("db", agent(1), TTL).unwrap();
        assert!(matches!(
            table.acquire_within("db", agent(2), TTL, Duration::from_millis(15)),
            Err(RuntimeError::LeaseConflict { .. })
        ));
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let (table, clock) = table();
        let lease = table.acquire("db", agent(1), Duration::MAX).unwrap();
        clock.advance(Duration::from_secs(60 * 60 * 24 * 365));
        assert_eq!(table.holder("db"), Some(agent(1)));

        let renewed = table.renew(&lease, Duration::MAX).unwrap();
        assert!(renewed.remaining(clock.now()) > Duration::from_secs(60 * 60 * 24));
        assert_eq!(table.release("db", agent(1)), Ok(true));

        let lease = table
            .acquire_within("db", agent(2), TTL, Duration::MAX)
            .unwrap();
        assert_eq!(lease.holder(), agent(2));
    }

    #[test]
    fn test_acquire_within_waits_on_injected_clock() {
        let (table, clock) = table();
        table
            .acquire("db", agent(1), Duration::from_secs(7200))
            .unwrap();

        let ticker = {
            let clock = clock.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                clock.advance(Duration::from_secs(3600));
            })
        };

        // An hour of lease time passes in milliseconds of real time.
        let started = Instant::now();
        let result = table.acquire_within("db", agent(2), TTL, Duration::from_secs(3600));
        assert!(matches!(result, Err(RuntimeError::LeaseConflict { .. })));
        assert!(started.elapsed() < Duration::from_secs(30));
        ticker.join().unwrap();
    }

    #[tokio::test]
    async fn test_acquire_async_after_expiry() {
        let table = LeaseTable::default();
        table
            .acquire("db", agent(1), Duration::from_millis(20))
            .unwrap();

        let lease = table
            .acquire_async("db", agent(2), TTL, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(lease.holder(), agent(2));
    }
}
