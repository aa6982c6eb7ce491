//! Per-credential call budgets for one pipeline run
//!
//! Each credential owns an atomic counter; a single process-wide flag turns every
//! credential off at once when upstream reports a hard quota violation. No lock spans
//! credentials, so partitions never contend with each other here.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// An upstream API key with its own independent quota
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    key: String,
}

impl Credential {
    pub fn new(index: usize, key: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
        }
    }

    /// Build credentials numbered in the order the keys are given
    pub fn from_keys<I, S>(keys: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .enumerate()
            .map(|(index, key)| Self::new(index, key))
            .collect()
    }

    /// Position of this credential in the tracker and in the partition list
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw key sent upstream. Never log this.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("key", &"<redacted>")
            .finish()
    }
}

struct Slot {
    used: AtomicU32,
    limit: u32,
}

/// Snapshot of one credential's consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u32,
    pub limit: u32,
}

impl QuotaUsage {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// Thread-safe quota accounting shared by every worker of a run
pub struct QuotaTracker {
    slots: Vec<Slot>,
    exhausted: AtomicBool,
}

impl QuotaTracker {
    /// Same limit for every credential
    pub fn new(credentials: usize, limit_per_credential: u32) -> Self {
        Self::with_limits(vec![limit_per_credential; credentials])
    }

    /// One limit per credential, indexed like [`Credential::index`]
    pub fn with_limits(limits: Vec<u32>) -> Self {
        Self {
            slots: limits
                .into_iter()
                .map(|limit| Slot {
                    used: AtomicU32::new(0),
                    limit,
                })
                .collect(),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn credentials(&self) -> usize {
        self.slots.len()
    }

    /// Reserve one call for `credential`
    ///
    /// Returns `true` and consumes one unit only if the credential is under its limit and
    /// the global exhausted flag is clear. A `false` result leaves the counter unchanged.
    pub fn try_acquire(&self, credential: usize) -> bool {
        if self.is_exhausted() {
            return false;
        }
        let Some(slot) = self.slots.get(credential) else {
            return false;
        };

        let reserved = slot
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < slot.limit).then_some(used + 1)
            })
            .is_ok();

        if reserved && self.is_exhausted() {
            // Lost the race with mark_exhausted; hand the unit back.
            slot.used.fetch_sub(1, Ordering::SeqCst);
            return false;
        }

        reserved
    }

    /// Stop every credential until the next [`reset`](Self::reset)
    ///
    /// Returns `true` only for the call that flipped the flag.
    pub fn mark_exhausted(&self) -> bool {
        !self.exhausted.swap(true, Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Zero all counters and clear the exhausted flag (start of a quota epoch)
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.used.store(0, Ordering::SeqCst);
        }
        self.exhausted.store(false, Ordering::SeqCst);
    }

    pub fn usage(&self, credential: usize) -> Option<QuotaUsage> {
        self.slots.get(credential).map(|slot| QuotaUsage {
            used: slot.used.load(Ordering::SeqCst),
            limit: slot.limit,
        })
    }

    /// Total calls reserved across all credentials
    pub fn total_used(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| u64::from(slot.used.load(Ordering::SeqCst)))
            .sum()
    }
}

impl fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage: Vec<QuotaUsage> = (0..self.slots.len()).filter_map(|i| self.usage(i)).collect();
        f.debug_struct("QuotaTracker")
            .field("usage", &usage)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_acquire_until_limit() {
        let quota = QuotaTracker::new(2, 2);

        assert!(quota.try_acquire(0));
        assert!(quota.try_acquire(0));
        assert!(!quota.try_acquire(0));
        assert_eq!(quota.usage(0), Some(QuotaUsage { used: 2, limit: 2 }));

        // Other credential is independent
        assert!(quota.try_acquire(1));
        assert_eq!(quota.usage(1).map(|u| u.remaining()), Some(1));
    }

    #[test]
    fn test_unknown_credential_is_rejected() {
        let quota = QuotaTracker::new(1, 10);
        assert!(!quota.try_acquire(3));
        assert_eq!(quota.usage(3), None);
    }

    #[test]
    fn test_exhausted_blocks_every_credential() {
        let quota = QuotaTracker::with_limits(vec![5, 5, 5]);
        assert!(quota.try_acquire(1));

        assert!(quota.mark_exhausted());
        assert!(!quota.mark_exhausted(), "second mark is a no-op");

        for credential in 0..3 {
            assert!(!quota.try_acquire(credential));
        }
        assert_eq!(quota.total_used(), 1, "rejected calls consume nothing");
    }

    #[test]
    fn test_reset_starts_new_epoch() {
        let quota = QuotaTracker::new(1, 1);
        assert!(quota.try_acquire(0));
        quota.mark_exhausted();

        quota.reset();

        assert!(!quota.is_exhausted());
        assert_eq!(quota.usage(0).map(|u| u.used), Some(0));
        assert!(quota.try_acquire(0));
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let quota = QuotaTracker::new(2, 250);
        let granted = [AtomicUsize::new(0), AtomicUsize::new(0)];

        std::thread::scope(|scope| {
            for t in 0..16 {
                let quota = &quota;
                let granted = &granted;
                scope.spawn(move || {
                    let credential = t % 2;
                    for _ in 0..100 {
                        if quota.try_acquire(credential) {
                            granted[credential].fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        for credential in 0..2 {
            assert_eq!(granted[credential].load(Ordering::SeqCst), 250);
            assert_eq!(quota.usage(credential).map(|u| u.used), Some(250));
        }
    }

    #[test]
    fn test_concurrent_exhaustion_is_observed() {
        let quota = QuotaTracker::new(4, u32::MAX);
        let granted_after_mark = AtomicUsize::new(0);

        quota.mark_exhausted();
        std::thread::scope(|scope| {
            for credential in 0..4 {
                let quota = &quota;
                let granted_after_mark = &granted_after_mark;
                scope.spawn(move || {
                    for _ in 0..1_000 {
                        if quota.try_acquire(credential) {
                            granted_after_mark.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(granted_after_mark.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_credential_debug_redacts_key() {
        let credential = Credential::new(0, "ttb-secret-key");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("ttb-secret-key"));
        assert!(rendered.contains("redacted"));
    }

    proptest! {
        #[test]
        fn prop_grants_min_of_limit_and_attempts(limit in 0u32..64, attempts in 0usize..128) {
            let quota = QuotaTracker::new(1, limit);
            let granted = (0..attempts).filter(|_| quota.try_acquire(0)).count();
            prop_assert_eq!(granted, attempts.min(limit as usize));
            prop_assert!(quota.usage(0).map(|u| u.used <= u.limit).unwrap_or(false));
        }
    }
}
