//! Per-address kick counters and bans.
//!
//! A record appears on the first kick from an address and disappears when its
//! window runs out: `store_window_ms` after it was first seen if never banned,
//! `ban_window_ms` after the ban otherwise. Removal wipes the history, so an
//! expired offender starts clean.

use std::collections::HashMap;

/// Kick/ban bookkeeping for one network address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRecord {
    pub address: String,
    pub first_seen_at: i64,
    pub banned_at: Option<i64>,
    pub kick_count: u32,
}

impl AddressRecord {
    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }
}

/// Result of [`AbuseControl::record_kick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KickOutcome {
    pub kick_count: u32,
    /// This kick is the one that crossed the threshold.
    pub newly_banned: bool,
}

pub struct AbuseControl {
    records: HashMap<String, AddressRecord>,
    max_kicks: u32,
    ban_window_ms: i64,
    store_window_ms: i64,
}

impl AbuseControl {
    pub fn new(max_kicks: u32, ban_window_ms: i64, store_window_ms: i64) -> Self {
        Self {
            records: HashMap::new(),
            max_kicks,
            ban_window_ms,
            store_window_ms,
        }
    }

    pub fn is_banned(&self, address: &str) -> bool {
        self.records
            .get(address)
            .is_some_and(AddressRecord::is_banned)
    }

    /// Count a kick against `address`, banning it once the threshold is reached.
    pub fn record_kick(&mut self, address: &str, now: i64) -> KickOutcome {
        let record = self
            .records
            .entry(address.to_string())
            .or_insert_with(|| AddressRecord {
                address: address.to_string(),
                first_seen_at: now,
                banned_at: None,
                kick_count: 0,
            });
        record.kick_count = record.kick_count.saturating_add(1);

        let newly_banned = record.banned_at.is_none() && record.kick_count >= self.max_kicks;
        if newly_banned {
            record.banned_at = Some(now);
            tracing::warn!(
                address = %address,
                kicks = record.kick_count,
                "address banned"
            );
        }

        KickOutcome {
            kick_count: record.kick_count,
            newly_banned,
        }
    }

    /// Drop every record whose window has elapsed. Returns how many were removed.
    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.records.len();
        let (ban_window, store_window) = (self.ban_window_ms, self.store_window_ms);
        self.records.retain(|_, record| match record.banned_at {
            Some(banned_at) => now - banned_at < ban_window,
            None => now - record.first_seen_at < store_window,
        });
        let removed = before - self.records.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.records.len(), "swept address records");
        }
        removed
    }

    pub fn get(&self, address: &str) -> Option<&AddressRecord> {
        self.records.get(address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "203.0.113.7";

    fn store() -> AbuseControl {
        AbuseControl::new(4, 200_000, 100_000)
    }

    #[test]
    fn record_is_created_lazily() {
        let mut abuse = store();
        assert!(abuse.get(ADDR).is_none());
        let outcome = abuse.record_kick(ADDR, 1_000);
        assert_eq!(outcome.kick_count, 1);
        assert!(!outcome.newly_banned);
        let record = abuse.get(ADDR).unwrap();
        assert_eq!(record.first_seen_at, 1_000);
        assert!(!abuse.is_banned(ADDR));
    }

    #[test]
    fn banned_after_threshold_until_window_and_sweep() {
        let mut abuse = store();
        for i in 0..3 {
            assert!(!abuse.record_kick(ADDR, i).newly_banned);
            assert!(!abuse.is_banned(ADDR));
        }
        let outcome = abuse.record_kick(ADDR, 50);
        assert!(outcome.newly_banned);
        assert!(abuse.is_banned(ADDR));
        assert_eq!(abuse.get(ADDR).unwrap().banned_at, Some(50));

        // Store window passed, ban window not: still banned.
        abuse.sweep(150_000);
        assert!(abuse.is_banned(ADDR));

        assert_eq!(abuse.sweep(200_050), 1);
        assert!(!abuse.is_banned(ADDR));
        assert!(abuse.get(ADDR).is_none());
    }

    #[test]
    fn ban_time_is_set_once() {
        let mut abuse = store();
        for i in 0..4 {
            abuse.record_kick(ADDR, i);
        }
        let outcome = abuse.record_kick(ADDR, 99);
        assert!(!outcome.newly_banned);
        assert_eq!(outcome.kick_count, 5);
        assert_eq!(abuse.get(ADDR).unwrap().banned_at, Some(3));
    }

    #[test]
    fn unbanned_record_expires_after_store_window() {
        let mut abuse = store();
        abuse.record_kick(ADDR, 0);
        assert_eq!(abuse.sweep(99_999), 0);
        assert_eq!(abuse.sweep(100_000), 1);
        assert!(abuse.is_empty());

        // Clean slate afterwards.
        assert_eq!(abuse.record_kick(ADDR, 100_001).kick_count, 1);
    }

    #[test]
    fn sweep_only_touches_expired_records() {
        let mut abuse = store();
        abuse.record_kick("10.0.0.1", 0);
        abuse.record_kick("10.0.0.2", 50_000);
        assert_eq!(abuse.sweep(120_000), 1);
        assert_eq!(abuse.len(), 1);
        assert!(abuse.get("10.0.0.2").is_some());
    }
}
