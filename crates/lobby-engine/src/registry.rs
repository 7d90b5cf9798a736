//! Live sessions, capacity, and admission.

use lobby_core::errors::Rejection;
use lobby_core::ids::{ConnId, SessionId, SESSION_ID_RANGE};
use lobby_core::messages::RosterEntry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ADMISSION_BURST_MS, ADMISSION_BURST_PENALTY};

/// Random draws before falling back to a scan for a free id.
const ID_DRAW_ATTEMPTS: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub address: String,
    pub conn: ConnId,
    /// Last accepted chat message (or admission).
    pub last_activity_at: i64,
    /// Last frame of any kind from the client.
    pub last_heartbeat_at: i64,
    pub last_message: Option<String>,
}

pub struct SessionRegistry {
    sessions: Vec<Session>,
    capacity: usize,
    ceiling: usize,
    per_address_cap: usize,
    last_admission_at: Option<i64>,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new(ceiling: usize, per_address_cap: usize) -> Self {
        Self::with_rng(ceiling, per_address_cap, StdRng::from_entropy())
    }

    /// Deterministic id draws.
    pub fn with_seed(ceiling: usize, per_address_cap: usize, seed: u64) -> Self {
        Self::with_rng(ceiling, per_address_cap, StdRng::seed_from_u64(seed))
    }

    fn with_rng(ceiling: usize, per_address_cap: usize, rng: StdRng) -> Self {
        let ceiling = ceiling.clamp(1, SESSION_ID_RANGE as usize);
        Self {
            sessions: Vec::new(),
            capacity: ceiling,
            ceiling,
            per_address_cap,
            last_admission_at: None,
            rng,
        }
    }

    /// Admit a connection from `address`.
    ///
    /// Checks run in order: per-address quota, then (when `anti_burst` is set)
    /// the rapid-admission penalty, then capacity. The admission timestamp is
    /// recorded by every attempt that gets past the quota check.
    pub fn admit(
        &mut self,
        conn: ConnId,
        address: &str,
        now: i64,
        anti_burst: bool,
    ) -> Result<&Session, Rejection> {
        if self.count_for_address(address) >= self.per_address_cap {
            return Err(Rejection::Busy);
        }

        if anti_burst {
            if let Some(prev) = self.last_admission_at {
                if now - prev < ADMISSION_BURST_MS && self.capacity > ADMISSION_BURST_PENALTY {
                    let reduced = (self.capacity - ADMISSION_BURST_PENALTY).max(self.sessions.len());
                    tracing::warn!(
                        address = %address,
                        from = self.capacity,
                        to = reduced,
                        "admission burst, reducing capacity"
                    );
                    self.capacity = reduced;
                }
            }
            self.last_admission_at = Some(now);
        }

        if self.sessions.len() + 1 > self.capacity {
            return Err(Rejection::Busy);
        }

        let id = self.draw_id();
        self.sessions.push(Session {
            id,
            name: id.display_name(),
            address: address.to_string(),
            conn,
            last_activity_at: now,
            last_heartbeat_at: now,
            last_message: None,
        });
        Ok(&self.sessions[self.sessions.len() - 1])
    }

    fn draw_id(&mut self) -> SessionId {
        for _ in 0..ID_DRAW_ATTEMPTS {
            let candidate = SessionId::from_raw(self.rng.gen_range(0..SESSION_ID_RANGE));
            if !self.id_taken(candidate) {
                return candidate;
            }
        }
        // The ceiling is clamped to the id range, so a free id always exists here.
        (0..SESSION_ID_RANGE)
            .map(SessionId::from_raw)
            .find(|id| !self.id_taken(*id))
            .unwrap_or_else(|| SessionId::from_raw(0))
    }

    fn id_taken(&self, id: SessionId) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    pub fn remove(&mut self, conn: &ConnId) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| &s.conn == conn)?;
        Some(self.sessions.remove(idx))
    }

    pub fn get(&self, conn: &ConnId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.conn == conn)
    }

    pub fn get_mut(&mut self, conn: &ConnId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.conn == conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Live sessions in admission order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.sessions
            .iter()
            .map(|s| RosterEntry {
                id: s.id,
                name: s.name.clone(),
            })
            .collect()
    }

    pub fn count_for_address(&self, address: &str) -> usize {
        self.sessions.iter().filter(|s| s.address == address).count()
    }

    /// Step capacity one back toward the ceiling. Returns true if it moved.
    pub fn recover_capacity(&mut self) -> bool {
        if self.capacity < self.ceiling {
            self.capacity += 1;
            true
        } else {
            false
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ceiling: usize, per_address: usize) -> SessionRegistry {
        SessionRegistry::with_seed(ceiling, per_address, 7)
    }

    #[test]
    fn admit_creates_guest_session() {
        let mut reg = registry(20, 2);
        let conn = ConnId::new();
        let session = reg.admit(conn.clone(), "10.0.0.1", 1_000, true).unwrap().clone();
        assert!(session.id.get() < SESSION_ID_RANGE);
        assert_eq!(session.name, format!("Guest{}", session.id));
        assert_eq!(session.last_activity_at, 1_000);
        assert_eq!(session.last_heartbeat_at, 1_000);
        assert_eq!(reg.get(&conn), Some(&session));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn per_address_quota() {
        let mut reg = registry(20, 2);
        assert!(reg.admit(ConnId::new(), "10.0.0.1", 0, true).is_ok());
        assert!(reg.admit(ConnId::new(), "10.0.0.1", 1_000, true).is_ok());
        assert_eq!(
            reg.admit(ConnId::new(), "10.0.0.1", 2_000, true).unwrap_err(),
            Rejection::Busy
        );
        assert_eq!(reg.len(), 2);
        assert!(reg.admit(ConnId::new(), "10.0.0.2", 3_000, true).is_ok());
    }

    #[test]
    fn capacity_rejects_when_full() {
        let mut reg = registry(2, 5);
        reg.admit(ConnId::new(), "a", 0, true).unwrap();
        reg.admit(ConnId::new(), "b", 1_000, true).unwrap();
        assert_eq!(reg.admit(ConnId::new(), "c", 2_000, true).unwrap_err(), Rejection::Busy);
    }

    #[test]
    fn rapid_admissions_shrink_capacity() {
        let mut reg = registry(20, 5);
        reg.admit(ConnId::new(), "a", 0, true).unwrap();
        reg.admit(ConnId::new(), "b", 10, true).unwrap();
        assert_eq!(reg.capacity(), 17);
        reg.admit(ConnId::new(), "c", 100, true).unwrap();
        assert_eq!(reg.capacity(), 17);
    }

    #[test]
    fn burst_penalty_skipped_when_disabled() {
        let mut reg = registry(20, 5);
        reg.admit(ConnId::new(), "a", 0, false).unwrap();
        reg.admit(ConnId::new(), "b", 10, false).unwrap();
        assert_eq!(reg.capacity(), 20);
    }

    #[test]
    fn burst_penalty_never_drops_below_live_count() {
        let mut reg = registry(5, 5);
        for (i, addr) in ["a", "b", "c", "d"].iter().enumerate() {
            reg.admit(ConnId::new(), addr, i as i64 * 1_000, true).unwrap();
        }
        // 5 - 3 = 2 would be below the 4 live sessions
        let _ = reg.admit(ConnId::new(), "e", 3_010, true);
        assert!(reg.capacity() >= 4);
        assert!(reg.len() <= reg.capacity());
    }

    #[test]
    fn rejected_admission_still_counts_toward_burst() {
        let mut reg = registry(10, 100);
        let conns: Vec<ConnId> = (0..10)
            .map(|i| {
                let conn = ConnId::new();
                reg.admit(conn.clone(), "10.0.0.1", i * 1_000, true).unwrap();
                conn
            })
            .collect();

        assert_eq!(
            reg.admit(ConnId::new(), "10.0.0.1", 10_000, true).unwrap_err(),
            Rejection::Busy
        );
        assert_eq!(reg.last_admission_at, Some(10_000));

        for conn in &conns[..5] {
            reg.remove(conn);
        }
        // 10ms after the rejected attempt: penalized, but still room for one
        assert!(reg.admit(ConnId::new(), "10.0.0.1", 10_010, true).is_ok());
        assert_eq!(reg.capacity(), 7);
    }

    #[test]
    fn capacity_recovers_to_ceiling() {
        let mut reg = registry(20, 5);
        reg.admit(ConnId::new(), "a", 0, true).unwrap();
        reg.admit(ConnId::new(), "b", 1, true).unwrap();
        assert_eq!(reg.capacity(), 17);
        for _ in 0..3 {
            assert!(reg.recover_capacity());
        }
        assert!(!reg.recover_capacity());
        assert_eq!(reg.capacity(), 20);
    }

    #[test]
    fn ids_are_unique() {
        let mut reg = registry(500, 500);
        for i in 0..500 {
            reg.admit(ConnId::new(), "a", i * 1_000, false).unwrap();
        }
        let mut ids: Vec<_> = reg.iter().map(|s| s.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn remove_and_roster_order() {
        let mut reg = registry(20, 5);
        let a = ConnId::new();
        let b = ConnId::new();
        let c = ConnId::new();
        for (conn, t) in [(&a, 0), (&b, 1_000), (&c, 2_000)] {
            reg.admit(conn.clone(), "x", t, true).unwrap();
        }
        let removed = reg.remove(&b).unwrap();
        assert_eq!(removed.conn, b);
        assert!(reg.remove(&b).is_none());

        let roster = reg.roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, reg.get(&a).unwrap().id);
        assert_eq!(roster[1].id, reg.get(&c).unwrap().id);
        assert_eq!(roster[0].name, reg.get(&a).unwrap().name);
    }

    #[test]
    fn ceiling_is_clamped() {
        assert_eq!(registry(0, 1).ceiling(), 1);
        assert_eq!(registry(1_000_000, 1).ceiling(), SESSION_ID_RANGE as usize);
    }
}
